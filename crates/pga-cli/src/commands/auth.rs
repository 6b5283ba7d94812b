//! Authentication commands.

use super::value_or_prompt;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde_json::json;
use session_engine::{
    AuthError, PasswordChange, ProfileUpdate, RegistrationForm, SessionManager, SessionPhase,
};

/// Login with username and password.
pub async fn login(
    session: &SessionManager,
    username: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    if let Some(user) = session.current_user() {
        output::print_success(&format!("Already logged in as {}", user.username), format);
        return Ok(());
    }

    let username = value_or_prompt(username, "Username")?;
    if username.is_empty() {
        output::print_error("Username is required", format);
        return Ok(());
    }

    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        output::print_error("Password is required", format);
        return Ok(());
    }

    match session.login(&username, &password).await {
        Ok(user) => output::print_success(&format!("Logged in as {}", user.username), format),
        Err(e) => output::print_auth_error("Login failed", &e, format),
    }

    Ok(())
}

/// Create an account and sign in as it.
pub async fn register(
    session: &SessionManager,
    username: Option<String>,
    email: Option<String>,
    full_name: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    let form = RegistrationForm {
        username: value_or_prompt(username, "Username")?,
        email: value_or_prompt(email, "Email")?,
        full_name: value_or_prompt(full_name, "Full name")?,
        password: rpassword::prompt_password("Password: ")?,
        confirm_password: rpassword::prompt_password("Confirm password: ")?,
    };

    match session.register(&form).await {
        Ok(user) => output::print_success(
            &format!("Registered and logged in as {}", user.username),
            format,
        ),
        Err(AuthError::Validation(fields)) => {
            for field in fields {
                output::print_error(&field.to_string(), format);
            }
        }
        Err(AuthError::PasswordPolicy(violations)) => {
            for violation in violations {
                output::print_error(&violation.to_string(), format);
            }
        }
        Err(e) => output::print_auth_error("Registration failed", &e, format),
    }

    Ok(())
}

/// Logout and clear session.
pub async fn logout(session: &SessionManager, format: &OutputFormat) -> Result<()> {
    session.logout().await;
    output::print_success("Logged out successfully", format);
    Ok(())
}

/// Show session status.
pub async fn status(session: &SessionManager, format: &OutputFormat) -> Result<()> {
    let snapshot = session.snapshot();

    match format {
        OutputFormat::Text => {
            println!("API:      {}", session.api().base_url());
            match &snapshot.user {
                Some(user) => {
                    println!("Auth:     logged in");
                    println!("User:     {} ({})", user.username, user.role);
                }
                None => println!("Auth:     not logged in"),
            }
        }
        OutputFormat::Json => output::print_json(&json!({
            "api_url": session.api().base_url(),
            "phase": snapshot.phase,
            "logged_in": snapshot.is_authenticated(),
            "username": snapshot.user.as_ref().map(|u| &u.username),
        })),
    }

    Ok(())
}

/// Fetch and print the current user.
pub async fn whoami(session: &SessionManager, format: &OutputFormat) -> Result<()> {
    if session.phase() != SessionPhase::Authenticated {
        output::print_error("Not logged in. Run 'pga login' first", format);
        return Ok(());
    }

    match session.fetch_current_user().await {
        Ok(user) => output::print_user(&user, format),
        Err(e) => output::print_auth_error("Could not load user", &e, format),
    }
    Ok(())
}

/// Exchange the refresh token for a new pair.
pub async fn refresh(session: &SessionManager, format: &OutputFormat) -> Result<()> {
    match session.refresh().await {
        Ok(()) => output::print_success("Session refreshed", format),
        Err(AuthError::NotLoggedIn) => {
            output::print_error("Not logged in. Run 'pga login' first", format)
        }
        Err(e) => output::print_auth_error("Refresh failed", &e, format),
    }
    Ok(())
}

/// Update email or display name.
pub async fn profile(
    session: &SessionManager,
    email: Option<String>,
    full_name: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    let update = ProfileUpdate { email, full_name };

    match session.update_profile(&update).await {
        Ok(user) => output::print_user(&user, format),
        Err(e) => output::print_auth_error("Profile update failed", &e, format),
    }
    Ok(())
}

/// Change the account password.
pub async fn passwd(session: &SessionManager, format: &OutputFormat) -> Result<()> {
    if !session.phase().has_session() {
        output::print_error("Not logged in. Run 'pga login' first", format);
        return Ok(());
    }

    let change = PasswordChange {
        current_password: rpassword::prompt_password("Current password: ")?,
        new_password: rpassword::prompt_password("New password: ")?,
        confirm_password: rpassword::prompt_password("Confirm new password: ")?,
    };

    match session.change_password(&change).await {
        Ok(()) => output::print_success("Password changed", format),
        Err(AuthError::PasswordPolicy(violations)) => {
            for violation in violations {
                output::print_error(&violation.to_string(), format);
            }
        }
        Err(e) => output::print_auth_error("Password change failed", &e, format),
    }
    Ok(())
}

