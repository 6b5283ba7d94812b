//! Output formatting for the CLI.

use clap::ValueEnum;
use serde::Serialize;
use serde_json::json;
use session_engine::{AuthError, User};

/// Output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print a value as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: could not encode output: {}", e),
    }
}

/// Print a success message.
pub fn print_success(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!("{}", message),
        OutputFormat::Json => println!("{}", json!({"status": "success", "message": message})),
    }
}

/// Print an error message.
pub fn print_error(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => eprintln!("Error: {}", message),
        OutputFormat::Json => eprintln!("{}", json!({"status": "error", "message": message})),
    }
}

/// Message for a failed session call. Transient failures get a retry hint.
pub fn auth_error_message(context: &str, error: &AuthError) -> String {
    if error.is_transient() {
        format!("{}: {} (server unavailable, try again later)", context, error)
    } else {
        format!("{}: {}", context, error)
    }
}

/// Print a failed session call.
pub fn print_auth_error(context: &str, error: &AuthError, format: &OutputFormat) {
    print_error(&auth_error_message(context, error), format);
}

/// Print a table row.
pub fn print_row(label: &str, value: &str) {
    println!("  {:<16} {}", format!("{}:", label), value);
}

/// Print a divider line.
pub fn print_divider() {
    println!("{}", "-".repeat(50));
}

/// Print a heading.
pub fn print_heading(text: &str) {
    println!("\n{}", text);
    print_divider();
}

/// Print a user record.
pub fn print_user(user: &User, format: &OutputFormat) {
    match format {
        OutputFormat::Json => print_json(user),
        OutputFormat::Text => {
            print_heading("Current user");
            print_row("Username", &user.username);
            print_row("Name", &user.full_name);
            print_row("Email", &user.email);
            print_row("Role", user.role.as_str());
            print_row("Active", if user.is_active { "yes" } else { "no" });
            print_row("Verified", if user.is_verified { "yes" } else { "no" });
            if let Some(created_at) = user.created_at {
                print_row("Created", &created_at.to_rfc3339());
            }
            print_row(
                "Last login",
                &user
                    .last_login
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string()),
            );
        }
    }
}
