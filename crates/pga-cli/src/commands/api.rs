//! Raw API access and route checks.

use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde_json::{json, Value};
use session_engine::{GuardOptions, RouteDecision, SessionManager};

/// Authenticated GET of an API path, printed as JSON.
pub async fn get(session: &SessionManager, path: &str, format: &OutputFormat) -> Result<()> {
    match session.api().get_json::<Value>(path).await {
        Ok(body) => output::print_json(&body),
        Err(e) => output::print_auth_error(&format!("GET {} failed", path), &e, format),
    }
    Ok(())
}

/// Show what a protected view at `path` would do right now.
pub async fn guard(
    session: &SessionManager,
    path: &str,
    remember_location: bool,
    format: &OutputFormat,
) -> Result<()> {
    let options = GuardOptions {
        remember_location,
        ..GuardOptions::default()
    };
    let decision = session.route_guard(options, path).settled().await;

    match format {
        OutputFormat::Text => match &decision {
            RouteDecision::Loading => println!("loading"),
            RouteDecision::Render { user } => println!("render {} for {}", path, user.username),
            RouteDecision::RedirectToLogin {
                login_path,
                return_to: Some(return_to),
            } => println!("redirect {}?next={}", login_path, return_to),
            RouteDecision::RedirectToLogin { login_path, .. } => {
                println!("redirect {}", login_path)
            }
        },
        OutputFormat::Json => {
            let value = match &decision {
                RouteDecision::Loading => json!({"decision": "loading"}),
                RouteDecision::Render { user } => {
                    json!({"decision": "render", "path": path, "username": user.username})
                }
                RouteDecision::RedirectToLogin {
                    login_path,
                    return_to,
                } => json!({
                    "decision": "redirect",
                    "login_path": login_path,
                    "return_to": return_to,
                }),
            };
            output::print_json(&value);
        }
    }
    Ok(())
}
