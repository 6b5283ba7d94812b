//! pgAnalytics CLI - sign in to a pgAnalytics server and call its API.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use commands::GlobalOptions;

/// pgAnalytics CLI - manage your session with a pgAnalytics server.
#[derive(Parser)]
#[command(name = "pga")]
#[command(about = "pgAnalytics CLI for authentication and API access")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// API base address (overrides config and PGANALYTICS_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Keep tokens in memory only; nothing is written to disk
    #[arg(long, global = true)]
    ephemeral: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with username and password
    Login {
        /// Username (prompted if omitted)
        #[arg(short, long)]
        username: Option<String>,
    },

    /// Create an account and log in
    Register {
        #[arg(short, long)]
        username: Option<String>,
        #[arg(short, long)]
        email: Option<String>,
        #[arg(long)]
        full_name: Option<String>,
    },

    /// Logout and clear session
    Logout,

    /// Check authentication status
    Status,

    /// Show the current user
    Whoami,

    /// Refresh the access token now
    Refresh,

    /// Update email or display name
    Profile {
        #[arg(short, long)]
        email: Option<String>,
        #[arg(long)]
        full_name: Option<String>,
    },

    /// Change your password
    Passwd,

    /// Authenticated GET of an API path
    Get {
        /// Path, e.g. /api/v1/auth/me
        path: String,
    },

    /// Show the effective configuration
    Config {
        /// Write it to the config file, including --api-url and --log-level
        #[arg(long)]
        save: bool,
    },

    /// Show the route decision for a protected path
    Guard {
        /// Requested path, e.g. /dashboard
        path: String,
        /// Do not carry the requested path into the redirect
        #[arg(long)]
        no_return: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let options = GlobalOptions {
        log_level: cli.log_level.clone(),
        api_url: cli.api_url.clone(),
        ephemeral: cli.ephemeral,
    };

    if let Commands::Config { save } = cli.command {
        if let Err(e) = commands::show_config(&options, save, &cli.format) {
            output::print_error(&format!("{:#}", e), &cli.format);
            std::process::exit(1);
        }
        return;
    }

    let session = match commands::connect(&options).await {
        Ok(session) => session,
        Err(e) => {
            output::print_error(&format!("{:#}", e), &cli.format);
            std::process::exit(1);
        }
    };

    let format = &cli.format;
    let result = match cli.command {
        Commands::Login { username } => commands::login(&session, username, format).await,
        Commands::Register {
            username,
            email,
            full_name,
        } => commands::register(&session, username, email, full_name, format).await,
        Commands::Logout => commands::logout(&session, format).await,
        Commands::Status => commands::status(&session, format).await,
        Commands::Whoami => commands::whoami(&session, format).await,
        Commands::Refresh => commands::refresh(&session, format).await,
        Commands::Profile { email, full_name } => {
            commands::profile(&session, email, full_name, format).await
        }
        Commands::Passwd => commands::passwd(&session, format).await,
        Commands::Get { path } => commands::get(&session, &path, format).await,
        Commands::Guard { path, no_return } => {
            commands::guard(&session, &path, !no_return, format).await
        }
        Commands::Config { .. } => Ok(()),
    };

    session.dispose();

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
