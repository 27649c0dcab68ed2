//! kbchat CLI, the main entry point.
//!
//! Commands:
//! - `serve`: start the WebSocket gateway
//! - `ask`: send one question to a running gateway and stream the answer
//! - `config`: print the effective configuration, secrets redacted

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "kbchat",
    about = "Knowledge-base chat over WebSocket",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask a running gateway one question
    Ask {
        /// The question
        message: String,

        /// Session to continue (a new one is started when omitted)
        #[arg(short, long)]
        session: Option<String>,

        /// User the session belongs to
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Ask {
            message,
            session,
            user,
        } => commands::ask::run(message, session, user).await?,
        Commands::Config => commands::config_cmd::show()?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_defaults_user() {
        let cli = Cli::try_parse_from(["kbchat", "ask", "Who handles HVAC?"]).unwrap();
        match cli.command {
            Commands::Ask {
                message,
                session,
                user,
            } => {
                assert_eq!(message, "Who handles HVAC?");
                assert_eq!(session, None);
                assert_eq!(user, "cli");
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["kbchat", "serve", "--port", "9000", "-v", "--log-json"])
            .unwrap();
        assert!(cli.verbose);
        assert!(cli.log_json);
        assert!(matches!(cli.command, Commands::Serve { port: Some(9000) }));
    }

    #[test]
    fn ask_requires_message() {
        assert!(Cli::try_parse_from(["kbchat", "ask"]).is_err());
    }
}
