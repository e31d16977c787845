use anyhow::{bail, Context, Result};
use anyon_auth_lib::app;
use anyon_auth_lib::auth::transport::TransportKind;
use anyon_auth_lib::auth::DialogOutcome;
use anyon_auth_lib::{AppState, BridgeConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "anyon-auth", version, about = "Connect an Anyon workspace to Claude Code")]
struct Cli {
    /// Anyon server URL, e.g. http://127.0.0.1:3001
    #[arg(long, global = true)]
    server: Option<String>,

    /// Path to auth.toml
    #[arg(long, global = true, env = "ANYON_AUTH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the interactive Claude login
    Login {
        /// event-stream or pty-socket
        #[arg(long)]
        transport: Option<TransportKind>,

        /// Print the login URL instead of opening a browser
        #[arg(long)]
        no_open: bool,
    },
    /// Disconnect Claude from the workspace
    Logout,
    /// Print the server-side transcript of a login session
    Logs { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("anyon_auth_lib=info,anyon_auth=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = BridgeConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }

    match cli.command {
        Command::Login { transport, no_open } => {
            if let Some(kind) = transport {
                config.transport = kind;
            }
            config.validate()?;
            let open_browser = config.auto_open_login_url && !no_open;
            let state = AppState::new(config)?;

            match app::login(&state, open_browser).await? {
                DialogOutcome::Success => println!("\nClaude is connected."),
                DialogOutcome::Cancelled => println!("\nLogin cancelled."),
                DialogOutcome::Failed(message) => bail!("login failed: {}", message),
            }
        }
        Command::Logout => {
            config.validate()?;
            let state = AppState::new(config)?;
            app::logout(&state).await.context("logout failed")?;
            println!("Claude has been disconnected.");
        }
        Command::Logs { session_id } => {
            config.validate()?;
            let state = AppState::new(config)?;
            let lines = app::session_logs(&state, &session_id)
                .await
                .with_context(|| format!("failed to fetch logs for {}", session_id))?;
            for line in lines {
                println!("{}", line);
            }
        }
    }

    Ok(())
}
