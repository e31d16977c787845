use crate::auth::transport::build_connector;
use crate::auth::{
    AuthApi, AuthResult, DialogEvent, DialogOutcome, HttpAuthApi, LogDirection, NoBrowser,
    ServerLogEntry, SessionController, SessionStatus, SystemBrowser, UrlOpener,
};
use crate::config::BridgeConfig;
use crate::ui_store::UiStore;
use anyhow::Context;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{info, warn};

/// Long-lived collaborators shared by every command
pub struct AppState {
    pub config: BridgeConfig,
    pub api: Arc<dyn AuthApi>,
    pub ui: UiStore,
}

impl AppState {
    pub fn new(config: BridgeConfig) -> AuthResult<Self> {
        let api = HttpAuthApi::with_timeout(config.base_url(), config.request_timeout())?;
        Ok(Self {
            config,
            api: Arc::new(api),
            ui: UiStore::new(),
        })
    }
}

/// Runs the interactive login dialog on the terminal.
///
/// Lines typed on stdin answer the CLI's prompts. Once the attempt has
/// failed, `r` retries and anything else closes. Ctrl-C cancels.
pub async fn login(state: &AppState, open_browser: bool) -> anyhow::Result<DialogOutcome> {
    let connector = build_connector(&state.config).context("failed to set up transport")?;
    let opener: Arc<dyn UrlOpener> = if open_browser {
        Arc::new(SystemBrowser::new(state.config.browser.clone()))
    } else {
        Arc::new(NoBrowser)
    };

    let mut controller =
        SessionController::new(state.config.clone(), state.api.clone(), connector, opener);
    let mut events = controller.subscribe();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    info!(server = %state.config.base_url(), transport = %controller.transport(), "starting claude login");
    if let Err(err) = controller.start().await {
        warn!(error = %err, "login could not start");
    }

    loop {
        render_events(state, &mut events).await;
        if controller.status() == SessionStatus::Success {
            break;
        }

        tokio::select! {
            inbound = controller.next_inbound() => match inbound {
                Some(inbound) => controller.handle(inbound).await,
                None => break,
            },
            line = stdin.next_line() => match line {
                Ok(Some(line)) => {
                    if controller.status() == SessionStatus::Streaming {
                        if let Err(err) = controller.send_input(line.trim()).await {
                            eprintln!("Input was not delivered: {}", err);
                        }
                    } else if line.trim().eq_ignore_ascii_case("r") {
                        state.ui.retry_flags().mark(LOGIN_ATTEMPT).await;
                        if let Err(err) = controller.retry().await {
                            warn!(error = %err, "retry failed");
                        }
                    } else {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "failed to read stdin");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                controller.cancel().await?;
                render_events(state, &mut events).await;
                break;
            }
        }
    }

    Ok(controller.close().await)
}

async fn render_events(state: &AppState, events: &mut Receiver<DialogEvent>) {
    loop {
        let event = match events.try_recv() {
            Ok(event) => event,
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "dialog events dropped");
                continue;
            }
            Err(_) => return,
        };

        match event {
            DialogEvent::Output(text) => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            DialogEvent::MenuOptions(options) if !options.is_empty() => {
                eprintln!();
                for option in options {
                    eprintln!("  [{}] {}", option.value, option.label);
                }
            }
            DialogEvent::MenuOptions(_) => {}
            DialogEvent::LoginUrl(url) => eprintln!("\nOpen this URL to continue: {}", url),
            DialogEvent::SessionBound(session_id) => {
                state.ui.reset_attempt_scope().await;
                state.ui.navigation().select_process(Some(session_id)).await;
            }
            DialogEvent::StatusChanged(status) => {
                eprintln!("[{}]", status);
                if status == SessionStatus::Error {
                    eprintln!("{}", error_hint(state).await);
                }
            }
            DialogEvent::Notice(notice) => eprintln!("note: {}", notice),
            DialogEvent::Reconnecting { delay_ms } => {
                eprintln!("Connection dropped, reconnecting in {} ms", delay_ms)
            }
            DialogEvent::HistoryLoaded(count) => info!(count, "session history loaded"),
        }
    }
}

/// Retry flag of the login dialog. A new session binding clears it with the
/// rest of the attempt scope, so it only survives a retry that never started.
const LOGIN_ATTEMPT: &str = "claude-login";

async fn error_hint(state: &AppState) -> &'static str {
    if state.ui.retry_flags().take(LOGIN_ATTEMPT).await {
        "Retry could not start a session. Type 'r' to try again, or press Enter to close."
    } else {
        "Type 'r' to retry, or press Enter to close."
    }
}

/// Signs the workspace out of Claude and refreshes server state.
pub async fn logout(state: &AppState) -> AuthResult<()> {
    state.api.logout().await?;
    state.api.reload_system().await?;
    info!("logged out of claude");
    Ok(())
}

pub async fn session_logs(state: &AppState, session_id: &str) -> AuthResult<Vec<String>> {
    let entries = state.api.get_session_log(session_id).await?;
    Ok(entries.iter().map(format_log_entry).collect())
}

pub fn format_log_entry(entry: &ServerLogEntry) -> String {
    let when = entry
        .recorded_at()
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    let arrow = match entry.direction {
        LogDirection::Output => "<",
        LogDirection::Input => ">",
        LogDirection::Meta => "#",
    };
    format!("{} {} {}", when, arrow, entry.data.trim_end())
}
