//! FlexTarget CLI - account session management from the terminal.
//!
//! Logs in against the FlexTarget backend, keeps the stored session fresh,
//! and exposes the profile operations of the mobile client.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flextarget_core::auth::SessionSnapshot;
use flextarget_core::utils::mask_mobile;
use flextarget_core::{AuthEndpoint, Config, Session, SessionManager};

// ============================================================================
// Constants
// ============================================================================

/// Rolling log file name prefix in the data directory
const LOG_FILE_PREFIX: &str = "flextarget.log";

const USAGE: &str = "\
Usage: flextarget <command>

Commands:
  login [mobile]        Log in (prompts for the password)
  logout                End the session and forget stored credentials
  whoami                Show the current user
  edit-profile <name>   Change the display name
  change-password       Change the account password
  refresh               Renew the access token now
  watch                 Keep the session alive and print every change";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and to a daily rolling file; the returned guard flushes
/// the file writer on drop.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file = config.data_dir().ok().and_then(|dir| {
        std::fs::create_dir_all(&dir).ok()?;
        Some(tracing_appender::non_blocking(tracing_appender::rolling::daily(
            dir,
            LOG_FILE_PREFIX,
        )))
    });
    let (file_layer, guard) = match file {
        Some((writer, guard)) => (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let mut config = Config::load().context("Failed to load config")?;
    let _log_guard = init_tracing(&config);
    info!(command, "FlexTarget CLI starting");

    let endpoint: Arc<dyn AuthEndpoint> = Arc::new(config.api_client()?);
    let store = config.credential_store()?;
    let manager = SessionManager::connect(endpoint, store, config.session_settings());

    match command {
        "login" => login(&manager, &mut config, args.get(1).cloned()).await,
        "logout" => {
            manager.restore().await;
            manager.logout().await?;
            println!("Logged out.");
            Ok(())
        }
        "whoami" => {
            require_session(&manager).await?;
            if let Some(session) = manager.current_session() {
                print_session(&session);
            }
            Ok(())
        }
        "edit-profile" => {
            let name = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("Usage: flextarget edit-profile <name>"))?;
            require_session(&manager).await?;
            manager.edit_profile(name).await?;
            println!("Display name set to {}.", name);
            Ok(())
        }
        "change-password" => {
            require_session(&manager).await?;
            let old = rpassword::prompt_password("Current password: ")?;
            let new = rpassword::prompt_password("New password: ")?;
            let confirm = rpassword::prompt_password("Repeat new password: ")?;
            if new != confirm {
                anyhow::bail!("Passwords do not match");
            }
            manager.change_password(&old, &new).await?;
            println!("Password changed.");
            Ok(())
        }
        "refresh" => {
            require_session(&manager).await?;
            // The restore already validated with one refresh; this is a second, explicit one
            let session = manager.refresh().await?;
            println!("Tokens renewed.");
            print_session(&session);
            Ok(())
        }
        "watch" => watch(&manager).await,
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }
}

async fn login(manager: &SessionManager, config: &mut Config, mobile: Option<String>) -> Result<()> {
    let mobile = match mobile.or_else(|| config.last_mobile.clone()) {
        Some(mobile) => mobile,
        None => prompt("Mobile: ")?,
    };
    let password = rpassword::prompt_password(format!("Password for {}: ", mask_mobile(&mobile)))?;

    let session = manager.login(&mobile, &password).await?;

    config.last_mobile = Some(mobile);
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }
    println!("Logged in.");
    print_session(&session);
    Ok(())
}

/// Restore the stored session and wait for it to be validated.
async fn require_session(manager: &SessionManager) -> Result<()> {
    let Some(validation) = manager.restore().await else {
        anyhow::bail!("Not logged in. Run `flextarget login` first.");
    };
    validation.await.context("Session validation task failed")?;
    if !manager.is_authenticated() {
        anyhow::bail!("Stored session has expired. Run `flextarget login` again.");
    }
    Ok(())
}

async fn watch(manager: &SessionManager) -> Result<()> {
    let mut changes = manager.subscribe();
    if manager.restore().await.is_none() {
        anyhow::bail!("Not logged in. Run `flextarget login` first.");
    }
    print_snapshot(&changes.borrow_and_update());

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = changes.borrow_and_update().clone();
                print_snapshot(&snapshot);
                if snapshot.is_none() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    Ok(())
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    match snapshot {
        Some(session) => print_session(session),
        None => println!("Logged out."),
    }
}

fn print_session(session: &Session) {
    let mobile = session.mobile.as_deref().map(mask_mobile).unwrap_or_default();
    let name = session.display_name.as_deref().unwrap_or("-");
    println!("{}  {}  ({})", session.user_id, name, mobile);
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        anyhow::bail!("No input");
    }
    Ok(value)
}
