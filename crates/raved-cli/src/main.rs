//! raved - command-line front end for the raved session lifecycle.
//!
//! Stands in for the mobile UI: every command drives the same
//! `SessionController` the app uses and prints the resulting session.

use std::io::{self, BufRead, Write};

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use raved_core::auth::RefreshOutcome;
use raved_core::utils::validation;
use raved_core::{
    Config, LoginCredentials, Registration, SessionController, SessionService, SessionState,
    SessionStatus,
};

const USAGE: &str = "usage: raved <login [identifier] | register | logout | refresh | status>";

/// Initialize the tracing subscriber for logging.
///
/// Returns the appender guard when file logging is on; dropping it flushes
/// and stops the writer thread.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var("RAVED_LOG_DIR") {
        Ok(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "raved.log"));
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{}: ", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn print_state(state: &SessionState) {
    match state.status() {
        SessionStatus::Authenticated => {
            let name = state
                .profile()
                .map(|p| p.display_name())
                .unwrap_or_default();
            println!("Signed in as {}", name);
        }
        SessionStatus::Error => {
            println!("Error: {}", state.last_error().unwrap_or("unknown"));
        }
        status => println!("{}", status),
    }
}

async fn login(
    ctl: &SessionController,
    config: &mut Config,
    identifier: Option<String>,
) -> Result<()> {
    if ctl.snapshot().is_authenticated() {
        print_state(&ctl.snapshot());
        println!("Run `raved logout` first to switch accounts");
        return Ok(());
    }

    let identifier = match identifier
        .or_else(|| std::env::var("RAVED_USERNAME").ok())
        .or_else(|| config.last_username.clone())
    {
        Some(id) => id,
        None => prompt("Username or email")?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    let credentials = LoginCredentials::new(identifier.clone(), password);
    match ctl.login(&credentials, &CancellationToken::new()).await {
        Ok(_) => {
            config.last_username = Some(identifier);
            config.save()?;
        }
        Err(e) => eprintln!("{}", e.user_message()),
    }
    print_state(&ctl.snapshot());
    Ok(())
}

async fn register(ctl: &SessionController) -> Result<()> {
    let username = prompt("Username")?;
    let email = prompt("Email")?;
    let first_name = prompt("First name")?;
    let last_name = prompt("Last name")?;
    let password = rpassword::prompt_password("Password: ")?;
    if !validation::is_strong_password(&password) {
        eprintln!("Warning: password should mix upper and lower case, digits and symbols");
    }

    let registration = Registration {
        username,
        email,
        password,
        first_name,
        last_name,
    };
    if let Err(e) = ctl.register(&registration, &CancellationToken::new()).await {
        eprintln!("{}", e.user_message());
    }
    print_state(&ctl.snapshot());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        bail!(USAGE);
    };

    let mut config = Config::load()?;
    info!(api = %config.api_base_url, storage = ?config.storage, "raved starting");

    let ctl = SessionController::new(SessionService::from_config(&config)?);
    let cancel = CancellationToken::new();
    ctl.restore(&cancel).await?;

    match command {
        "login" => login(&ctl, &mut config, args.get(1).cloned()).await?,
        "register" => register(&ctl).await?,
        "logout" => {
            ctl.logout(&cancel).await?;
            println!("Signed out");
        }
        "refresh" => match ctl.refresh(&cancel).await? {
            RefreshOutcome::Renewed(_) => println!("Access token renewed"),
            RefreshOutcome::NoSession => println!("No session to refresh; sign in again"),
        },
        "status" => {
            let state = ctl.snapshot();
            print_state(&state);
            if !state.is_authenticated() && ctl.service().has_stored_session().await? {
                println!("Stored credentials could not be resumed; run `raved login`");
            }
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }
    Ok(())
}
