mod app;

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    sync::Mutex,
};

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};
use timetable_core::{
    config::{self, AppConfig},
    ApiClient, AuthContext, CommandBus, SessionError, SessionManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config_path = config::ensure_default_config()?;
    let config = AppConfig::load()?;
    info!(path = %config_path.display(), "configuration loaded");

    let auth = AuthContext::new(config.auth.credentials());
    let api = ApiClient::new(&config.api, auth.clone())?;
    if !auth.is_authenticated() {
        if let Some((username, password)) = config.auth.login() {
            if let Err(err) = api.login(username, password).await {
                warn!(%err, "sign-in failed, continuing offline");
            }
        }
    }

    let manager = SessionManager::from_config(&config, auth.clone())?;

    let (commands, bus) = CommandBus::new(manager.clone(), 32);
    let (failures_tx, failures_rx) = mpsc::channel(32);
    tokio::spawn(bus.with_failures(failures_tx).run());

    let connect_manager = manager.clone();
    tokio::spawn(async move {
        if let Err(err) = open_session(&connect_manager, &api).await {
            error!(%err, "hub connection failed");
        }
    });

    let mut app = app::ConsoleApp::new(
        manager.clone(),
        commands,
        failures_rx,
        config.session.levels.clone(),
    );
    let outcome = app.run().await;
    manager.disconnect().await;
    outcome
}

/// Connect with the current credential, renewing it once if the hub rejects it.
async fn open_session(manager: &SessionManager, api: &ApiClient) -> Result<(), SessionError> {
    let Some(credentials) = api.auth().credentials() else {
        return manager.connect(Default::default()).await;
    };
    let renewable = credentials.refresh_token.is_some();
    match manager.connect(credentials).await {
        Err(SessionError::Authentication(reason)) if renewable => {
            info!(%reason, "hub rejected credential, refreshing");
            match api.refresh().await {
                Ok(renewed) => manager.connect(renewed).await,
                Err(err) => Err(SessionError::Authentication(err.to_string())),
            }
        }
        other => other,
    }
}

fn init_logging() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("timetable-console.log");
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_writer(Mutex::new(log_file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    Ok(())
}
