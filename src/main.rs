use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::info;

use courier_core::SessionId;
use courier_engine::{
    BridgeConfig, BridgeTransport, ConnectionManager, ManagerConfig, ReconnectPolicy,
    WebhookConfig, WebhookDispatcher,
};
use courier_server::{GatewayFacade, ServerConfig};
use courier_settings::CourierSettings;
use courier_store::{FileSessionStore, Sealer};
use courier_telemetry::{init_telemetry, parse_level, LogFormat, TelemetryConfig};

/// Messaging gateway: keeps a paired session connected and relays inbound
/// messages to a webhook.
#[derive(Debug, Parser)]
#[command(name = "courier", version)]
struct Args {
    /// Settings file (defaults to $COURIER_CONFIG or ~/.courier/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port for the HTTP API. Overrides settings and PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => courier_settings::load_settings_from_path(path),
        None => courier_settings::load_settings(),
    }
    .context("failed to load settings")?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let telemetry = init_telemetry(telemetry_config(&settings));
    info!(session_id = %settings.session.id, path = %settings.session.path, "starting courier");

    let metrics = telemetry.shared_metrics();
    let shutdown = CancellationToken::new();

    let store = session_store(&settings)?;
    let transport = BridgeTransport::new(BridgeConfig {
        url: settings.bridge.url.clone(),
        request_timeout: Duration::from_millis(settings.bridge.request_timeout_ms),
    });
    let dispatcher = WebhookDispatcher::new(
        WebhookConfig {
            url: settings.webhook.url.clone(),
            payload: settings.webhook.payload,
            token: settings.webhook.token.clone().map(SecretString::from),
            timeout: Duration::from_millis(settings.webhook.timeout_ms),
        },
        Arc::clone(&metrics),
    );
    if !dispatcher.is_enabled() {
        info!("no webhook configured, inbound messages will not be relayed");
    }

    let (manager, handle) = ConnectionManager::new(
        ManagerConfig {
            session_id: SessionId::from_raw(settings.session.id.clone()),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(settings.reconnect.base_delay_ms),
                max_delay: Duration::from_millis(settings.reconnect.max_delay_ms),
                jitter_factor: settings.reconnect.jitter_factor,
                max_attempts: settings.reconnect.max_attempts,
            },
            ..ManagerConfig::default()
        },
        Arc::new(transport),
        Arc::new(store),
        dispatcher,
        metrics,
        shutdown.clone(),
    );
    let manager_task = manager.spawn();

    let server = courier_server::start(
        ServerConfig {
            host: settings.server.host.clone(),
            port: settings.server.port,
        },
        Arc::new(GatewayFacade::new(handle)),
        shutdown.clone(),
    )
    .await
    .context("failed to start http server")?;
    info!(port = server.port(), "courier ready");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl+c")?;
            info!("shutting down");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    server.join().await;
    match manager_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "connection manager stopped with error"),
        Err(e) => tracing::error!(error = %e, "connection manager task panicked"),
    }
    Ok(())
}

fn telemetry_config(settings: &CourierSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: parse_level(&settings.logging.level).unwrap_or(tracing::Level::INFO),
        module_levels: Vec::new(),
        log_format: if settings.logging.format.eq_ignore_ascii_case("text") {
            LogFormat::Text
        } else {
            LogFormat::Json
        },
    }
}

fn session_store(settings: &CourierSettings) -> anyhow::Result<FileSessionStore> {
    let store = FileSessionStore::new(&settings.session.path);
    let Some(key_path) = settings.session.key_path.as_deref() else {
        return Ok(store);
    };
    let sealer = Sealer::from_key_file(Path::new(key_path))
        .with_context(|| format!("failed to load session key from {key_path}"))?;
    info!(key_path, "session files are sealed at rest");
    Ok(store.with_sealer(sealer))
}
