use anyhow::Context;
use broadcast_relay::infrastructure::config::Settings;
use broadcast_relay::infrastructure::telemetry::TelemetryBuilder;
use broadcast_relay::infrastructure::{audit, server};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load Configuration
    // Telemetry reads its own section, so this comes first.
    let config = Settings::new().context("Failed to load configuration")?;

    // 2. Initialize Telemetry (Logging, Tracing, Metrics)
    let _telemetry = TelemetryBuilder::from_settings(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        &config.telemetry,
    )?
    .init()
    .context("Failed to initialize telemetry")?;

    info!("Broadcast Relay Starting...");
    audit::log_audit(audit::AuditEvent::SystemStartup {
        component: "Relay".into(),
    });

    // 3. Serve until a shutdown signal arrives
    server::run_server(&config.server, &config.relay, shutdown_signal())
        .await
        .context("Relay server failed")?;

    audit::log_audit(audit::AuditEvent::SystemShutdown {
        reason: "Signal received".into(),
    });
    info!("Broadcast Relay Shutdown Complete.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, cleaning up...");
}
