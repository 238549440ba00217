use serde::Serialize;
use tracing::{info, info_span, warn};

/// Lifecycle and integrity events worth keeping separate from the regular log.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    SystemStartup { component: String },
    SystemShutdown { reason: String },
    ListenerBound { address: String },
    RegistryConflict { connection_id: String },
}

/// Logs an audit event to the dedicated audit channel.
/// This uses a specific `target` which can be filtered by the subscriber to redirect to a secure file.
pub fn log_audit(event: AuditEvent) {
    let span = info_span!(target: "audit", "audit_event");
    let _enter = span.enter();

    match serde_json::to_string(&event) {
        Ok(json) => info!(target: "audit", event = %json, "Audit event"),
        Err(e) => warn!(target: "audit", error = %e, event = ?event, "Audit event not serializable"),
    }
}
