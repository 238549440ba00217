//! Fan-out of inbound messages to every other open connection.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::infrastructure::metrics::{self, DeliveryOutcome};
use crate::ws::registry::Registry;
use crate::ws::types::{ConnectionId, DispatchReport, Payload, WsError};

#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Delivers `payload` to every open connection except `sender`.
    ///
    /// Recipients are taken from a registry snapshot, so connections
    /// registered after this call starts never see the message. A failed
    /// delivery is counted and logged; it never stops the remaining fan-out.
    pub fn broadcast(&self, sender: &ConnectionId, payload: &Payload) -> DispatchReport {
        let snapshot = self.registry.snapshot();
        let mut report = DispatchReport::default();

        for recipient in snapshot.iter().filter(|c| c.id() != sender) {
            let outcome = match recipient.deliver(payload.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    DeliveryOutcome::Delivered
                }
                Err(WsError::QueueFull) => {
                    warn!(
                        connection_id = %recipient.id(),
                        bytes = payload.len(),
                        "Send queue full, dropping message"
                    );
                    report.dropped += 1;
                    DeliveryOutcome::Dropped
                }
                Err(e) => {
                    debug!(connection_id = %recipient.id(), error = %e, "Skipping recipient");
                    report.closed += 1;
                    DeliveryOutcome::Closed
                }
            };
            metrics::delivery(outcome);
        }

        debug!(
            sender = %sender,
            delivered = report.delivered,
            dropped = report.dropped,
            closed = report.closed,
            "Broadcast sent"
        );
        report
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}
