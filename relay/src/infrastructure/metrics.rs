//! Relay metric names and recording helpers.
//!
//! Recording is a no-op until a recorder is installed (see
//! [`crate::infrastructure::telemetry::TelemetryBuilder::with_metrics`]).

use metrics::{counter, gauge};

pub const CONNECTIONS_OPEN: &str = "relay_connections_open";
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
pub const MESSAGES_RECEIVED_TOTAL: &str = "relay_messages_received_total";
pub const DELIVERIES_TOTAL: &str = "relay_deliveries_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Dropped,
    Closed,
}

impl DeliveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Dropped => "dropped",
            Self::Closed => "closed",
        }
    }
}

pub fn connection_opened(open: usize) {
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_OPEN).set(open as f64);
}

pub fn connection_closed(open: usize) {
    gauge!(CONNECTIONS_OPEN).set(open as f64);
}

pub fn message_received() {
    counter!(MESSAGES_RECEIVED_TOTAL).increment(1);
}

pub fn delivery(outcome: DeliveryOutcome) {
    counter!(DELIVERIES_TOTAL, "outcome" => outcome.as_str()).increment(1);
}
