//! Per-socket session: registration, reader and writer tasks, teardown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior, timeout};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::infrastructure::audit::{self, AuditEvent};
use crate::infrastructure::config::RelaySettings;
use crate::infrastructure::metrics;
use crate::ws::broadcaster::Broadcaster;
use crate::ws::connection::{Connection, ConnectionState};
use crate::ws::types::{ConnectionId, Payload};

/// Tuning applied to every accepted session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub queue_capacity: usize,
    pub send_timeout: Duration,
    /// `None` disables pings.
    pub heartbeat_interval: Option<Duration>,
}

impl From<&RelaySettings> for SessionOptions {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            queue_capacity: settings.send_queue_capacity,
            send_timeout: Duration::from_millis(settings.send_timeout_ms),
            heartbeat_interval: (settings.heartbeat_interval_secs > 0)
                .then(|| Duration::from_secs(settings.heartbeat_interval_secs)),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&RelaySettings::default())
    }
}

/// Runs one upgraded socket until either side goes away.
pub async fn handle_socket(socket: WebSocket, broadcaster: Broadcaster, options: SessionOptions) {
    let (connection, outbound) = Connection::new(ConnectionId::new(), options.queue_capacity);
    let connection = Arc::new(connection);
    let id = connection.id().clone();
    let registry = Arc::clone(broadcaster.registry());

    if let Err(e) = registry.register(Arc::clone(&connection)) {
        error!(connection_id = %id, error = %e, "Rejecting connection");
        audit::log_audit(AuditEvent::RegistryConflict {
            connection_id: id.to_string(),
        });
        return;
    }
    info!(connection_id = %id, "Client connected");

    let span = info_span!("connection", connection_id = %id);
    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(
        write_loop(sink, outbound, Arc::clone(&connection), options).instrument(span.clone()),
    );
    let mut reader =
        tokio::spawn(read_loop(stream, Arc::clone(&connection), broadcaster).instrument(span));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    connection.transition(ConnectionState::Closing);
    registry.unregister(&id);
    info!(connection_id = %id, "Client disconnected");
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    connection: Arc<Connection>,
    broadcaster: Broadcaster,
) {
    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Transport error");
                break;
            }
        };
        if matches!(message, Message::Close(_)) {
            break;
        }
        // Pings are answered by the transport; pongs need no action.
        let Some(payload) = Payload::from_message(message) else {
            continue;
        };
        if !connection.is_open() {
            break;
        }

        metrics::message_received();
        debug!(bytes = payload.len(), "Received");
        broadcaster.broadcast(connection.id(), &payload);
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Payload>,
    connection: Arc<Connection>,
    options: SessionOptions,
) {
    let mut heartbeat = options.heartbeat_interval.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        let frame = tokio::select! {
            biased;
            _ = connection.close_requested() => {
                let close = Message::Close(Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: "server shutting down".into(),
                }));
                if timeout(options.send_timeout, sink.send(close)).await.is_err() {
                    debug!("Close frame timed out");
                }
                break;
            }
            next = outbound.recv() => match next {
                Some(payload) => payload.into_message(),
                None => break,
            },
            _ = next_tick(&mut heartbeat) => {
                trace!("Sending ping");
                Message::Ping(Bytes::new())
            }
        };

        match timeout(options.send_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "Write failed");
                break;
            }
            Err(_) => {
                warn!(
                    timeout_ms = options.send_timeout.as_millis() as u64,
                    "Send timed out, closing slow connection"
                );
                break;
            }
        }
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
