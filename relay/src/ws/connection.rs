//! A single accepted WebSocket session and its lifecycle.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::{Notify, mpsc};

use crate::ws::types::{ConnectionId, Payload, WsError};

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Send side of an accepted socket.
///
/// The socket itself is owned by the connection's writer task; this handle
/// only holds the bounded queue feeding that task.
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<Payload>,
    state: AtomicU8,
    close_requested: Notify,
}

impl Connection {
    /// Creates a connection in the `Connecting` state together with the
    /// receiving end of its outbound queue.
    pub fn new(id: ConnectionId, queue_capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (outbound, rx) = mpsc::channel(queue_capacity.max(1));
        let connection = Self {
            id,
            outbound,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            close_requested: Notify::new(),
        };
        (connection, rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Moves the connection to `next`. Returns `false` if the connection is
    /// already at or past that state.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if ConnectionState::from_u8(current) >= next {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Queues a payload for this connection without waiting.
    pub fn deliver(&self, payload: Payload) -> Result<(), WsError> {
        if !self.is_open() {
            return Err(WsError::NotOpen);
        }
        self.outbound.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WsError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => WsError::ChannelClosed,
        })
    }

    /// Asks the writer task to send a close frame and stop.
    pub fn request_close(&self) {
        if self.transition(ConnectionState::Closing) {
            self.close_requested.notify_one();
        }
    }

    /// Resolves once `request_close` has been called.
    pub async fn close_requested(&self) {
        self.close_requested.notified().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_only_moves_forward() {
        let (conn, _rx) = Connection::new(ConnectionId::new(), 4);
        assert_eq!(conn.state(), ConnectionState::Connecting);

        assert!(conn.transition(ConnectionState::Open));
        assert!(!conn.transition(ConnectionState::Open));
        assert!(conn.transition(ConnectionState::Closed));
        assert!(!conn.transition(ConnectionState::Open));
        assert!(!conn.transition(ConnectionState::Closing));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn deliver_requires_open_state() {
        let (conn, mut rx) = Connection::new(ConnectionId::new(), 4);
        assert_eq!(conn.deliver(Payload::from("early")), Err(WsError::NotOpen));

        conn.transition(ConnectionState::Open);
        conn.deliver(Payload::from("hello")).unwrap();
        assert_eq!(rx.recv().await, Some(Payload::from("hello")));

        conn.transition(ConnectionState::Closing);
        assert_eq!(conn.deliver(Payload::from("late")), Err(WsError::NotOpen));
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let (conn, _rx) = Connection::new(ConnectionId::new(), 1);
        conn.transition(ConnectionState::Open);

        conn.deliver(Payload::from("one")).unwrap();
        assert_eq!(conn.deliver(Payload::from("two")), Err(WsError::QueueFull));
    }

    #[test]
    fn dropped_receiver_reports_closed_channel() {
        let (conn, rx) = Connection::new(ConnectionId::new(), 1);
        conn.transition(ConnectionState::Open);
        drop(rx);

        assert_eq!(
            conn.deliver(Payload::from("nobody")),
            Err(WsError::ChannelClosed)
        );
    }

    #[tokio::test]
    async fn request_close_wakes_waiter_even_if_called_first() {
        let (conn, _rx) = Connection::new(ConnectionId::new(), 1);
        conn.transition(ConnectionState::Open);

        conn.request_close();
        assert_eq!(conn.state(), ConnectionState::Closing);

        tokio::time::timeout(std::time::Duration::from_secs(1), conn.close_requested())
            .await
            .expect("close notification should be stored");
    }
}
