//! Fan-out WebSocket relay: every message a client sends is forwarded to all
//! other connected clients.

pub mod infrastructure;
pub mod ws;
