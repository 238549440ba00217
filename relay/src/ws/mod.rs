//! WebSocket relay core: connection registry and message fan-out.

pub mod broadcaster;
pub mod connection;
pub mod handler;
pub mod registry;
pub mod types;

pub use broadcaster::Broadcaster;
pub use connection::{Connection, ConnectionState};
pub use handler::SessionOptions;
pub use registry::{Registry, Snapshot};
pub use types::{ConnectionId, DispatchReport, Payload, WsError};
