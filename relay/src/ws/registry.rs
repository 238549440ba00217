//! Authoritative set of open connections.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::infrastructure::metrics;
use crate::ws::connection::{Connection, ConnectionState};
use crate::ws::types::{ConnectionId, WsError};

/// Point-in-time copy of the registry, safe to iterate while the registry
/// keeps changing.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    connections: Vec<Arc<Connection>>,
}

impl Snapshot {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Connection>> {
        self.connections.iter()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.iter().any(|c| c.id() == id)
    }
}

#[derive(Default)]
pub struct Registry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection and marks it `Open`.
    ///
    /// A colliding identifier leaves the existing entry untouched and is
    /// reported as an error; only that registration attempt fails.
    pub fn register(&self, connection: Arc<Connection>) -> Result<(), WsError> {
        let id = connection.id().clone();
        let open = {
            let mut connections = self.connections.write();
            match connections.entry(id.clone()) {
                Entry::Occupied(_) => {
                    error!(connection_id = %id, "Duplicate connection id rejected");
                    return Err(WsError::DuplicateConnection(id));
                }
                Entry::Vacant(entry) => {
                    connection.transition(ConnectionState::Open);
                    entry.insert(connection);
                }
            }
            // Recorded under the lock so the gauge follows mutation order.
            metrics::connection_opened(connections.len());
            connections.len()
        };

        debug!(connection_id = %id, open, "Connection registered");
        Ok(())
    }

    /// Removes a connection and marks it `Closed`. Unknown ids are ignored so
    /// duplicate close signals are harmless.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let (removed, open) = {
            let mut connections = self.connections.write();
            let removed = connections.remove(id)?;
            metrics::connection_closed(connections.len());
            (removed, connections.len())
        };

        removed.transition(ConnectionState::Closed);
        debug!(connection_id = %id, open, "Connection unregistered");
        Some(removed)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            connections: self.connections.read().values().cloned().collect(),
        }
    }

    #[cfg(test)]
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Asks every registered connection to close. Entries are removed by
    /// their own handlers once the socket is gone.
    pub fn close_all(&self) -> usize {
        let snapshot = self.snapshot();
        for connection in snapshot.iter() {
            connection.request_close();
        }
        snapshot.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn connection() -> Arc<Connection> {
        let (conn, _rx) = Connection::new(ConnectionId::new(), 8);
        Arc::new(conn)
    }

    #[test]
    fn register_opens_and_unregister_closes() {
        let registry = Registry::new();
        let conn = connection();
        assert_eq!(conn.state(), ConnectionState::Connecting);

        registry.register(Arc::clone(&conn)).unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(registry.len(), 1);

        let removed = registry.unregister(conn.id()).unwrap();
        assert_eq!(removed.state(), ConnectionState::Closed);
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_id_is_rejected_without_replacing() {
        let registry = Registry::new();
        let id = ConnectionId::from("conn_fixed".to_string());
        let (first, _rx1) = Connection::new(id.clone(), 8);
        let (second, _rx2) = Connection::new(id.clone(), 8);
        let first = Arc::new(first);
        let second = Arc::new(second);

        registry.register(Arc::clone(&first)).unwrap();
        let err = registry.register(Arc::clone(&second)).unwrap_err();

        assert_eq!(err, WsError::DuplicateConnection(id.clone()));
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get(&id).unwrap(), &first));
        assert_eq!(second.state(), ConnectionState::Connecting);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let registry = Registry::new();
        let conn = connection();
        registry.register(Arc::clone(&conn)).unwrap();

        assert!(registry.unregister(conn.id()).is_some());
        assert!(registry.unregister(conn.id()).is_none());
        assert!(registry.unregister(&ConnectionId::new()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let registry = Registry::new();
        let a = connection();
        let b = connection();
        registry.register(Arc::clone(&a)).unwrap();
        registry.register(Arc::clone(&b)).unwrap();

        let snapshot = registry.snapshot();
        registry.unregister(a.id());
        registry.register(connection()).unwrap();

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(a.id()));
        assert!(snapshot.contains(b.id()));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn close_all_moves_every_connection_to_closing() {
        let registry = Registry::new();
        let conns: Vec<_> = (0..3).map(|_| connection()).collect();
        for conn in &conns {
            registry.register(Arc::clone(conn)).unwrap();
        }

        assert_eq!(registry.close_all(), 3);
        for conn in &conns {
            assert_eq!(conn.state(), ConnectionState::Closing);
        }
        // Handlers own removal.
        assert_eq!(registry.len(), 3);
    }

    mod gauge {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU64, Ordering};

        use ::metrics::{
            Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
        };

        use crate::infrastructure::metrics::CONNECTIONS_OPEN;

        /// Captures only the open-connections gauge.
        #[derive(Default)]
        pub struct OpenConnections(Arc<AtomicU64>);

        impl OpenConnections {
            pub fn value(&self) -> f64 {
                f64::from_bits(self.0.load(Ordering::SeqCst))
            }
        }

        impl Recorder for OpenConnections {
            fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
            fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
            fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

            fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> Counter {
                Counter::noop()
            }

            fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
                if key.name() == CONNECTIONS_OPEN {
                    Gauge::from_arc(Arc::clone(&self.0))
                } else {
                    Gauge::noop()
                }
            }

            fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
                Histogram::noop()
            }
        }
    }

    #[test]
    fn open_gauge_tracks_registry_size() {
        let recorder = gauge::OpenConnections::default();
        ::metrics::with_local_recorder(&recorder, || {
            let registry = Registry::new();
            let conns: Vec<_> = (0..3).map(|_| connection()).collect();
            for conn in &conns {
                registry.register(Arc::clone(conn)).unwrap();
            }
            assert_eq!(recorder.value(), 3.0);

            registry.unregister(conns[0].id());
            registry.unregister(conns[0].id());
            assert_eq!(recorder.value(), 2.0);

            let (duplicate, _rx) = Connection::new(conns[1].id().clone(), 8);
            assert!(registry.register(Arc::new(duplicate)).is_err());
            assert_eq!(recorder.value(), registry.len() as f64);
        });
    }

    proptest! {
        #[test]
        fn size_is_connects_minus_disconnects(k in 0usize..40, j_seed in 0usize..40) {
            let j = j_seed % (k + 1);
            let registry = Registry::new();
            let conns: Vec<_> = (0..k).map(|_| connection()).collect();
            for conn in &conns {
                registry.register(Arc::clone(conn)).unwrap();
            }
            for conn in conns.iter().take(j) {
                registry.unregister(conn.id());
            }
            prop_assert_eq!(registry.len(), k - j);
        }
    }
}
