//! Live, newly-accepted, and recently-closed connections of one server

use crate::net::connection::{Connection, ConnectionId};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

/// Record of a connection the server removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedConnection {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
}

/// Connection bookkeeping shared between a server's tick and its owner.
///
/// Newly registered connections are handed out as `Weak` handles so a
/// holder never keeps a removed connection's socket alive.
pub struct Registry<S> {
    inner: Mutex<RegistryState<S>>,
}

struct RegistryState<S> {
    live: Vec<Arc<Connection<S>>>,
    fresh: Vec<Weak<Connection<S>>>,
    closed: Vec<ClosedConnection>,
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(RegistryState {
                live: Vec::new(),
                fresh: Vec::new(),
                closed: Vec::new(),
            }),
        }
    }
}

impl<S> Registry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add to the live set and the new-connection list.
    pub fn register(&self, conn: Arc<Connection<S>>) {
        let mut inner = self.inner.lock();
        inner.fresh.push(Arc::downgrade(&conn));
        inner.live.push(conn);
    }

    /// Drop `conn` from the live set and the new-connection list.
    /// Returns `false` if it was not live.
    pub fn remove(&self, conn: &Arc<Connection<S>>) -> bool {
        let mut inner = self.inner.lock();
        Self::remove_locked(&mut inner, conn)
    }

    /// Remove `conn` and record it as closed, atomically.
    pub fn retire(&self, conn: &Arc<Connection<S>>) -> bool {
        let mut inner = self.inner.lock();
        let removed = Self::remove_locked(&mut inner, conn);
        if removed {
            inner.closed.push(ClosedConnection {
                id: conn.id(),
                peer_addr: conn.peer_addr(),
            });
        }
        removed
    }

    fn remove_locked(inner: &mut RegistryState<S>, conn: &Arc<Connection<S>>) -> bool {
        let before = inner.live.len();
        inner.live.retain(|c| !Arc::ptr_eq(c, conn));
        inner
            .fresh
            .retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), Arc::as_ptr(conn)));
        inner.live.len() != before
    }

    /// Take connections registered since the last call.
    pub fn drain_new(&self) -> Vec<Weak<Connection<S>>> {
        let mut inner = self.inner.lock();
        let mut fresh = std::mem::take(&mut inner.fresh);
        fresh.retain(|w| w.strong_count() > 0);
        fresh
    }

    /// Take closed-connection records since the last call.
    pub fn drain_closed(&self) -> Vec<ClosedConnection> {
        std::mem::take(&mut self.inner.lock().closed)
    }

    /// Strong handles to every live connection, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<Connection<S>>> {
        self.inner.lock().live.clone()
    }

    /// Empty the live set, returning what it held. Nothing is recorded as closed.
    pub fn clear(&self) -> Vec<Arc<Connection<S>>> {
        let mut inner = self.inner.lock();
        inner.fresh.clear();
        std::mem::take(&mut inner.live)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().live.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Arc<Connection<S>>> {
        self.inner.lock().live.get(index).cloned()
    }

    pub fn find_by_id(&self, id: ConnectionId) -> Option<Arc<Connection<S>>> {
        self.inner.lock().live.iter().find(|c| c.id() == id).cloned()
    }

    /// First live connection whose peer uses `port`.
    pub fn find_by_port(&self, port: u16) -> Option<Arc<Connection<S>>> {
        self.inner
            .lock()
            .live
            .iter()
            .find(|c| c.port() == port)
            .cloned()
    }
}
