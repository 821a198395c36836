//! Session registry.
//!
//! One map owns every live session; two indexes point into it: the session
//! key `<name>_<peer_network_id>` of each created socket, and the name of
//! each listening session (what `bind` looks up through `peer_name`).
//! Removing a session drops every index entry that still points at it.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use crate::session::{Session, SocketId};

/// Where a listening session accepts connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ServerEntry {
    pub(crate) socket: SocketId,
    pub(crate) addr: SocketAddr,
}

#[derive(Default)]
pub(crate) struct Registry {
    sessions: HashMap<SocketId, Arc<Session>>,
    session_keys: HashMap<String, SocketId>,
    servers: HashMap<String, ServerEntry>,
}

pub(crate) fn session_key(name: &str, peer_network_id: &str) -> String {
    format!("{name}_{peer_network_id}")
}

impl Registry {
    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Register a created socket under its session key. A later socket with
    /// the same key takes the key over.
    pub(crate) fn insert(&mut self, session: Arc<Session>) {
        let key = session_key(&session.info.name, &session.info.peer_network_id);
        self.session_keys.insert(key, session.id);
        self.sessions.insert(session.id, session);
    }

    /// Register an accepted connection. It shares its listener's name, so it
    /// gets no key of its own.
    pub(crate) fn insert_accepted(&mut self, session: Arc<Session>) {
        self.sessions.insert(session.id, session);
    }

    pub(crate) fn get(&self, id: SocketId) -> Option<Arc<Session>> {
        self.sessions.get(&id).cloned()
    }

    pub(crate) fn by_key(&self, name: &str, peer_network_id: &str) -> Option<SocketId> {
        self.session_keys.get(&session_key(name, peer_network_id)).copied()
    }

    /// Claim `name` for a listening session. False if already claimed.
    pub(crate) fn add_server(&mut self, name: &str, entry: ServerEntry) -> bool {
        if self.servers.contains_key(name) {
            return false;
        }
        self.servers.insert(name.to_owned(), entry);
        true
    }

    pub(crate) fn server(&self, name: &str) -> Option<ServerEntry> {
        self.servers.get(name).copied()
    }

    /// Sessions accepted by `parent`.
    pub(crate) fn accepted_by(&self, parent: SocketId) -> Vec<SocketId> {
        let mut children: Vec<_> = self
            .sessions
            .values()
            .filter(|s| s.accepted_by == Some(parent))
            .map(|s| s.id)
            .collect();
        children.sort_unstable();
        children
    }

    pub(crate) fn remove(&mut self, id: SocketId) -> Option<Arc<Session>> {
        let session = self.sessions.remove(&id)?;
        self.session_keys.retain(|_, socket| *socket != id);
        self.servers.retain(|_, entry| entry.socket != id);
        Some(session)
    }

    /// Remove everything, returning the sessions in id order.
    pub(crate) fn drain(&mut self) -> Vec<Arc<Session>> {
        self.session_keys.clear();
        self.servers.clear();
        let mut sessions: Vec<_> = self.sessions.drain().map(|(_, s)| s).collect();
        sessions.sort_unstable_by_key(|s| s.id);
        sessions
    }
}
