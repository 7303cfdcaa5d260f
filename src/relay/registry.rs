use crate::net::messages::Role;
use crate::net::tcp::ConnId;
use std::collections::HashMap;
use std::fmt;

// ── Session ─────────────────────────────────────────────────────────────────

/// One coordination unit: at most one host connection, any number of
/// clients, and the latest raw snapshot the host pushed (handed to clients
/// that join mid-session).
#[derive(Debug, Default)]
struct Session {
    host: Option<ConnId>,
    clients: Vec<ConnId>,
    cached_state: Option<String>,
}

impl Session {
    fn is_empty(&self) -> bool {
        self.host.is_none() && self.clients.is_empty()
    }
}

// ── Registry results ────────────────────────────────────────────────────────

/// A host claim was refused because the session already has a live host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostAlreadyExists;

impl fmt::Display for HostAlreadyExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session already has a host")
    }
}

impl std::error::Error for HostAlreadyExists {}

/// What [`SessionRegistry::unregister`] removed.
#[derive(Debug, PartialEq, Eq)]
pub enum Unregistered {
    /// The session's host left. Every listed client must be told exactly
    /// once that the host is gone.
    Host { notify: Vec<ConnId> },
    /// A client left; nothing to announce.
    Client,
    /// The connection was never registered (e.g. it closed before the
    /// role handshake finished).
    Unknown,
}

// ── SessionRegistry ─────────────────────────────────────────────────────────

/// Tracks which connection holds the host role and which are clients, per
/// session. Callers serialize access (the gateway runs a single event
/// loop and wraps the registry in a mutex), which is what makes the
/// one-host invariant hold under concurrent claims: whoever takes the
/// lock first wins, everyone after sees the occupied slot.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    conn_index: HashMap<ConnId, (String, Role)>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the host slot of `session` for `conn`. At most one live host
    /// per session, ever.
    pub fn try_register_host(
        &mut self,
        session: &str,
        conn: ConnId,
    ) -> Result<(), HostAlreadyExists> {
        let entry = self.sessions.entry(session.to_string()).or_default();
        if entry.host.is_some() {
            return Err(HostAlreadyExists);
        }
        entry.host = Some(conn);
        self.conn_index
            .insert(conn, (session.to_string(), Role::Host));
        Ok(())
    }

    /// Add `conn` as a client of `session`. Always succeeds; there is no
    /// client limit.
    pub fn register_client(&mut self, session: &str, conn: ConnId) {
        let entry = self.sessions.entry(session.to_string()).or_default();
        if !entry.clients.contains(&conn) {
            entry.clients.push(conn);
        }
        self.conn_index
            .insert(conn, (session.to_string(), Role::Client));
    }

    /// Remove `conn` from whichever slot holds it. When the host leaves,
    /// the session's cached snapshot is discarded and the remaining
    /// clients are returned as the notification obligation.
    pub fn unregister(&mut self, conn: ConnId) -> Unregistered {
        let (session_name, role) = match self.conn_index.remove(&conn) {
            Some(v) => v,
            None => return Unregistered::Unknown,
        };

        let Some(session) = self.sessions.get_mut(&session_name) else {
            return Unregistered::Unknown;
        };

        let result = match role {
            Role::Host => {
                session.host = None;
                session.cached_state = None;
                Unregistered::Host {
                    notify: session.clients.clone(),
                }
            }
            Role::Client => {
                session.clients.retain(|&c| c != conn);
                Unregistered::Client
            }
        };

        if session.is_empty() {
            self.sessions.remove(&session_name);
        }
        result
    }

    /// The connection currently holding the host role, if any.
    pub fn host_of(&self, session: &str) -> Option<ConnId> {
        self.sessions.get(session).and_then(|s| s.host)
    }

    /// All client connections of a session, in registration order.
    pub fn clients_of(&self, session: &str) -> Vec<ConnId> {
        self.sessions
            .get(session)
            .map(|s| s.clients.clone())
            .unwrap_or_default()
    }

    /// The registered role of a connection, if it finished the handshake.
    pub fn role_of(&self, conn: ConnId) -> Option<Role> {
        self.conn_index.get(&conn).map(|&(_, role)| role)
    }

    /// Remember the latest raw snapshot the session's host pushed.
    pub fn cache_state(&mut self, session: &str, raw: String) {
        if let Some(s) = self.sessions.get_mut(session) {
            s.cached_state = Some(raw);
        }
    }

    /// The cached snapshot, if the session has one.
    pub fn cached_state(&self, session: &str) -> Option<&str> {
        self.sessions
            .get(session)
            .and_then(|s| s.cached_state.as_deref())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    const S: &str = "main";

    #[test]
    fn first_host_claim_wins_second_is_rejected() {
        let mut reg = SessionRegistry::new();
        assert!(reg.try_register_host(S, 1).is_ok());
        assert_eq!(reg.try_register_host(S, 2), Err(HostAlreadyExists));
        assert_eq!(reg.host_of(S), Some(1));
    }

    #[test]
    fn host_slot_reopens_after_host_leaves() {
        let mut reg = SessionRegistry::new();
        reg.try_register_host(S, 1).unwrap();
        assert_eq!(reg.unregister(1), Unregistered::Host { notify: vec![] });
        assert_eq!(reg.host_of(S), None);
        assert!(reg.try_register_host(S, 2).is_ok());
    }

    #[test]
    fn clients_are_unlimited() {
        let mut reg = SessionRegistry::new();
        for conn in 1..=100 {
            reg.register_client(S, conn);
        }
        assert_eq!(reg.clients_of(S).len(), 100);
    }

    #[test]
    fn host_departure_reports_every_client_exactly_once() {
        let mut reg = SessionRegistry::new();
        reg.try_register_host(S, 1).unwrap();
        reg.register_client(S, 2);
        reg.register_client(S, 3);

        match reg.unregister(1) {
            Unregistered::Host { notify } => assert_eq!(notify, vec![2, 3]),
            other => panic!("expected Host, got {other:?}"),
        }

        // A second unregister of the same connection reports nothing.
        assert_eq!(reg.unregister(1), Unregistered::Unknown);
    }

    #[test]
    fn client_departure_is_silent() {
        let mut reg = SessionRegistry::new();
        reg.try_register_host(S, 1).unwrap();
        reg.register_client(S, 2);
        assert_eq!(reg.unregister(2), Unregistered::Client);
        assert!(reg.clients_of(S).is_empty());
        assert_eq!(reg.host_of(S), Some(1));
    }

    #[test]
    fn unknown_connection_unregisters_as_unknown() {
        let mut reg = SessionRegistry::new();
        assert_eq!(reg.unregister(42), Unregistered::Unknown);
    }

    #[test]
    fn cached_state_survives_client_churn_but_not_host_loss() {
        let mut reg = SessionRegistry::new();
        reg.try_register_host(S, 1).unwrap();
        reg.register_client(S, 2);
        reg.cache_state(S, "{\"clef\":\"treble\"}".to_string());

        reg.unregister(2);
        assert_eq!(reg.cached_state(S), Some("{\"clef\":\"treble\"}"));

        reg.unregister(1);
        assert_eq!(reg.cached_state(S), None);
    }

    #[test]
    fn sessions_are_independent() {
        let mut reg = SessionRegistry::new();
        reg.try_register_host("a", 1).unwrap();
        assert!(reg.try_register_host("b", 2).is_ok());
        assert_eq!(reg.host_of("a"), Some(1));
        assert_eq!(reg.host_of("b"), Some(2));
    }

    #[test]
    fn roles_are_tracked_per_connection() {
        let mut reg = SessionRegistry::new();
        reg.try_register_host(S, 1).unwrap();
        reg.register_client(S, 2);
        assert_eq!(reg.role_of(1), Some(Role::Host));
        assert_eq!(reg.role_of(2), Some(Role::Client));
        assert_eq!(reg.role_of(3), None);
    }

    /// Spec-level property: under concurrent host claims, exactly one
    /// succeeds and all others are rejected.
    #[tokio::test]
    async fn concurrent_host_claims_yield_exactly_one_winner() {
        let reg = Arc::new(Mutex::new(SessionRegistry::new()));

        let mut handles = Vec::new();
        for conn in 1..=32u32 {
            let reg = reg.clone();
            handles.push(tokio::spawn(async move {
                reg.lock().try_register_host(S, conn).is_ok()
            }));
        }

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(reg.lock().host_of(S).is_some());
    }
}
