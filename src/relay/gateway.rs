use crate::net::messages::{ControlMessage, Hello, Role, TrainerState};
use crate::net::tcp::{ConnEvent, ConnId, TcpServer};
use crate::relay::registry::{SessionRegistry, Unregistered};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

// ── Constants ───────────────────────────────────────────────────────────────

/// The session every connection of a relay instance lands in. The registry
/// is session-scoped, but one relay currently serves one session; the
/// trainer has no notion of picking a room.
const SESSION_NAME: &str = "main";

// ── Relay ───────────────────────────────────────────────────────────────────

/// The relay server: accepts participants, arbitrates the host role, and
/// fans host snapshots out to clients.
///
/// All registry mutations happen on one event-loop task, in connection
/// event order, so concurrent claims and disconnects cannot interleave.
pub struct Relay {
    server: Arc<TcpServer>,
    registry: Arc<Mutex<SessionRegistry>>,
    event_loop: tokio::task::JoinHandle<()>,
}

impl Relay {
    /// Bind `addr` and start serving. Port 0 picks an ephemeral port.
    pub async fn start(addr: SocketAddr) -> Result<Self, std::io::Error> {
        let (event_tx, event_rx) = mpsc::channel::<ConnEvent>(128);
        let server = Arc::new(TcpServer::bind(addr, event_tx).await?);
        let registry = Arc::new(Mutex::new(SessionRegistry::new()));

        let event_loop = tokio::spawn(run_event_loop(
            event_rx,
            server.clone(),
            registry.clone(),
        ));

        Ok(Self {
            server,
            registry,
            event_loop,
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Direct registry access, for inspection.
    pub fn registry(&self) -> Arc<Mutex<SessionRegistry>> {
        self.registry.clone()
    }

    /// Stop accepting and drop every connection.
    pub fn shutdown(&self) {
        log::info!("Relay shutting down");
        self.event_loop.abort();
        self.server.shutdown();
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Event loop ──────────────────────────────────────────────────────────────

async fn run_event_loop(
    mut event_rx: mpsc::Receiver<ConnEvent>,
    server: Arc<TcpServer>,
    registry: Arc<Mutex<SessionRegistry>>,
) {
    // Connections that opened but have not sent their role yet.
    let mut awaiting_role: HashSet<ConnId> = HashSet::new();

    while let Some(event) = event_rx.recv().await {
        match event {
            ConnEvent::Opened { conn, .. } => {
                awaiting_role.insert(conn);
            }

            ConnEvent::Frame { conn, text } => {
                if awaiting_role.remove(&conn) {
                    handle_role_claim(conn, &text, &server, &registry).await;
                } else {
                    handle_session_frame(conn, text, &server, &registry).await;
                }
            }

            ConnEvent::Closed { conn, reason } => {
                awaiting_role.remove(&conn);
                let outcome = registry.lock().unregister(conn);
                match outcome {
                    Unregistered::Host { notify } => {
                        log::info!(
                            "Host (connection {conn}) left: {reason}; notifying {} client(s)",
                            notify.len()
                        );
                        if let Ok(msg) = serde_json::to_string(&ControlMessage::HostDisconnected) {
                            server.send_to_each(&notify, &msg).await;
                        }
                    }
                    Unregistered::Client => {
                        log::info!("Client (connection {conn}) left: {reason}");
                    }
                    Unregistered::Unknown => {
                        log::debug!("Connection {conn} closed before the role handshake");
                    }
                }
            }
        }
    }
    log::debug!("Relay event loop exiting");
}

/// First frame of a connection: `{"role":"host"|"client"}`.
///
/// Anything that does not parse closes the connection with no registry
/// mutation and no error frame.
async fn handle_role_claim(
    conn: ConnId,
    text: &str,
    server: &TcpServer,
    registry: &Mutex<SessionRegistry>,
) {
    let hello: Hello = match serde_json::from_str(text) {
        Ok(h) => h,
        Err(e) => {
            log::warn!("Connection {conn}: malformed role handshake ({e}); closing");
            server.close(conn);
            return;
        }
    };

    match hello.role {
        Role::Host => {
            let accepted = registry.lock().try_register_host(SESSION_NAME, conn).is_ok();
            if accepted {
                log::info!("Connection {conn} registered as host");
            } else {
                log::info!("Connection {conn} denied host role: session already has one");
                if let Ok(msg) = serde_json::to_string(&ControlMessage::host_already_exists()) {
                    server.send(conn, &msg).await;
                }
                server.close(conn);
            }
        }
        Role::Client => {
            // Register, then hand over the current state so a late joiner
            // doesn't stare at an empty staff until the next broadcast.
            let snapshot = {
                let mut reg = registry.lock();
                reg.register_client(SESSION_NAME, conn);
                if reg.host_of(SESSION_NAME).is_some() {
                    reg.cached_state(SESSION_NAME).map(str::to_string)
                } else {
                    None
                }
            };
            log::info!("Connection {conn} registered as client");
            if let Some(snapshot) = snapshot {
                server.send(conn, &snapshot).await;
            }
        }
    }
}

/// A frame after the handshake. Host frames that parse as a snapshot are
/// relayed verbatim, in arrival order, to every client; everything else is
/// dropped.
async fn handle_session_frame(
    conn: ConnId,
    text: String,
    server: &TcpServer,
    registry: &Mutex<SessionRegistry>,
) {
    let (from_host, clients) = {
        let reg = registry.lock();
        (
            reg.host_of(SESSION_NAME) == Some(conn),
            reg.clients_of(SESSION_NAME),
        )
    };

    if !from_host {
        // Clients are read-only participants; they have nothing to say.
        log::debug!("Ignoring frame from client connection {conn}");
        return;
    }

    if let Err(e) = serde_json::from_str::<TrainerState>(&text) {
        log::warn!("Dropping unparseable state frame from host: {e}");
        return;
    }

    registry.lock().cache_state(SESSION_NAME, text.clone());
    server.send_to_each(&clients, &text).await;
}

// ── Tests ───────────────────────────────────────────────────────────────────
