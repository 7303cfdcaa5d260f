use crate::net::messages::{read_frame, write_frame, FrameError, ServerMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

// ── Constants ───────────────────────────────────────────────────────────────

/// Default TCP port for clefcast relays.
pub const DEFAULT_PORT: u16 = 17603;

/// Identifies one accepted connection for the lifetime of the relay.
pub type ConnId = u32;

// ── Server-side events ──────────────────────────────────────────────────────

/// Events produced by the connection fabric and consumed by the gateway.
#[derive(Debug)]
pub enum ConnEvent {
    /// A connection was accepted (no frame read yet).
    Opened { conn: ConnId, addr: SocketAddr },
    /// A text frame arrived on a connection.
    Frame { conn: ConnId, text: String },
    /// A connection went away (EOF, read error, or server shutdown).
    Closed { conn: ConnId, reason: String },
}

// ── TcpServer ───────────────────────────────────────────────────────────────

/// Relay-side TCP fabric: accepts connections, reads framed text into an
/// event channel, and writes frames back out on demand.
///
/// All protocol decisions live in the gateway; this layer only moves
/// frames.
pub struct TcpServer {
    connections: Arc<Mutex<HashMap<ConnId, OwnedWriteHalf>>>,
    local_addr: SocketAddr,
    accept_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TcpServer {
    /// Bind and start accepting. Events flow into `event_tx`. Binding port
    /// 0 picks an ephemeral port; see [`TcpServer::local_addr`].
    pub async fn bind(
        addr: SocketAddr,
        event_tx: mpsc::Sender<ConnEvent>,
    ) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Relay listening on {local_addr}");

        let connections: Arc<Mutex<HashMap<ConnId, OwnedWriteHalf>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let conns = connections.clone();
        let sd_tx = shutdown_tx.clone();

        let accept_handle = tokio::spawn(async move {
            let mut next_id: ConnId = 1;
            loop {
                let (stream, peer_addr) = match listener.accept().await {
                    Ok(v) => v,
                    Err(e) => {
                        log::error!("Accept error: {e}");
                        continue;
                    }
                };

                let conn = next_id;
                next_id += 1;
                log::info!("Connection {conn} opened from {peer_addr}");

                let (reader, writer) = stream.into_split();
                conns.lock().insert(conn, writer);

                let _ = event_tx
                    .send(ConnEvent::Opened {
                        conn,
                        addr: peer_addr,
                    })
                    .await;

                let ev_tx = event_tx.clone();
                let conns2 = conns.clone();
                let mut sd_rx = sd_tx.subscribe();

                tokio::spawn(async move {
                    let mut reader = reader;
                    let reason = loop {
                        tokio::select! {
                            result = read_frame(&mut reader) => {
                                match result {
                                    Ok(text) => {
                                        let _ = ev_tx.send(ConnEvent::Frame { conn, text }).await;
                                    }
                                    Err(e) if e.is_eof() => break "closed".to_string(),
                                    Err(e) => break format!("read error: {e}"),
                                }
                            }
                            _ = sd_rx.recv() => break "server shutdown".to_string(),
                        }
                    };

                    conns2.lock().remove(&conn);
                    let _ = ev_tx.send(ConnEvent::Closed { conn, reason }).await;
                });
            }
        });

        Ok(Self {
            connections,
            local_addr,
            accept_handle: Mutex::new(Some(accept_handle)),
            shutdown_tx,
        })
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Write one frame to a connection. Returns false if the connection is
    /// gone or the write failed (the connection is dropped in that case).
    pub async fn send(&self, conn: ConnId, text: &str) -> bool {
        // Take the writer out briefly: we need &mut and must not hold the
        // lock across an await.
        let mut writer = match self.connections.lock().remove(&conn) {
            Some(w) => w,
            None => return false,
        };

        match write_frame(&mut writer, text).await {
            Ok(()) => {
                self.connections.lock().insert(conn, writer);
                true
            }
            Err(e) => {
                log::info!("Dropping connection {conn} after failed send: {e}");
                false
            }
        }
    }

    /// Write the same frame to each listed connection, in order.
    pub async fn send_to_each(&self, conns: &[ConnId], text: &str) {
        for &conn in conns {
            self.send(conn, text).await;
        }
    }

    /// Close a connection from the server side. Dropping the write half
    /// shuts it down, so the far end sees EOF.
    pub fn close(&self, conn: ConnId) {
        if self.connections.lock().remove(&conn).is_some() {
            log::info!("Connection {conn} closed by relay");
        }
    }

    /// Stop accepting, signal reader tasks, and close every connection.
    pub fn shutdown(&self) {
        if let Some(handle) = self.accept_handle.lock().take() {
            handle.abort();
        }
        let _ = self.shutdown_tx.send(());
        let mut map = self.connections.lock();
        for (conn, _writer) in map.drain() {
            log::debug!("Connection {conn} closed (relay shutdown)");
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Participant-side events ─────────────────────────────────────────────────

/// Events produced by a participant's link to the relay.
#[derive(Debug)]
pub enum LinkEvent {
    /// A parsed frame from the relay. Unparseable frames are logged and
    /// dropped before reaching this channel.
    Message(ServerMessage),
    /// The connection closed without us asking for it.
    Lost { reason: String },
}

// ── TcpLink ─────────────────────────────────────────────────────────────────

/// Participant-side connection: a reader task that parses incoming frames
/// and a writer task fed through a channel, so any number of components
/// can hold a cheap sending handle.
pub struct TcpLink {
    outgoing: mpsc::UnboundedSender<String>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TcpLink {
    /// Connect to a relay and start the reader/writer tasks. Incoming
    /// messages flow into `event_tx`.
    ///
    /// A deliberate [`TcpLink::close`] never emits [`LinkEvent::Lost`];
    /// only a close the participant did not ask for does.
    pub async fn connect(
        addr: SocketAddr,
        event_tx: mpsc::Sender<LinkEvent>,
    ) -> Result<Self, std::io::Error> {
        let stream = TcpStream::connect(addr).await?;
        log::info!("Connected to relay at {addr}");

        let (reader, mut writer) = stream.into_split();
        let (shutdown_tx, mut sd_rx) = broadcast::channel::<()>(1);
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();

        // Writer task: drain the outgoing channel into frames until the
        // link closes, then shut the write half down so the relay sees
        // EOF promptly.
        let mut writer_sd_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    text = outgoing_rx.recv() => match text {
                        Some(text) => {
                            if let Err(e) = write_frame(&mut writer, &text).await {
                                log::info!("Send to relay failed: {e}");
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = writer_sd_rx.recv() => break,
                }
            }
            let _ = writer.shutdown().await;
        });

        // Reader task: parse frames, drop garbage, report unexpected loss.
        tokio::spawn(async move {
            let mut reader = reader;
            loop {
                tokio::select! {
                    result = read_frame(&mut reader) => {
                        match result {
                            Ok(text) => match serde_json::from_str::<ServerMessage>(&text) {
                                Ok(msg) => {
                                    let _ = event_tx.send(LinkEvent::Message(msg)).await;
                                }
                                Err(e) => {
                                    log::warn!("Dropping unparseable frame from relay: {e}");
                                }
                            },
                            Err(e) => {
                                let reason = describe_loss(&e);
                                let _ = event_tx.send(LinkEvent::Lost { reason }).await;
                                return;
                            }
                        }
                    }
                    _ = sd_rx.recv() => {
                        log::debug!("Link reader: deliberate close");
                        return;
                    }
                }
            }
        });

        Ok(Self {
            outgoing,
            shutdown_tx,
        })
    }

    /// A cheap handle for sending raw frames on this link.
    pub fn sender(&self) -> mpsc::UnboundedSender<String> {
        self.outgoing.clone()
    }

    /// Serialize `value` and queue it for sending. Returns false once the
    /// link is down.
    pub fn send_json<T: serde::Serialize>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(text) => self.outgoing.send(text).is_ok(),
            Err(e) => {
                log::error!("Failed to serialize outgoing message: {e}");
                false
            }
        }
    }

    /// Deliberately close the link. Suppresses the `Lost` event.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn describe_loss(e: &FrameError) -> String {
    if e.is_eof() {
        "connection closed".to_string()
    } else {
        format!("read error: {e}")
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
