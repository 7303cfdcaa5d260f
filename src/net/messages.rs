use crate::trainer::note::{Clef, Pitch};
use crate::trainer::settings::TrainerSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// ── Roles ───────────────────────────────────────────────────────────────────

/// The role a participant declares in its first frame. Fixed for the
/// lifetime of the connection; changing role means reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => write!(f, "host"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// First frame on every connection: `{"role":"host"}` or
/// `{"role":"client"}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Hello {
    pub role: Role,
}

// ── Shared trainer state ────────────────────────────────────────────────────

/// Running answer counters. Accuracy is derived, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub correct: u32,
    pub wrong: u32,
    pub streak: u32,
}

impl Stats {
    /// Percentage of correct answers, 0 when nothing has been answered.
    pub fn accuracy_pct(&self) -> u32 {
        let total = self.correct + self.wrong;
        if total == 0 {
            0
        } else {
            (self.correct * 100 + total / 2) / total
        }
    }
}

/// The complete synchronized state of a trainer session.
///
/// Created and mutated exclusively on the host side; broadcast as a full
/// snapshot after every mutation and replaced wholesale on clients. No
/// deltas, no merging: applying a snapshot is idempotent and missed
/// intermediate snapshots are harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainerState {
    pub clef: Clef,
    pub note: Option<Pitch>,
    pub last_wrong_note: Option<Pitch>,
    pub stats: Stats,
    pub settings: TrainerSettings,
}

impl TrainerState {
    pub fn new(settings: TrainerSettings) -> Self {
        Self {
            clef: Clef::Treble,
            note: None,
            last_wrong_note: None,
            stats: Stats::default(),
            settings,
        }
    }
}

// ── Server messages ─────────────────────────────────────────────────────────

/// Error code sent to a host claimant when the session already has one.
pub const HOST_ALREADY_EXISTS: &str = "HostAlreadyExists";

/// Control frames originated by the relay itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Terminal for the receiving connection.
    #[serde(rename = "ERROR")]
    Error { message: String },
    /// The session's host went away; clients restart role arbitration.
    #[serde(rename = "HOST_DISCONNECTED")]
    HostDisconnected,
}

impl ControlMessage {
    pub fn host_already_exists() -> Self {
        ControlMessage::Error {
            message: HOST_ALREADY_EXISTS.to_string(),
        }
    }
}

/// Anything a participant can receive: a relay control frame, or a state
/// snapshot relayed verbatim from the host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Control(ControlMessage),
    State(TrainerState),
}

// ── Frame codec ─────────────────────────────────────────────────────────────
//
// Wire format: [length: u32 LE][UTF-8 JSON payload]
//
// The relay forwards host snapshots as the original payload text, so the
// codec works on strings; typed encode/decode sits on top.

/// Maximum frame size: 64 KiB. Snapshots are a few hundred bytes; anything
/// near this limit is garbage.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Write one length-prefixed text frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    text: &str,
) -> Result<(), FrameError> {
    let len = text.len() as u32;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(len));
    }
    writer.write_all(&len.to_le_bytes()).await.map_err(FrameError::Io)?;
    writer.write_all(text.as_bytes()).await.map_err(FrameError::Io)?;
    writer.flush().await.map_err(FrameError::Io)?;
    Ok(())
}

/// Read one length-prefixed text frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(FrameError::Io)?;
    let len = u32::from_le_bytes(len_buf);

    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(FrameError::Io)?;
    String::from_utf8(payload).map_err(FrameError::Utf8)
}

/// Serialize `value` as JSON and write it as one frame.
pub async fn write_json<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<(), FrameError> {
    let text = serde_json::to_string(value).map_err(FrameError::Json)?;
    write_frame(writer, &text).await
}

/// Errors from the frame codec.
#[derive(Debug)]
pub enum FrameError {
    Io(std::io::Error),
    FrameTooLarge(u32),
    Utf8(std::string::FromUtf8Error),
    Json(serde_json::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::FrameTooLarge(sz) => write!(f, "frame too large: {sz} bytes"),
            Self::Utf8(e) => write!(f, "frame is not UTF-8: {e}"),
            Self::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for FrameError {}

impl FrameError {
    /// True when the error is a clean end-of-stream rather than garbage.
    pub fn is_eof(&self) -> bool {
        matches!(self, FrameError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
