//! i3 (and sway) IPC over the window manager's unix socket.
//!
//! Every message is framed as:
//!
//! ```text
//! "i3-ipc" | u32 payload length | u32 message type | JSON payload
//! ```
//!
//! with integers in native byte order. Events share the framing and have
//! the high bit of the type set.

use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use super::{
    ChangeEvent, ChangeKind, Entity, EventSource, EventStream, IpcError, OutputInfo, Snapshot,
    Subject, WorkspaceInfo,
};

pub const MAGIC: &[u8; 6] = b"i3-ipc";
pub const HEADER_LEN: usize = 14;
const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    GetWorkspaces = 1,
    Subscribe = 2,
    GetOutputs = 3,
    GetTree = 4,
}

pub const EVENT_WORKSPACE: u32 = 0x8000_0000;
pub const EVENT_WINDOW: u32 = 0x8000_0003;
pub const EVENT_SHUTDOWN: u32 = 0x8000_0006;

const SUBSCRIPTIONS: &str = r#"["workspace","window","shutdown"]"#;

pub fn encode(msg_type: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&(payload.len() as u32).to_ne_bytes());
    buf.extend_from_slice(&msg_type.to_ne_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Returns `(payload length, message type)`.
pub fn decode_header(header: &[u8; HEADER_LEN]) -> Result<(usize, u32), IpcError> {
    if &header[..6] != MAGIC {
        return Err(IpcError::Protocol("bad magic".into()));
    }
    let len = u32::from_ne_bytes([header[6], header[7], header[8], header[9]]) as usize;
    let msg_type = u32::from_ne_bytes([header[10], header[11], header[12], header[13]]);
    if len > MAX_PAYLOAD {
        return Err(IpcError::Protocol(format!("payload of {len} bytes")));
    }
    Ok((len, msg_type))
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Deserialize, Debug)]
struct RawWorkspace {
    id: i64,
    name: String,
    #[serde(default)]
    num: Option<i64>,
    output: String,
    #[serde(default)]
    focused: bool,
    #[serde(default)]
    urgent: bool,
}

#[derive(Deserialize, Debug)]
struct RawRect {
    x: i64,
    y: i64,
}

#[derive(Deserialize, Debug)]
struct RawOutput {
    name: String,
    #[serde(default)]
    active: bool,
    rect: RawRect,
}

#[derive(Deserialize, Debug, Default)]
struct RawNode {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    node_type: Option<String>,
    #[serde(default)]
    num: Option<i64>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    focused: bool,
    #[serde(default)]
    urgent: bool,
    #[serde(default)]
    nodes: Vec<RawNode>,
    #[serde(default)]
    floating_nodes: Vec<RawNode>,
}

impl RawNode {
    fn into_entity(self) -> Entity {
        Entity {
            id: self.id,
            label: self.name.unwrap_or_default(),
            // i3 reports -1 for named workspaces
            order: self.num.filter(|n| *n >= 0),
            output: self.output,
            focused: self.focused,
            urgent: self.urgent,
            empty: self.nodes.is_empty() && self.floating_nodes.is_empty(),
        }
    }

    fn find_focused(&self) -> Option<&RawNode> {
        if self.focused {
            return Some(self);
        }
        self.nodes
            .iter()
            .chain(self.floating_nodes.iter())
            .find_map(RawNode::find_focused)
    }
}

#[derive(Deserialize, Debug)]
struct WorkspacePayload {
    change: String,
    #[serde(default)]
    current: Option<RawNode>,
    #[serde(default)]
    old: Option<RawNode>,
}

#[derive(Deserialize, Debug)]
struct WindowPayload {
    change: String,
    container: RawNode,
}

#[derive(Deserialize, Debug)]
struct Reply {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// What an incoming message means to the event stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Incoming {
    Change(ChangeEvent),
    /// The window manager is restarting or exiting.
    Shutdown,
    Ignored,
}

pub fn translate(msg_type: u32, payload: &[u8]) -> Result<Incoming, IpcError> {
    match msg_type {
        EVENT_WORKSPACE => {
            let p: WorkspacePayload = serde_json::from_slice(payload)?;
            Ok(match ChangeKind::parse(&p.change) {
                Some(kind) => Incoming::Change(ChangeEvent {
                    subject: Subject::Workspace,
                    kind,
                    current: p.current.map(RawNode::into_entity),
                    old: p.old.map(RawNode::into_entity),
                }),
                None => Incoming::Ignored,
            })
        }
        EVENT_WINDOW => {
            let p: WindowPayload = serde_json::from_slice(payload)?;
            Ok(match ChangeKind::parse(&p.change) {
                Some(kind) => Incoming::Change(ChangeEvent {
                    subject: Subject::Window,
                    kind,
                    current: Some(p.container.into_entity()),
                    old: None,
                }),
                None => Incoming::Ignored,
            })
        }
        EVENT_SHUTDOWN => Ok(Incoming::Shutdown),
        _ => Ok(Incoming::Ignored),
    }
}

// ============================================================================
// Connection
// ============================================================================

struct Connection {
    stream: UnixStream,
}

impl Connection {
    async fn open(path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self { stream })
    }

    async fn send(&mut self, msg_type: MessageType, payload: &[u8]) -> Result<(), IpcError> {
        self.stream
            .write_all(&encode(msg_type as u32, payload))
            .await?;
        Ok(())
    }

    /// `Ok(None)` when the peer closed the socket between messages.
    async fn receive(&mut self) -> Result<Option<(u32, Vec<u8>)>, IpcError> {
        let mut header = [0u8; HEADER_LEN];
        match self.stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let (len, msg_type) = decode_header(&header)?;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;
        Ok(Some((msg_type, payload)))
    }

    /// Sends a request and waits for its reply, skipping interleaved events.
    async fn request(&mut self, msg_type: MessageType, payload: &[u8]) -> Result<Vec<u8>, IpcError> {
        self.send(msg_type, payload).await?;
        loop {
            match self.receive().await? {
                Some((t, reply)) if t == msg_type as u32 => return Ok(reply),
                Some((t, _)) => debug!("Skipping message type {t:#x} while awaiting reply"),
                None => return Err(IpcError::Protocol("connection closed before reply".into())),
            }
        }
    }
}

// ============================================================================
// Source
// ============================================================================

pub struct I3Source {
    socket: Option<PathBuf>,
}

impl I3Source {
    /// `socket = None` discovers the path on every connect.
    pub fn new(socket: Option<PathBuf>) -> Self {
        Self { socket }
    }

    async fn socket_path(&self) -> Result<PathBuf, IpcError> {
        if let Some(path) = &self.socket {
            return Ok(path.clone());
        }
        for var in ["I3SOCK", "SWAYSOCK"] {
            if let Ok(path) = std::env::var(var)
                && !path.is_empty()
            {
                return Ok(PathBuf::from(path));
            }
        }

        let output = tokio::process::Command::new("i3")
            .arg("--get-socketpath")
            .stderr(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| IpcError::SocketPath(format!("i3 --get-socketpath: {e}")))?;
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || path.is_empty() {
            return Err(IpcError::SocketPath("i3 --get-socketpath returned nothing".into()));
        }
        Ok(PathBuf::from(path))
    }
}

#[async_trait]
impl EventSource for I3Source {
    fn name(&self) -> &str {
        "i3"
    }

    async fn connect(&self) -> Result<Box<dyn EventStream>, IpcError> {
        let path = self.socket_path().await?;
        let mut conn = Connection::open(&path).await?;
        let reply = conn
            .request(MessageType::Subscribe, SUBSCRIPTIONS.as_bytes())
            .await?;
        let reply: Reply = serde_json::from_slice(&reply)?;
        if !reply.success {
            return Err(IpcError::Protocol(format!(
                "subscribe rejected: {}",
                reply.error.unwrap_or_default()
            )));
        }
        info!("Subscribed to i3 events on {}", path.display());
        Ok(Box::new(I3Stream { conn }))
    }

    async fn snapshot(&self) -> Result<Snapshot, IpcError> {
        let path = self.socket_path().await?;
        let mut conn = Connection::open(&path).await?;

        let workspaces: Vec<RawWorkspace> =
            serde_json::from_slice(&conn.request(MessageType::GetWorkspaces, b"").await?)?;
        let outputs: Vec<RawOutput> =
            serde_json::from_slice(&conn.request(MessageType::GetOutputs, b"").await?)?;
        let tree: RawNode = serde_json::from_slice(&conn.request(MessageType::GetTree, b"").await?)?;

        let focused_title = tree
            .find_focused()
            .filter(|n| n.node_type.as_deref() != Some("workspace"))
            .and_then(|n| n.name.clone());

        Ok(Snapshot {
            workspaces: workspaces
                .into_iter()
                .map(|w| WorkspaceInfo {
                    id: w.id,
                    name: w.name,
                    num: w.num.filter(|n| *n >= 0),
                    output: w.output,
                    focused: w.focused,
                    urgent: w.urgent,
                })
                .collect(),
            outputs: outputs
                .into_iter()
                .map(|o| OutputInfo {
                    name: o.name,
                    active: o.active,
                    x: o.rect.x,
                    y: o.rect.y,
                })
                .collect(),
            focused_title,
        })
    }
}

struct I3Stream {
    conn: Connection,
}

#[async_trait]
impl EventStream for I3Stream {
    async fn next_event(&mut self) -> Result<Option<ChangeEvent>, IpcError> {
        loop {
            let Some((msg_type, payload)) = self.conn.receive().await? else {
                return Ok(None);
            };
            match translate(msg_type, &payload)? {
                Incoming::Change(event) => return Ok(Some(event)),
                Incoming::Shutdown => {
                    info!("i3 is shutting down");
                    return Ok(None);
                }
                Incoming::Ignored => {}
            }
        }
    }
}
