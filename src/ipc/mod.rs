//! # Window Manager Events
//!
//! Translates a foreign notification stream into typed `ChangeEvent`s and
//! fans them out to listening slices.
//!
//! ```text
//!  EventSource ──connect()──► EventStream ──next_event()──► EventHub
//!                                                            │ dispatch
//!                                 ┌──────────────────────────┼─────────┐
//!                                 ▼                          ▼         ▼
//!                          i3ws listener             i3title listener ...
//!                          (workspace: focus,        (window: focus,
//!                           init, empty, ...)         title, close, ...)
//! ```
//!
//! The hub is constructed once and shared (`Arc`) by every slice that
//! needs it. Its connection runs in its own task; callbacks only queue
//! edits, they never render.

pub mod i3;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::slices::SliceContext;

// ============================================================================
// Event Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    Workspace,
    Window,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Focus,
    /// Workspace init or window creation.
    Init,
    /// Workspace became empty and was destroyed.
    Empty,
    Close,
    Move,
    Title,
    Urgent,
}

impl ChangeKind {
    pub fn parse(change: &str) -> Option<Self> {
        match change {
            "focus" => Some(ChangeKind::Focus),
            "init" | "new" => Some(ChangeKind::Init),
            "empty" => Some(ChangeKind::Empty),
            "close" => Some(ChangeKind::Close),
            "move" => Some(ChangeKind::Move),
            "title" => Some(ChangeKind::Title),
            "urgent" => Some(ChangeKind::Urgent),
            _ => None,
        }
    }
}

/// A workspace or window as seen in an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entity {
    pub id: i64,
    pub label: String,
    /// Ordering hint (the workspace number), if any.
    pub order: Option<i64>,
    pub output: Option<String>,
    pub focused: bool,
    pub urgent: bool,
    /// No child windows.
    pub empty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub subject: Subject,
    pub kind: ChangeKind,
    pub current: Option<Entity>,
    pub old: Option<Entity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub id: i64,
    pub name: String,
    pub num: Option<i64>,
    pub output: String,
    pub focused: bool,
    pub urgent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    pub name: String,
    pub active: bool,
    pub x: i64,
    pub y: i64,
}

/// Current window manager state, for initial population.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub workspaces: Vec<WorkspaceInfo>,
    pub outputs: Vec<OutputInfo>,
    pub focused_title: Option<String>,
}

impl Snapshot {
    /// Active outputs in display order (top-to-bottom, then left-to-right).
    pub fn ordered_outputs(&self) -> Vec<&OutputInfo> {
        let mut active: Vec<&OutputInfo> = self.outputs.iter().filter(|o| o.active).collect();
        active.sort_by_key(|o| (o.y, o.x));
        active
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum IpcError {
    /// No socket path could be determined.
    SocketPath(String),
    Io(std::io::Error),
    Protocol(String),
    Json(serde_json::Error),
    Exhausted { attempts: u32, last: Box<IpcError> },
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpcError::SocketPath(msg) => write!(f, "cannot locate IPC socket: {msg}"),
            IpcError::Io(e) => write!(f, "IPC I/O error: {e}"),
            IpcError::Protocol(msg) => write!(f, "IPC protocol error: {msg}"),
            IpcError::Json(e) => write!(f, "IPC payload error: {e}"),
            IpcError::Exhausted { attempts, last } => {
                write!(f, "IPC connection lost after {attempts} attempts: {last}")
            }
        }
    }
}

impl std::error::Error for IpcError {}

impl From<std::io::Error> for IpcError {
    fn from(e: std::io::Error) -> Self {
        IpcError::Io(e)
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(e: serde_json::Error) -> Self {
        IpcError::Json(e)
    }
}

// ============================================================================
// Source Traits
// ============================================================================

#[async_trait]
pub trait EventSource: Send + Sync {
    fn name(&self) -> &str;

    /// Opens a subscribed event connection.
    async fn connect(&self) -> Result<Box<dyn EventStream>, IpcError>;

    /// Queries the current state over a short-lived connection.
    async fn snapshot(&self) -> Result<Snapshot, IpcError>;
}

#[async_trait]
pub trait EventStream: Send {
    /// Next translated event; `Ok(None)` means the connection ended.
    async fn next_event(&mut self) -> Result<Option<ChangeEvent>, IpcError>;
}

// ============================================================================
// Hub
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: crate::core::config::DEFAULT_IPC_RETRIES,
            backoff: Duration::from_millis(crate::core::config::DEFAULT_IPC_RETRY_BACKOFF_MS),
        }
    }
}

pub type Callback = Box<dyn FnMut(&ChangeEvent) + Send>;

struct Listener {
    subject: Subject,
    kinds: Vec<ChangeKind>,
    callback: Callback,
}

impl Listener {
    fn matches(&self, event: &ChangeEvent) -> bool {
        self.subject == event.subject && self.kinds.contains(&event.kind)
    }
}

type Listeners = Arc<Mutex<Vec<Listener>>>;

pub struct EventHub {
    source: Arc<dyn EventSource>,
    retry: RetryPolicy,
    listeners: Listeners,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventHub {
    pub fn new(source: Arc<dyn EventSource>, retry: RetryPolicy) -> Self {
        Self {
            source,
            retry,
            listeners: Arc::new(Mutex::new(Vec::new())),
            task: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &Arc<dyn EventSource> {
        &self.source
    }

    pub async fn snapshot(&self) -> Result<Snapshot, IpcError> {
        self.source.snapshot().await
    }

    /// Calls `callback` for every `subject` event whose kind is in `kinds`.
    pub fn register_listener(
        &self,
        subject: Subject,
        kinds: &[ChangeKind],
        callback: impl FnMut(&ChangeEvent) + Send + 'static,
    ) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(Listener {
                subject,
                kinds: kinds.to_vec(),
                callback: Box::new(callback),
            });
        }
    }

    /// Starts the connection task if it isn't running yet. Retry
    /// exhaustion is reported through `ctx` as a fatal error.
    pub fn ensure_started(&self, ctx: SliceContext) {
        let Ok(mut task) = self.task.lock() else {
            return;
        };
        if task.is_some() {
            return;
        }

        let source = self.source.clone();
        let listeners = self.listeners.clone();
        let retry = self.retry;
        info!("Starting {} event connection", source.name());
        *task = Some(tokio::spawn(async move {
            let err = run_connection(source.as_ref(), &listeners, retry).await;
            error!("{} event connection failed: {}", source.name(), err);
            ctx.fatal(err);
        }));
    }

    pub fn stop(&self) {
        if let Ok(mut task) = self.task.lock()
            && let Some(handle) = task.take()
        {
            debug!("Stopping {} event connection", self.source.name());
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|t| t.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for EventHub {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch(listeners: &Listeners, event: &ChangeEvent) {
    let Ok(mut listeners) = listeners.lock() else {
        return;
    };
    for listener in listeners.iter_mut().filter(|l| l.matches(event)) {
        (listener.callback)(event);
    }
}

/// Runs until reconnection is exhausted; the returned error is fatal.
async fn run_connection(
    source: &dyn EventSource,
    listeners: &Listeners,
    retry: RetryPolicy,
) -> IpcError {
    loop {
        let mut stream = match connect_with_retry(source, retry).await {
            Ok(stream) => stream,
            Err(e) => return e,
        };
        info!("Connected to {}", source.name());

        loop {
            match stream.next_event().await {
                Ok(Some(event)) => {
                    debug!("{} event: {:?} {:?}", source.name(), event.subject, event.kind);
                    dispatch(listeners, &event);
                }
                Ok(None) => {
                    warn!("{} connection closed, reconnecting", source.name());
                    break;
                }
                Err(e) => {
                    warn!("{} connection error: {}, reconnecting", source.name(), e);
                    break;
                }
            }
        }
        tokio::time::sleep(retry.backoff).await;
    }
}

async fn connect_with_retry(
    source: &dyn EventSource,
    retry: RetryPolicy,
) -> Result<Box<dyn EventStream>, IpcError> {
    let attempts = retry.attempts.max(1);
    let mut last = None;
    for attempt in 1..=attempts {
        match source.connect().await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                warn!(
                    "{} connect attempt {}/{} failed: {}",
                    source.name(),
                    attempt,
                    attempts,
                    e
                );
                last = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(retry.backoff).await;
        }
    }
    Err(IpcError::Exhausted {
        attempts,
        last: Box::new(last.unwrap_or_else(|| IpcError::Protocol("no attempt made".into()))),
    })
}
