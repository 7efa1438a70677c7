//! # Slice Producers
//!
//! A producer owns the *logic* behind a slice: what its cuts say and when
//! they change. The compositor owns the `Slice` itself and is the only
//! place cuts are mutated.
//!
//! ```text
//!  timer tick ─────────────────┐
//!                              ▼
//!  producer.update(&mut slice)   (on the event loop)
//!
//!  command line / i3 event ──► SliceContext::edit(closure)
//!                              │   (any task)
//!                              ▼
//!                  Message::Edit ──► event loop applies it, requests redraw
//! ```
//!
//! Background tasks never touch a `Slice` directly: they send a closure
//! that the event loop runs against the slice, so every render sees a
//! consistent snapshot.

pub mod clock;
pub mod command;
pub mod i3title;
pub mod i3ws;
pub mod separator;

use async_trait::async_trait;
use log::{info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedSender, WeakUnboundedSender};

use crate::core::config::{ConfigError, ResolvedConfig, SliceConfig, SliceKind};
use crate::core::{CutError, OutputMask, Slice, SliceStyle};
use crate::ipc::i3::I3Source;
use crate::ipc::{EventHub, IpcError, RetryPolicy};

pub use clock::Clock;
pub use command::{CommandError, CommandSlice, CommandSpec, RunType};
pub use i3title::I3Title;
pub use i3ws::I3Workspaces;
pub use separator::Separator;

/// Index of a slice in registration order.
pub type SliceId = usize;

/// A cut mutation marshaled onto the event loop.
pub type Edit = Box<dyn FnOnce(&mut Slice) -> Result<(), CutError> + Send>;

/// Everything that can reach the event loop from outside it.
pub enum Message {
    Edit { slice: SliceId, edit: Edit },
    /// Interval elapsed for a timer-driven slice.
    Tick(SliceId),
    Fatal { slice: String, error: SliceError },
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Edit { slice, .. } => write!(f, "Edit({slice})"),
            Message::Tick(slice) => write!(f, "Tick({slice})"),
            Message::Fatal { slice, error } => write!(f, "Fatal({slice}: {error})"),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum SliceError {
    Cut(CutError),
    Command(CommandError),
    Ipc(IpcError),
}

impl fmt::Display for SliceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceError::Cut(e) => write!(f, "{e}"),
            SliceError::Command(e) => write!(f, "{e}"),
            SliceError::Ipc(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SliceError {}

impl From<CutError> for SliceError {
    fn from(e: CutError) -> Self {
        SliceError::Cut(e)
    }
}

impl From<CommandError> for SliceError {
    fn from(e: CommandError) -> Self {
        SliceError::Command(e)
    }
}

impl From<IpcError> for SliceError {
    fn from(e: IpcError) -> Self {
        SliceError::Ipc(e)
    }
}

// ============================================================================
// Producer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Updated once at registration, then only through its own contexts.
    Once,
    /// Updated on the event loop every interval.
    Every(Duration),
}

/// Non-owning handle a producer uses to reach the compositor.
#[derive(Clone)]
pub struct SliceContext {
    id: SliceId,
    name: String,
    tx: WeakUnboundedSender<Message>,
}

impl SliceContext {
    pub fn new(id: SliceId, name: impl Into<String>, tx: &UnboundedSender<Message>) -> Self {
        Self {
            id,
            name: name.into(),
            tx: tx.downgrade(),
        }
    }

    pub fn id(&self) -> SliceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `edit` for this slice; a redraw is requested once it is applied.
    /// Returns false when the compositor is gone.
    pub fn edit<F>(&self, edit: F) -> bool
    where
        F: FnOnce(&mut Slice) -> Result<(), CutError> + Send + 'static,
    {
        self.send(Message::Edit {
            slice: self.id,
            edit: Box::new(edit),
        })
    }

    /// Reports an unrecoverable error; the compositor shuts down.
    pub fn fatal(&self, error: impl Into<SliceError>) {
        let error = error.into();
        if !self.send(Message::Fatal {
            slice: self.name.clone(),
            error,
        }) {
            warn!("Slice '{}' failed after the compositor stopped", self.name);
        }
    }

    fn send(&self, message: Message) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
pub trait Producer: Send + Sync {
    fn name(&self) -> &str;

    fn schedule(&self) -> Schedule {
        Schedule::Once
    }

    /// Creates the slice's initial cuts.
    fn init(&mut self, _slice: &mut Slice) -> Result<(), SliceError> {
        Ok(())
    }

    /// Refreshes the cuts. Runs on the event loop at registration and on
    /// every tick of `schedule()`.
    async fn update(&mut self, slice: &mut Slice) -> Result<(), SliceError>;

    /// Spawns any background context the producer needs.
    fn start(&mut self, _ctx: SliceContext) -> Result<(), SliceError> {
        Ok(())
    }

    /// Tears down background contexts and child processes.
    async fn stop(&mut self) {}
}

// ============================================================================
// Building from config
// ============================================================================

pub struct Registration {
    pub style: SliceStyle,
    pub producer: Box<dyn Producer>,
}

/// The configured slices plus the shared i3 connection, if any slice uses it.
pub struct Layout {
    pub slices: Vec<Registration>,
    pub hub: Option<Arc<EventHub>>,
}

pub fn build(config: &ResolvedConfig) -> Result<Layout, ConfigError> {
    let mut hub: Option<Arc<EventHub>> = None;
    let mut shared_hub = || {
        hub.get_or_insert_with(|| {
            let source = I3Source::new(config.i3_socket.clone());
            let retry = RetryPolicy {
                attempts: config.ipc_retries,
                backoff: config.ipc_retry_backoff,
            };
            Arc::new(EventHub::new(Arc::new(source), retry))
        })
        .clone()
    };

    let mut slices = Vec::with_capacity(config.slices.len());
    for (index, slice) in config.slices.iter().enumerate() {
        let style = slice_style(slice)
            .map_err(|e| ConfigError::Invalid(format!("slice #{index}: {e}")))?;
        let producer: Box<dyn Producer> = match slice.kind {
            SliceKind::Clock => Box::new(Clock::from_config(slice)?),
            SliceKind::Separator => Box::new(Separator::from_config(slice)),
            SliceKind::Command => {
                Box::new(CommandSlice::from_config(slice)?.with_grace(config.shutdown_grace))
            }
            SliceKind::I3Workspaces => Box::new(I3Workspaces::from_config(slice, shared_hub())),
            SliceKind::I3Title => Box::new(I3Title::from_config(slice, shared_hub())),
        };
        info!("Configured slice #{index}: {}", producer.name());
        slices.push(Registration { style, producer });
    }

    Ok(Layout { slices, hub })
}

fn slice_style(config: &SliceConfig) -> Result<SliceStyle, String> {
    let defaults = SliceStyle::default();
    let outputs = match &config.outputs {
        Some(indices) => {
            if let Some(bad) = indices.iter().find(|&&i| i >= crate::core::slice::MAX_OUTPUTS) {
                return Err(format!("output index {bad} out of range"));
            }
            OutputMask::from_indices(indices.iter().copied())
        }
        None => OutputMask::ALL,
    };

    Ok(SliceStyle {
        align: config.align.unwrap_or(defaults.align),
        outputs,
        fg: config.color_fg.unwrap_or(defaults.fg),
        bg: config.color_bg.unwrap_or(defaults.bg),
        hl: config.color_hl.unwrap_or(defaults.hl),
        underline: config.underline.unwrap_or(defaults.underline),
        overline: config.overline.unwrap_or(defaults.overline),
    })
}
