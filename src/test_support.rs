//! Test utilities shared across the crate.
//!
//! This module is only compiled during tests (`#[cfg(test)]`).

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::bar::process::FrameSink;
use crate::core::{CutUpdate, NewCut, Slice};
use crate::ipc::{
    ChangeEvent, ChangeKind, Entity, EventSource, EventStream, IpcError, Snapshot, Subject,
};
use crate::slices::{Producer, Schedule, SliceContext, SliceError};

// ============================================================================
// Frame sink
// ============================================================================

/// Records frames instead of writing them anywhere. Clones share state.
#[derive(Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<String>>>,
    exit_after: Option<usize>,
    shut_down: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports the renderer as exited once `frames` frames were written.
    pub fn exiting_after(frames: usize) -> Self {
        Self {
            exit_after: Some(frames),
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn write_frame(&mut self, frame: &str) -> io::Result<()> {
        self.frames.lock().unwrap().push(frame.to_string());
        Ok(())
    }

    fn probe(&mut self) -> io::Result<Option<ExitStatus>> {
        let written = self.frames.lock().unwrap().len();
        Ok(match self.exit_after {
            // Wait status for exit code 1
            Some(limit) if written >= limit => Some(ExitStatus::from_raw(1 << 8)),
            _ => None,
        })
    }

    async fn shutdown(&mut self, _grace: Duration) -> io::Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Producer
// ============================================================================

/// A single-cut producer that hands its context to the test on `start`.
pub struct ProbeProducer {
    name: String,
    text: String,
    schedule: Schedule,
    delay: Duration,
    contexts: mpsc::UnboundedSender<SliceContext>,
    updates: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
}

impl ProbeProducer {
    pub const CUT_ID: &'static str = "probe";

    pub fn new(
        name: &str,
        text: &str,
    ) -> (Self, mpsc::UnboundedReceiver<SliceContext>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));
        let producer = Self {
            name: name.to_string(),
            text: text.to_string(),
            schedule: Schedule::Once,
            delay: Duration::ZERO,
            contexts: tx,
            updates: Arc::new(AtomicUsize::new(0)),
            stopped: stopped.clone(),
        };
        (producer, rx, stopped)
    }

    pub fn every(mut self, period: Duration) -> Self {
        self.schedule = Schedule::Every(period);
        self
    }

    /// Makes every `update` take `delay` on the event loop.
    pub fn taking(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn updates(&self) -> Arc<AtomicUsize> {
        self.updates.clone()
    }
}

#[async_trait]
impl Producer for ProbeProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> Schedule {
        self.schedule
    }

    fn init(&mut self, slice: &mut Slice) -> Result<(), SliceError> {
        slice.add_cut(NewCut::new(Self::CUT_ID, self.text.clone()))?;
        Ok(())
    }

    async fn update(&mut self, slice: &mut Slice) -> Result<(), SliceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.updates.fetch_add(1, Ordering::SeqCst);
        if n > 0 {
            slice.update_cut(Self::CUT_ID, CutUpdate::default().text(format!("{} #{n}", self.text)))?;
        }
        Ok(())
    }

    fn start(&mut self, ctx: SliceContext) -> Result<(), SliceError> {
        let _ = self.contexts.send(ctx);
        Ok(())
    }

    async fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Event source
// ============================================================================

/// Replays one scripted session per `connect`; fails once they run out.
pub struct ScriptedSource {
    sessions: Mutex<VecDeque<Vec<ChangeEvent>>>,
    snapshot: Snapshot,
    connects: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(sessions: Vec<Vec<ChangeEvent>>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            snapshot: Snapshot::default(),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn connects(&self) -> Arc<AtomicUsize> {
        self.connects.clone()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self) -> Result<Box<dyn EventStream>, IpcError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.sessions.lock().unwrap().pop_front() {
            Some(events) => Ok(Box::new(ScriptedStream {
                events: events.into(),
            })),
            None => Err(IpcError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "no scripted session left",
            ))),
        }
    }

    async fn snapshot(&self) -> Result<Snapshot, IpcError> {
        Ok(self.snapshot.clone())
    }
}

struct ScriptedStream {
    events: VecDeque<ChangeEvent>,
}

#[async_trait]
impl EventStream for ScriptedStream {
    async fn next_event(&mut self) -> Result<Option<ChangeEvent>, IpcError> {
        Ok(self.events.pop_front())
    }
}

pub fn workspace_event(kind: ChangeKind, id: i64, name: &str) -> ChangeEvent {
    ChangeEvent {
        subject: Subject::Workspace,
        kind,
        current: Some(Entity {
            id,
            label: name.to_string(),
            ..Default::default()
        }),
        old: None,
    }
}

pub fn window_event(kind: ChangeKind, title: &str, focused: bool) -> ChangeEvent {
    ChangeEvent {
        subject: Subject::Window,
        kind,
        current: Some(Entity {
            id: 100,
            label: title.to_string(),
            focused,
            ..Default::default()
        }),
        old: None,
    }
}
