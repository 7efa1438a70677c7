//! Redraw debouncing.
//!
//! Frames are never sent closer together than `min_interval`. A request
//! inside the window schedules one deferred redraw at
//! `last_render + min_interval`; further requests before it fires are
//! folded into it.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Render right away.
    Now,
    /// A deferred redraw was scheduled for this instant.
    Deferred(Instant),
    /// Already pending; the request is folded into it.
    Coalesced(Instant),
}

#[derive(Debug)]
pub struct Coordinator {
    min_interval: Duration,
    last_render: Option<Instant>,
    pending: Option<Instant>,
}

impl Coordinator {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_render: None,
            pending: None,
        }
    }

    pub fn request(&mut self, now: Instant) -> Decision {
        if let Some(at) = self.pending {
            return Decision::Coalesced(at);
        }
        match self.last_render {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => {
                let at = last + self.min_interval;
                self.pending = Some(at);
                Decision::Deferred(at)
            }
            _ => Decision::Now,
        }
    }

    /// When the pending redraw is due, if one is scheduled.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending
    }

    /// Records a completed render and clears any pending redraw.
    pub fn rendered(&mut self, now: Instant) {
        self.last_render = Some(now);
        self.pending = None;
    }
}
