//! # Bar Adapter
//!
//! The compositor. Owns every `Slice`, renders them into lemonbar
//! markup and writes frames to the renderer.
//!
//! ## Event Loop
//!
//! One task owns all slices and the renderer's stdin. Everything else
//! (interval tickers, persistent commands, the i3 connection) talks to it
//! through a single channel:
//!
//! ```text
//!  ticker ──Tick──┐
//!  command ─Edit──┼──► rx ──► apply to slice ──► Coordinator ──► write frame ──► probe
//!  i3 ─────Edit───┤                                   │
//!  any ────Fatal──┘                        deferred redraw deadline
//! ```
//!
//! Frames are written whole, one `write_frame` per redraw, so two
//! redraws can never interleave on the pipe.

pub mod coordinator;
pub mod process;

use log::{debug, error, info, warn};
use std::fmt;
use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::core::config::{
    ConfigError, DEFAULT_MIN_REDRAW_INTERVAL_MS, DEFAULT_SHUTDOWN_GRACE_SECS, ResolvedConfig,
};
use crate::core::{Alignment, Slice, SliceStyle, markup};
use crate::ipc::EventHub;
use crate::slices::{self, Message, Producer, Schedule, SliceContext, SliceError, SliceId};
use coordinator::{Coordinator, Decision};
use process::{BarProcess, Echo, FrameSink, StdoutSink};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum OrangeError {
    Config(ConfigError),
    Spawn { program: String, source: io::Error },
    /// The renderer exited on its own.
    RendererExited(Option<ExitStatus>),
    RendererIo(io::Error),
    Slice { name: String, error: SliceError },
}

impl fmt::Display for OrangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrangeError::Config(e) => write!(f, "{e}"),
            OrangeError::Spawn { program, source } => {
                write!(f, "failed to start renderer '{program}': {source}")
            }
            OrangeError::RendererExited(Some(status)) => {
                write!(f, "renderer terminated ({status})")
            }
            OrangeError::RendererExited(None) => write!(f, "renderer terminated"),
            OrangeError::RendererIo(e) => write!(f, "failed to write to renderer: {e}"),
            OrangeError::Slice { name, error } => write!(f, "slice '{name}' failed: {error}"),
        }
    }
}

impl std::error::Error for OrangeError {}

impl From<ConfigError> for OrangeError {
    fn from(e: ConfigError) -> Self {
        OrangeError::Config(e)
    }
}

// ============================================================================
// Compositor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrangeOptions {
    pub min_redraw_interval: Duration,
    pub shutdown_grace: Duration,
    /// Physical outputs to render; 1 means no output directives.
    pub output_count: usize,
}

impl Default for OrangeOptions {
    fn default() -> Self {
        Self {
            min_redraw_interval: Duration::from_millis(DEFAULT_MIN_REDRAW_INTERVAL_MS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            output_count: 1,
        }
    }
}

struct Entry {
    slice: Slice,
    producer: Box<dyn Producer>,
    // Set while a tick for this slice is queued or running
    tick_pending: Arc<AtomicBool>,
}

impl Entry {
    fn fail(&self, error: impl Into<SliceError>) -> OrangeError {
        OrangeError::Slice {
            name: self.producer.name().to_string(),
            error: error.into(),
        }
    }
}

pub struct Orange {
    entries: Vec<Entry>,
    options: OrangeOptions,
    tx: UnboundedSender<Message>,
    rx: UnboundedReceiver<Message>,
}

impl Orange {
    pub fn new(options: OrangeOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            entries: Vec::new(),
            options: OrangeOptions {
                output_count: options.output_count.max(1),
                ..options
            },
            tx,
            rx,
        }
    }

    /// Registers a slice. Slices render in registration order within
    /// their alignment bucket.
    pub fn add(&mut self, style: SliceStyle, producer: Box<dyn Producer>) -> SliceId {
        let slice = Slice::new(producer.name(), style);
        self.entries.push(Entry {
            slice,
            producer,
            tick_pending: Arc::new(AtomicBool::new(false)),
        });
        self.entries.len() - 1
    }

    pub fn slice(&self, id: SliceId) -> Option<&Slice> {
        self.entries.get(id).map(|e| &e.slice)
    }

    pub fn options(&self) -> &OrangeOptions {
        &self.options
    }

    /// Runs `init` then a first `update` on every producer.
    pub async fn prime(&mut self) -> Result<(), OrangeError> {
        for entry in &mut self.entries {
            if let Err(e) = entry.producer.init(&mut entry.slice) {
                return Err(entry.fail(e));
            }
            if let Err(e) = entry.producer.update(&mut entry.slice).await {
                return Err(entry.fail(e));
            }
        }
        Ok(())
    }

    /// One complete frame, newline-terminated.
    pub fn render_frame(&self) -> String {
        compose(&self.entries, self.options.output_count)
    }

    /// The segment for a single output, without output selection.
    pub fn render_output(&self, output: usize) -> String {
        render_output(&self.entries, output)
    }

    /// Drives the compositor until `shutdown` resolves or something fails.
    /// Producers and the renderer are torn down either way.
    pub async fn run<S, F>(mut self, sink: &mut S, shutdown: F) -> Result<(), OrangeError>
    where
        S: FrameSink + ?Sized,
        F: Future<Output = ()>,
    {
        if let Err(e) = self.prime().await {
            teardown(&mut self.entries, Vec::new(), sink, self.options.shutdown_grace).await;
            return Err(e);
        }

        let Orange {
            mut entries,
            options,
            tx,
            mut rx,
        } = self;
        let tickers = spawn_tickers(&entries, &tx);

        let mut started = Ok(());
        for (id, entry) in entries.iter_mut().enumerate() {
            let ctx = SliceContext::new(id, entry.producer.name(), &tx);
            if let Err(e) = entry.producer.start(ctx) {
                started = Err(entry.fail(e));
                break;
            }
        }

        let mut coordinator = Coordinator::new(options.min_redraw_interval);
        let result = match started {
            Ok(()) => {
                event_loop(
                    &mut entries,
                    &mut rx,
                    &mut coordinator,
                    sink,
                    options.output_count,
                    shutdown,
                )
                .await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => info!("Shutting down"),
            Err(e) => error!("Stopping on error: {}", e),
        }
        teardown(&mut entries, tickers, sink, options.shutdown_grace).await;
        result
    }
}

async fn event_loop<S, F>(
    entries: &mut [Entry],
    rx: &mut UnboundedReceiver<Message>,
    coordinator: &mut Coordinator,
    sink: &mut S,
    output_count: usize,
    shutdown: F,
) -> Result<(), OrangeError>
where
    S: FrameSink + ?Sized,
    F: Future<Output = ()>,
{
    draw(&compose(entries, output_count), coordinator, sink).await?;

    tokio::pin!(shutdown);
    loop {
        let deadline = coordinator.deadline();
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            message = rx.recv() => {
                let Some(message) = message else {
                    return Ok(());
                };
                handle(entries, message).await?;
                match coordinator.request(Instant::now()) {
                    Decision::Now => {
                        draw(&compose(entries, output_count), coordinator, sink).await?
                    }
                    Decision::Deferred(at) => debug!("Redraw deferred until {:?}", at),
                    Decision::Coalesced(_) => {}
                }
            }
            _ = sleep_until(deadline), if deadline.is_some() => {
                draw(&compose(entries, output_count), coordinator, sink).await?;
            }
        }
    }
}

/// Applies one message to the slices. Every `Ok` asks for a redraw.
async fn handle(entries: &mut [Entry], message: Message) -> Result<(), OrangeError> {
    match message {
        Message::Edit { slice, edit } => {
            let Some(entry) = entries.get_mut(slice) else {
                warn!("Edit for unknown slice {}", slice);
                return Ok(());
            };
            if let Err(e) = edit(&mut entry.slice) {
                return Err(entry.fail(e));
            }
        }
        Message::Tick(slice) => {
            let Some(entry) = entries.get_mut(slice) else {
                return Ok(());
            };
            let updated = entry.producer.update(&mut entry.slice).await;
            entry.tick_pending.store(false, Ordering::SeqCst);
            if let Err(e) = updated {
                return Err(entry.fail(e));
            }
        }
        Message::Fatal { slice, error } => {
            return Err(OrangeError::Slice { name: slice, error });
        }
    }
    Ok(())
}

async fn draw<S>(
    frame: &str,
    coordinator: &mut Coordinator,
    sink: &mut S,
) -> Result<(), OrangeError>
where
    S: FrameSink + ?Sized,
{
    let written = sink.write_frame(frame).await;
    coordinator.rendered(Instant::now());

    // Liveness probe after every write
    match sink.probe() {
        Ok(Some(status)) => {
            error!("Renderer terminated ({}), quitting", status);
            return Err(OrangeError::RendererExited(Some(status)));
        }
        Ok(None) => {}
        Err(e) => warn!("Renderer liveness probe failed: {}", e),
    }
    written.map_err(OrangeError::RendererIo)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn spawn_tickers(entries: &[Entry], tx: &UnboundedSender<Message>) -> Vec<JoinHandle<()>> {
    entries
        .iter()
        .enumerate()
        .filter_map(|(id, entry)| match entry.producer.schedule() {
            Schedule::Every(period) if !period.is_zero() => {
                Some((id, period, entry.tick_pending.clone()))
            }
            _ => None,
        })
        .map(|(id, period, pending)| {
            let tx = tx.downgrade();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    // At most one tick per slice in flight
                    if pending.swap(true, Ordering::SeqCst) {
                        continue;
                    }
                    let Some(tx) = tx.upgrade() else {
                        break;
                    };
                    if tx.send(Message::Tick(id)).is_err() {
                        break;
                    }
                }
            })
        })
        .collect()
}

async fn teardown<S>(
    entries: &mut [Entry],
    tickers: Vec<JoinHandle<()>>,
    sink: &mut S,
    grace: Duration,
) where
    S: FrameSink + ?Sized,
{
    for ticker in tickers {
        ticker.abort();
    }
    for entry in entries.iter_mut() {
        entry.producer.stop().await;
    }
    if let Err(e) = sink.shutdown(grace).await {
        warn!("Failed to stop renderer: {}", e);
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn render_output(entries: &[Entry], output: usize) -> String {
    let mut out = String::new();
    for align in Alignment::ALL {
        let bucket: String = entries
            .iter()
            .filter(|e| e.slice.align() == align)
            .map(|e| e.slice.render_joined(output))
            .collect();
        if !bucket.is_empty() {
            out.push_str(markup::align(align));
            out.push_str(&bucket);
        }
    }
    out.push_str(&markup::frame_reset());
    out
}

fn compose(entries: &[Entry], output_count: usize) -> String {
    let mut frame = if output_count <= 1 {
        render_output(entries, 0)
    } else {
        (0..output_count)
            .map(|i| markup::output(i) + &render_output(entries, i))
            .collect()
    };
    frame.push('\n');
    frame
}

// ============================================================================
// Entry point
// ============================================================================

/// Builds the configured slices, starts the renderer and runs until
/// SIGINT/SIGTERM or a fatal error.
pub async fn run(config: ResolvedConfig) -> Result<(), OrangeError> {
    let layout = slices::build(&config)?;
    let output_count = match config.outputs {
        Some(count) => count,
        None => detect_outputs(layout.hub.as_deref()).await,
    };
    info!("Rendering for {} output(s)", output_count);

    let mut orange = Orange::new(OrangeOptions {
        min_redraw_interval: config.min_redraw_interval,
        shutdown_grace: config.shutdown_grace,
        output_count,
    });
    for registration in layout.slices {
        orange.add(registration.style, registration.producer);
    }

    if config.to_stdout {
        let mut sink = StdoutSink::new();
        return orange.run(&mut sink, shutdown_signal()).await;
    }

    let mut bar = BarProcess::spawn(&config.bar_exec, &config.bar_args).map_err(|source| {
        OrangeError::Spawn {
            program: config.bar_exec.clone(),
            source,
        }
    })?;
    if config.echo {
        orange.run(&mut Echo::new(bar), shutdown_signal()).await
    } else {
        orange.run(&mut bar, shutdown_signal()).await
    }
}

/// Active outputs reported by the window manager, or 1 without one.
async fn detect_outputs(hub: Option<&EventHub>) -> usize {
    let Some(hub) = hub else {
        return 1;
    };
    match hub.snapshot().await {
        Ok(snapshot) => snapshot.ordered_outputs().len().max(1),
        Err(e) => {
            warn!("Could not detect outputs, assuming one: {}", e);
            1
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            info!("Received SIGINT, quitting");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, quitting"),
        _ = term.recv() => info!("Received SIGTERM, quitting"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Color, CutError, CutUpdate, NewCut, OutputMask};
    use crate::slices::{Clock, Separator};
    use crate::test_support::{ProbeProducer, RecordingSink};
    use tokio::sync::oneshot;

    fn style(align: Alignment) -> SliceStyle {
        SliceStyle {
            align,
            ..Default::default()
        }
    }

    fn span(text: &str) -> String {
        format!(
            "%{{F{}}}%{{B{}}}%{{U{}}}{}",
            Color::WHITE,
            Color::BLACK,
            Color::WHITE,
            text
        )
    }

    #[tokio::test]
    async fn test_left_bucket_preserves_registration_order() {
        let mut orange = Orange::new(OrangeOptions::default());
        let clock = orange.add(
            style(Alignment::Left),
            Box::new(Clock::new("%H:%M", Duration::from_secs(5)).unwrap()),
        );
        let sep = orange.add(
            style(Alignment::Left),
            Box::new(Separator::new("|", 2)),
        );
        orange.prime().await.unwrap();

        let expected = format!(
            "%{{l}}{}{}{}\n",
            orange.slice(clock).unwrap().render_joined(0),
            orange.slice(sep).unwrap().render_joined(0),
            markup::frame_reset()
        );
        assert_eq!(orange.render_frame(), expected);
    }

    #[tokio::test]
    async fn test_empty_buckets_emit_no_directive() {
        let mut orange = Orange::new(OrangeOptions::default());
        let (probe, _contexts, _stopped) = ProbeProducer::new("probe", "hi");
        orange.add(style(Alignment::Right), Box::new(probe));
        orange.prime().await.unwrap();
        assert_eq!(
            orange.render_frame(),
            format!("%{{r}}{}{}\n", span(" hi "), markup::frame_reset())
        );
    }

    #[tokio::test]
    async fn test_multi_output_frame() {
        let mut orange = Orange::new(OrangeOptions {
            output_count: 2,
            ..Default::default()
        });
        let (left, _c1, _s1) = ProbeProducer::new("left", "a");
        let (right, _c2, _s2) = ProbeProducer::new("right", "b");
        orange.add(style(Alignment::Left), Box::new(left));
        orange.add(
            SliceStyle {
                align: Alignment::Right,
                outputs: OutputMask::from_index(1),
                ..Default::default()
            },
            Box::new(right),
        );
        orange.prime().await.unwrap();

        let reset = markup::frame_reset();
        let expected = format!(
            "%{{S0}}%{{l}}{a}{reset}%{{S1}}%{{l}}{a}%{{r}}{b}{reset}\n",
            a = span(" a "),
            b = span(" b "),
        );
        assert_eq!(orange.render_frame(), expected);
        assert_eq!(
            orange.render_output(1),
            format!("%{{l}}{}%{{r}}{}{reset}", span(" a "), span(" b "))
        );
    }

    #[tokio::test]
    async fn test_multiple_cuts_joined_with_separator() {
        let mut orange = Orange::new(OrangeOptions::default());
        let (probe, _contexts, _stopped) = ProbeProducer::new("probe", "one");
        let id = orange.add(style(Alignment::Left), Box::new(probe));
        orange.prime().await.unwrap();
        orange.entries[id]
            .slice
            .add_cut(NewCut::new("second", "two"))
            .unwrap();
        assert_eq!(
            orange.render_frame(),
            format!(
                "%{{l}}{}{}{}{}\n",
                span(" one "),
                markup::CUT_SEPARATOR,
                span(" two "),
                markup::frame_reset()
            )
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_coalesce_into_one_frame() {
        let mut orange = Orange::new(OrangeOptions::default());
        let (probe, mut contexts, _stopped) = ProbeProducer::new("probe", "0");
        orange.add(style(Alignment::Left), Box::new(probe));

        let sink = RecordingSink::new();
        let frames = sink.clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let run = tokio::spawn(async move {
            let mut sink = sink;
            orange
                .run(&mut sink, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let ctx = contexts.recv().await.unwrap();
        for text in ["1", "2", "3"] {
            ctx.edit(move |slice| {
                slice.update_cut(ProbeProducer::CUT_ID, CutUpdate::default().text(text))
            });
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(frames.frames().len(), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        stop_tx.send(()).unwrap();
        run.await.unwrap().unwrap();

        let frames = frames.frames();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains(" 0 "));
        assert!(frames[1].contains(" 3 "));
        assert!(!frames[1].contains(" 2 "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_after_quiet_period_renders_immediately() {
        let mut orange = Orange::new(OrangeOptions::default());
        let (probe, mut contexts, _stopped) = ProbeProducer::new("probe", "0");
        orange.add(style(Alignment::Left), Box::new(probe));

        let sink = RecordingSink::new();
        let frames = sink.clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let run = tokio::spawn(async move {
            let mut sink = sink;
            orange
                .run(&mut sink, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let ctx = contexts.recv().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        ctx.edit(|slice| slice.update_cut(ProbeProducer::CUT_ID, CutUpdate::default().text("x")));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(frames.frames().len(), 2);

        stop_tx.send(()).unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_renderer_exit_stops_loop() {
        let mut orange = Orange::new(OrangeOptions::default());
        let (probe, _contexts, stopped) = ProbeProducer::new("probe", "x");
        orange.add(style(Alignment::Left), Box::new(probe));

        let mut sink = RecordingSink::exiting_after(1);
        let result = orange.run(&mut sink, std::future::pending()).await;

        assert!(matches!(result, Err(OrangeError::RendererExited(Some(_)))));
        assert_eq!(sink.frames().len(), 1);
        assert!(sink.was_shut_down());
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_fatal_from_background_context() {
        let mut orange = Orange::new(OrangeOptions::default());
        let (probe, mut contexts, stopped) = ProbeProducer::new("probe", "x");
        orange.add(style(Alignment::Left), Box::new(probe));

        let mut sink = RecordingSink::new();
        let shutdown = async move {
            if let Some(ctx) = contexts.recv().await {
                ctx.fatal(CutError::NotFound("gone".into()));
            }
            std::future::pending::<()>().await;
        };
        let result = orange.run(&mut sink, shutdown).await;

        match result {
            Err(OrangeError::Slice { name, error }) => {
                assert_eq!(name, "probe");
                assert!(matches!(error, SliceError::Cut(CutError::NotFound(_))));
            }
            other => panic!("expected slice failure, got {other:?}"),
        }
        assert!(sink.was_shut_down());
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_edit_is_fatal() {
        let mut orange = Orange::new(OrangeOptions::default());
        let (probe, mut contexts, _stopped) = ProbeProducer::new("probe", "x");
        orange.add(style(Alignment::Left), Box::new(probe));

        let mut sink = RecordingSink::new();
        let shutdown = async move {
            if let Some(ctx) = contexts.recv().await {
                ctx.edit(|slice| slice.delete_cut("missing"));
            }
            std::future::pending::<()>().await;
        };
        let result = orange.run(&mut sink, shutdown).await;
        assert!(matches!(
            result,
            Err(OrangeError::Slice {
                error: SliceError::Cut(CutError::NotFound(_)),
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_slice_ticks_on_loop() {
        let mut orange = Orange::new(OrangeOptions::default());
        let (probe, _contexts, _stopped) = ProbeProducer::new("probe", "x");
        let probe = probe.every(Duration::from_secs(2));
        let updates = probe.updates();
        orange.add(style(Alignment::Left), Box::new(probe));

        let mut sink = RecordingSink::new();
        let result = orange
            .run(&mut sink, tokio::time::sleep(Duration::from_millis(4500)))
            .await;
        assert!(result.is_ok());
        // Initial update plus ticks at 2s and 4s
        assert_eq!(updates.load(Ordering::SeqCst), 3);
        assert_eq!(sink.frames().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_interval_slice_does_not_delay_other_edits() {
        let mut orange = Orange::new(OrangeOptions::default());
        let (slow, _slow_contexts, _) = ProbeProducer::new("slow", "slow");
        let slow = slow
            .every(Duration::from_secs(1))
            .taking(Duration::from_secs(3));
        orange.add(style(Alignment::Left), Box::new(slow));
        let (probe, mut contexts, _stopped) = ProbeProducer::new("probe", "idle");
        orange.add(style(Alignment::Right), Box::new(probe));

        let sink = RecordingSink::new();
        let frames = sink.clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let run = tokio::spawn(async move {
            let mut sink = sink;
            orange
                .run(&mut sink, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let ctx = contexts.recv().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        let sent_at = Instant::now();
        ctx.edit(|slice| {
            slice.update_cut(ProbeProducer::CUT_ID, CutUpdate::default().text("edited"))
        });
        while !frames.frames().iter().any(|f| f.contains(" edited ")) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        // One slow update may be running when the edit arrives, never a backlog
        assert!(Instant::now() - sent_at <= Duration::from_secs(4));

        stop_tx.send(()).unwrap();
        run.await.unwrap().unwrap();
    }
}
