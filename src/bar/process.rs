//! # Renderer Process
//!
//! Frames go to a `FrameSink`. Normally that is the bar itself, spawned
//! as a child with a piped stdin; with `--stdout` frames go to our own
//! stdout instead.
//!
//! Children are stopped with SIGTERM, a grace window, then SIGKILL.

use async_trait::async_trait;
use log::{debug, info, warn};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::process::{Child, ChildStdin, Command};

#[async_trait]
pub trait FrameSink: Send {
    /// Writes one complete frame in a single call.
    async fn write_frame(&mut self, frame: &str) -> io::Result<()>;

    /// Non-blocking liveness probe: `Some(status)` once the renderer exited.
    fn probe(&mut self) -> io::Result<Option<ExitStatus>>;

    async fn shutdown(&mut self, grace: Duration) -> io::Result<()>;
}

/// Sends SIGTERM, waits up to `grace`, then kills.
pub async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    if let Some(pid) = child.id()
        && let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
    {
        warn!("Failed to send SIGTERM to {}: {}", pid, e);
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("Child did not exit within {:?}, killing", grace);
            child.kill().await?;
            child.wait().await
        }
    }
}

// ============================================================================
// Bar child process
// ============================================================================

pub struct BarProcess {
    program: String,
    child: Child,
    stdin: ChildStdin,
}

impl BarProcess {
    pub fn spawn(program: &str, args: &[String]) -> io::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("renderer stdin not captured"))?;
        info!("Started renderer: {} {}", program, args.join(" "));
        Ok(Self {
            program: program.to_string(),
            child,
            stdin,
        })
    }
}

#[async_trait]
impl FrameSink for BarProcess {
    async fn write_frame(&mut self, frame: &str) -> io::Result<()> {
        self.stdin.write_all(frame.as_bytes()).await?;
        self.stdin.flush().await
    }

    fn probe(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    async fn shutdown(&mut self, grace: Duration) -> io::Result<()> {
        debug!("Stopping renderer {}", self.program);
        let status = terminate(&mut self.child, grace).await?;
        info!("Renderer {} stopped ({})", self.program, status);
        Ok(())
    }
}

// ============================================================================
// Stdout sinks
// ============================================================================

/// Frames to our own stdout, for piping into a bar started elsewhere.
pub struct StdoutSink {
    out: Stdout,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: tokio::io::stdout(),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSink for StdoutSink {
    async fn write_frame(&mut self, frame: &str) -> io::Result<()> {
        self.out.write_all(frame.as_bytes()).await?;
        self.out.flush().await
    }

    fn probe(&mut self) -> io::Result<Option<ExitStatus>> {
        Ok(None)
    }

    async fn shutdown(&mut self, _grace: Duration) -> io::Result<()> {
        Ok(())
    }
}

/// Mirrors every frame to stdout before passing it on.
pub struct Echo<S> {
    inner: S,
    out: Stdout,
}

impl<S: FrameSink> Echo<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            out: tokio::io::stdout(),
        }
    }
}

#[async_trait]
impl<S: FrameSink> FrameSink for Echo<S> {
    async fn write_frame(&mut self, frame: &str) -> io::Result<()> {
        if let Err(e) = self.out.write_all(frame.as_bytes()).await {
            debug!("Echo to stdout failed: {}", e);
        }
        self.inner.write_frame(frame).await
    }

    fn probe(&mut self) -> io::Result<Option<ExitStatus>> {
        self.inner.probe()
    }

    async fn shutdown(&mut self, grace: Duration) -> io::Result<()> {
        self.inner.shutdown(grace).await
    }
}
