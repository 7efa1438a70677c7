//! # Command Slice
//!
//! Shows the stdout of an external command in a single cut.
//!
//! - **OneShot**: runs once at registration.
//! - **Periodic**: re-runs on the event loop every interval; each run
//!   blocks that tick until the process exits.
//! - **Persistent**: one long-lived child; every stdout line replaces the
//!   cut text. The stream ending is fatal.
//!
//! A non-zero exit from a one-shot or periodic run is an error, and the
//! compositor treats it the same way as a closed persistent stream.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{Producer, Schedule, SliceContext, SliceError};
use crate::bar::process::terminate;
use crate::core::config::{
    ConfigError, DEFAULT_SHUTDOWN_GRACE_SECS, RunTypeName, SliceConfig, split_args,
};
use crate::core::{CutUpdate, NewCut, Slice, truncate};

/// Stderr lines kept from a persistent child, for the failure report.
const STDERR_TAIL: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunType {
    OneShot,
    Periodic { interval: Duration },
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub run_type: RunType,
    pub max_length: Option<usize>,
    pub ellipsis: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>, run_type: RunType) -> Self {
        Self {
            program: program.into(),
            args,
            run_type,
            max_length: None,
            ellipsis: String::new(),
        }
    }

    /// `Command-<basename>`, e.g. `Command-date` for `/bin/date`.
    pub fn cut_id(&self) -> String {
        let base = self.program.rsplit('/').next().unwrap_or(&self.program);
        format!("Command-{base}")
    }

    /// Runs the command to completion and returns its trimmed, truncated stdout.
    pub async fn run(&self) -> Result<String, CommandError> {
        debug!("Running {} {:?}", self.program, self.args);
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                program: self.program.clone(),
                status: output.status,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(self.shorten(stdout.trim_end()))
    }

    fn shorten(&self, text: &str) -> String {
        truncate(text, self.max_length, &self.ellipsis)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum CommandError {
    Spawn {
        program: String,
        source: io::Error,
    },
    Failed {
        program: String,
        status: ExitStatus,
    },
    /// A persistent child's stdout ended without being asked to stop.
    StreamClosed {
        program: String,
        status: Option<ExitStatus>,
        stderr: Vec<String>,
    },
    Io {
        program: String,
        source: io::Error,
    },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Spawn { program, source } => {
                write!(f, "failed to start '{program}': {source}")
            }
            CommandError::Failed { program, status } => {
                write!(f, "'{program}' failed ({status})")
            }
            CommandError::StreamClosed {
                program,
                status,
                stderr,
            } => {
                write!(f, "'{program}' closed its output")?;
                if let Some(status) = status {
                    write!(f, " ({status})")?;
                }
                if !stderr.is_empty() {
                    write!(f, "; stderr:\n{}", stderr.join("\n"))?;
                }
                Ok(())
            }
            CommandError::Io { program, source } => {
                write!(f, "I/O error reading '{program}': {source}")
            }
        }
    }
}

impl std::error::Error for CommandError {}

// ============================================================================
// Producer
// ============================================================================

struct Worker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct CommandSlice {
    spec: Arc<CommandSpec>,
    cut_id: String,
    grace: Duration,
    worker: Option<Worker>,
}

impl CommandSlice {
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            cut_id: spec.cut_id(),
            spec: Arc::new(spec),
            grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            worker: None,
        }
    }

    pub fn from_config(config: &SliceConfig) -> Result<Self, ConfigError> {
        let program = config
            .executable
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid("command slice requires 'executable'".into()))?;
        let args = match &config.args {
            Some(line) => split_args(line)?,
            None => Vec::new(),
        };
        let run_type = match config.run_type.unwrap_or(RunTypeName::Periodic) {
            RunTypeName::OneShot => RunType::OneShot,
            RunTypeName::Persistent => RunType::Persistent,
            RunTypeName::Periodic => match config.interval {
                Some(secs) if secs > 0 => RunType::Periodic {
                    interval: Duration::from_secs(secs),
                },
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "periodic command '{program}' requires an 'interval' of at least 1 second"
                    )));
                }
            },
        };

        Ok(Self::new(CommandSpec {
            program,
            args,
            run_type,
            max_length: config.max_length,
            ellipsis: config.ellipsis.clone().unwrap_or_default(),
        }))
    }

    /// Grace window between SIGTERM and SIGKILL for a persistent child.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }
}

#[async_trait]
impl Producer for CommandSlice {
    fn name(&self) -> &str {
        &self.cut_id
    }

    fn schedule(&self) -> Schedule {
        match self.spec.run_type {
            RunType::Periodic { interval } => Schedule::Every(interval),
            RunType::OneShot | RunType::Persistent => Schedule::Once,
        }
    }

    fn init(&mut self, slice: &mut Slice) -> Result<(), SliceError> {
        slice.add_cut(NewCut::new(self.cut_id.clone(), ""))?;
        Ok(())
    }

    async fn update(&mut self, slice: &mut Slice) -> Result<(), SliceError> {
        if self.spec.run_type == RunType::Persistent {
            return Ok(());
        }
        let text = self.spec.run().await?;
        slice.update_cut(&self.cut_id, CutUpdate::default().text(text))?;
        Ok(())
    }

    fn start(&mut self, ctx: SliceContext) -> Result<(), SliceError> {
        if self.spec.run_type != RunType::Persistent || self.worker.is_some() {
            return Ok(());
        }

        let program = self.spec.program.clone();
        let mut child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: program.clone(),
                source,
            })?;
        let stdout = child.stdout.take().ok_or_else(|| CommandError::Io {
            program: program.clone(),
            source: io::Error::other("stdout not captured"),
        })?;
        let stderr = child.stderr.take();
        info!("Started persistent command: {} {:?}", program, self.spec.args);

        let (stop_tx, stop_rx) = oneshot::channel();
        let stream = Stream {
            spec: self.spec.clone(),
            cut_id: self.cut_id.clone(),
            grace: self.grace,
            ctx,
        };
        let handle = tokio::spawn(stream.run(child, stdout, stderr, stop_rx));
        self.worker = Some(Worker {
            stop: stop_tx,
            handle,
        });
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            if let Err(e) = worker.handle.await {
                warn!("Command worker for '{}' panicked: {}", self.cut_id, e);
            }
        }
    }
}

// ============================================================================
// Persistent stream
// ============================================================================

type StderrTail = Arc<Mutex<VecDeque<String>>>;

struct Stream {
    spec: Arc<CommandSpec>,
    cut_id: String,
    grace: Duration,
    ctx: SliceContext,
}

impl Stream {
    async fn run(
        self,
        mut child: Child,
        stdout: ChildStdout,
        stderr: Option<ChildStderr>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let tail: StderrTail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL)));
        let stderr_task = stderr.map(|s| {
            tokio::spawn(collect_stderr(self.spec.program.clone(), s, tail.clone()))
        });
        let mut lines = BufReader::new(stdout).lines();

        let failure = loop {
            tokio::select! {
                _ = &mut stop => {
                    self.shutdown(&mut child).await;
                    if let Some(task) = stderr_task {
                        task.abort();
                    }
                    return;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let text = self.spec.shorten(line.trim_end());
                        let id = self.cut_id.clone();
                        if !self.ctx.edit(move |slice| {
                            slice.update_cut(&id, CutUpdate::default().text(text))
                        }) {
                            debug!("Compositor gone, stopping '{}'", self.spec.program);
                            self.shutdown(&mut child).await;
                            return;
                        }
                    }
                    Ok(None) => break None,
                    Err(source) => break Some(source),
                },
            }
        };

        let program = self.spec.program.clone();
        if let Some(source) = failure {
            self.shutdown(&mut child).await;
            self.ctx.fatal(CommandError::Io { program, source });
            return;
        }

        // Output closed on its own; collect the exit status if it follows.
        let status = match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            _ => terminate(&mut child, Duration::ZERO).await.ok(),
        };
        if let Some(task) = stderr_task
            && tokio::time::timeout(Duration::from_secs(1), task).await.is_err()
        {
            debug!("Stderr of '{}' still open after exit", program);
        }
        let stderr = tail
            .lock()
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default();
        warn!("Persistent command '{}' exited ({:?})", program, status);
        self.ctx.fatal(CommandError::StreamClosed {
            program,
            status,
            stderr,
        });
    }

    async fn shutdown(&self, child: &mut Child) {
        match terminate(child, self.grace).await {
            Ok(status) => info!("Command '{}' stopped ({})", self.spec.program, status),
            Err(e) => warn!("Failed to stop '{}': {}", self.spec.program, e),
        }
    }
}

async fn collect_stderr(program: String, stderr: ChildStderr, tail: StderrTail) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!("[{}] {}", program, line);
        if let Ok(mut tail) = tail.lock() {
            if tail.len() == STDERR_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
}
