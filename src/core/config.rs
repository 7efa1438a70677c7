//! # Configuration
//!
//! Centralizes all settings with a clear override hierarchy:
//! defaults → config file → CLI flags.
//!
//! Config lives at `<config_dir>/orangeslices/config.toml`. If missing on
//! first run, a commented-out default is generated so users can discover
//! all options.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::color::Color;
use crate::core::slice::Alignment;

// ============================================================================
// Config Structs (all fields Option<T> for sparse TOML)
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct OrangeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub bar: BarConfig,
    #[serde(default)]
    pub i3: I3Config,
    #[serde(default)]
    pub slices: Vec<SliceConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GeneralConfig {
    pub min_redraw_interval_ms: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub outputs: Option<usize>,
    pub echo: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BarConfig {
    pub exec: Option<String>,
    pub args: Option<BarArgs>,
}

/// Bar arguments, either shell-quoted (`"-g x14 -u 2"`) or a list.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum BarArgs {
    Line(String),
    List(Vec<String>),
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct I3Config {
    pub socket: Option<PathBuf>,
    pub retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum SliceKind {
    #[default]
    #[serde(rename = "clock")]
    Clock,
    #[serde(rename = "separator")]
    Separator,
    #[serde(rename = "command")]
    Command,
    #[serde(rename = "i3ws")]
    I3Workspaces,
    #[serde(rename = "i3title")]
    I3Title,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTypeName {
    OneShot,
    Periodic,
    Persistent,
}

/// One `[[slices]]` entry. Fields that don't apply to `kind` are ignored.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SliceConfig {
    pub kind: SliceKind,

    // Style, shared by every kind
    pub align: Option<Alignment>,
    pub color_fg: Option<Color>,
    pub color_bg: Option<Color>,
    pub color_hl: Option<Color>,
    pub underline: Option<bool>,
    pub overline: Option<bool>,
    pub outputs: Option<Vec<usize>>,

    // clock
    pub format: Option<String>,
    // clock, command (periodic)
    pub interval: Option<u64>,

    // separator
    pub char: Option<String>,
    pub width: Option<usize>,

    // command
    pub executable: Option<String>,
    pub args: Option<String>,
    pub run_type: Option<RunTypeName>,

    // command, i3title
    pub max_length: Option<usize>,
    pub ellipsis: Option<String>,

    // i3ws
    pub strip_title: Option<bool>,
    pub color_fg_focused: Option<Color>,
    pub color_bg_focused: Option<Color>,
    pub underline_focused: Option<bool>,
}

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_BAR_EXEC: &str = "lemonbar";
pub const DEFAULT_MIN_REDRAW_INTERVAL_MS: u64 = 100;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
pub const DEFAULT_IPC_RETRIES: u32 = 3;
pub const DEFAULT_IPC_RETRY_BACKOFF_MS: u64 = 500;

/// Layout used when the config defines no slices: a clock on the right.
pub fn default_slices() -> Vec<SliceConfig> {
    vec![SliceConfig {
        kind: SliceKind::Clock,
        align: Some(Alignment::Right),
        ..Default::default()
    }]
}

// ============================================================================
// Resolved Config (concrete values, no Options)
// ============================================================================

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub bar_exec: String,
    pub bar_args: Vec<String>,
    /// Write frames to stdout instead of spawning the bar.
    pub to_stdout: bool,
    pub echo: bool,
    pub min_redraw_interval: Duration,
    pub shutdown_grace: Duration,
    /// `None` means "ask the window manager".
    pub outputs: Option<usize>,
    pub i3_socket: Option<PathBuf>,
    pub ipc_retries: u32,
    pub ipc_retry_backoff: Duration,
    pub slices: Vec<SliceConfig>,
}

/// Settings given on the command line; `None` = not specified.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bar_exec: Option<String>,
    pub bar_args: Option<String>,
    pub to_stdout: bool,
    pub echo: bool,
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "config I/O error ({}): {e}", path.display()),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Loading
// ============================================================================

/// Returns the path to `<config_dir>/orangeslices/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("orangeslices").join("config.toml"))
}

/// Load config from `explicit` or the default location.
///
/// An explicit path must exist. A missing default file is generated
/// (commented out) and `OrangeConfig::default()` is returned.
pub fn load_config(explicit: Option<&Path>) -> Result<OrangeConfig, ConfigError> {
    if let Some(path) = explicit {
        return read_config(path);
    }

    let path = match config_path() {
        Some(p) => p,
        None => {
            warn!("Could not determine config directory, using default config");
            return Ok(OrangeConfig::default());
        }
    };

    if !path.exists() {
        info!("No config file found, generating default at {}", path.display());
        generate_default_config(&path);
        return Ok(OrangeConfig::default());
    }

    read_config(&path)
}

fn read_config(path: &Path) -> Result<OrangeConfig, ConfigError> {
    let contents =
        fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    let config = parse_config(&contents)?;
    info!("Loaded config from {}", path.display());
    debug!("Config: {:?}", config);
    Ok(config)
}

pub fn parse_config(contents: &str) -> Result<OrangeConfig, ConfigError> {
    toml::from_str(contents).map_err(ConfigError::Parse)
}

/// Generates a commented-out default config file at the given path.
fn generate_default_config(path: &Path) {
    let default_content = r##"# orangeslices configuration
# All settings are optional; defaults are used for anything not specified.
# Override hierarchy: defaults -> this file -> CLI flags.

# [general]
# min_redraw_interval_ms = 100     # frames are never sent faster than this
# shutdown_grace_secs = 10         # SIGTERM -> wait -> SIGKILL window
# outputs = 2                      # physical outputs; detected via i3 if unset
# echo = false                     # mirror frames to stdout

# [bar]
# exec = "lemonbar"
# args = "-g x14 -u 2 -F #FFFFFFFF -B #00000000"   # or a list: ["-u", "2"]

# [i3]
# socket = "/run/user/1000/i3/ipc-socket.123"      # default: $I3SOCK / i3 --get-socketpath
# retries = 3
# retry_backoff_ms = 500

# [[slices]]
# kind = "i3ws"                    # clock, separator, command, i3ws, i3title
# align = "left"                   # left, center, right
# strip_title = true
# color_fg = "#888"
# color_bg = "#333"
# color_fg_focused = "#EEE"
# color_bg_focused = "#1793D1"
# underline_focused = true

# [[slices]]
# kind = "i3title"
# max_length = 32
# ellipsis = "…"

# [[slices]]
# kind = "command"
# executable = "date"
# args = "+%s"
# run_type = "periodic"            # one_shot, periodic, persistent
# interval = 2
# align = "center"
# outputs = [1]

# [[slices]]
# kind = "clock"
# format = "%a, %d. %b %H:%M"
# interval = 5
# align = "right"
# color_fg = "#EEE"
# color_bg = "#1793D1"
"##;

    if let Some(parent) = path.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        warn!("Failed to create config directory: {}", e);
        return;
    }
    if let Err(e) = fs::write(path, default_content) {
        warn!("Failed to write default config: {}", e);
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolve the final config by collapsing: defaults → config file → CLI.
pub fn resolve(config: &OrangeConfig, cli: &CliOverrides) -> Result<ResolvedConfig, ConfigError> {
    let bar_exec = cli
        .bar_exec
        .clone()
        .or_else(|| config.bar.exec.clone())
        .unwrap_or_else(|| DEFAULT_BAR_EXEC.to_string());

    // CLI args replace config args wholesale
    let bar_args = match (&cli.bar_args, &config.bar.args) {
        (Some(line), _) => split_args(line)?,
        (None, Some(BarArgs::Line(line))) => split_args(line)?,
        (None, Some(BarArgs::List(list))) => list.clone(),
        (None, None) => Vec::new(),
    };

    let min_redraw_interval_ms = config
        .general
        .min_redraw_interval_ms
        .unwrap_or(DEFAULT_MIN_REDRAW_INTERVAL_MS);

    if config.general.outputs == Some(0) {
        return Err(ConfigError::Invalid("outputs must be at least 1".into()));
    }

    let slices = if config.slices.is_empty() {
        default_slices()
    } else {
        config.slices.clone()
    };

    Ok(ResolvedConfig {
        bar_exec,
        bar_args,
        to_stdout: cli.to_stdout,
        echo: cli.echo || config.general.echo.unwrap_or(false),
        min_redraw_interval: Duration::from_millis(min_redraw_interval_ms),
        shutdown_grace: Duration::from_secs(
            config
                .general
                .shutdown_grace_secs
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
        ),
        outputs: config.general.outputs,
        i3_socket: config.i3.socket.clone(),
        ipc_retries: config.i3.retries.unwrap_or(DEFAULT_IPC_RETRIES).max(1),
        ipc_retry_backoff: Duration::from_millis(
            config
                .i3
                .retry_backoff_ms
                .unwrap_or(DEFAULT_IPC_RETRY_BACKOFF_MS),
        ),
        slices,
    })
}

/// Splits a shell-quoted argument string.
pub fn split_args(line: &str) -> Result<Vec<String>, ConfigError> {
    shlex::split(line).ok_or_else(|| ConfigError::Invalid(format!("cannot parse arguments: {line}")))
}
