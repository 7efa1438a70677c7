use clap::Parser;
use log::{error, info};
use orangeslices::bar;
use orangeslices::core::config::{self, CliOverrides};
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};
use std::fs::{self, File};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "orangeslices", about = "Status line compositor for lemonbar")]
struct Args {
    /// Config file (default: <config_dir>/orangeslices/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bar executable to start
    #[arg(long)]
    bar: Option<String>,

    /// Arguments for the bar, as one shell-quoted string
    #[arg(long, allow_hyphen_values = true)]
    bar_args: Option<String>,

    /// Write frames to stdout instead of starting the bar
    #[arg(long)]
    stdout: bool,

    /// Also copy every frame to stdout
    #[arg(long)]
    echo: bool,

    /// Log file (default: <cache_dir>/orangeslices/orangeslices.log)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn default_log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("orangeslices").join("orangeslices.log"))
}

fn init_logging(path: Option<PathBuf>, verbose: bool) {
    let Some(path) = path.or_else(default_log_path) else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let log_config = ConfigBuilder::new().set_time_format_rfc3339().build();

    if let Ok(log_file) = File::create(&path) {
        let _ = WriteLogger::init(level, log_config, log_file);
    }
}

fn fail(message: impl std::fmt::Display) -> ExitCode {
    error!("{}", message);
    eprintln!("orangeslices: {message}");
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_file.clone(), args.verbose);
    info!("Orangeslices starting up");

    let loaded = match config::load_config(args.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => return fail(e),
    };
    let cli = CliOverrides {
        bar_exec: args.bar,
        bar_args: args.bar_args,
        to_stdout: args.stdout,
        echo: args.echo,
    };
    let resolved = match config::resolve(&loaded, &cli) {
        Ok(resolved) => resolved,
        Err(e) => return fail(e),
    };

    match bar::run(resolved).await {
        Ok(()) => {
            info!("Clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}
