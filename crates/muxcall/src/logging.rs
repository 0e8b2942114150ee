//! stderr logging for the CLI.
//!
//! `--log-level` sets the default; `RUST_LOG` directives, when present and
//! valid, replace it (e.g. `RUST_LOG=muxcall_rpc=debug,info`).

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = env_filter(level, directives.as_deref());

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!("log subscriber already installed");
    }
}

fn env_filter(level: LogLevel, directives: Option<&str>) -> EnvFilter {
    let fallback = || EnvFilter::default().add_directive(LevelFilter::from(level).into());
    match directives.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|err| {
            eprintln!("ignoring invalid {}: {err}", EnvFilter::DEFAULT_ENV);
            fallback()
        }),
        None => fallback(),
    }
}
