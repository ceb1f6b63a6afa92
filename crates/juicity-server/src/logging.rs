//! Tracing subscriber setup

use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `level` must name a tracing level; anything else is refused rather than
/// read as a target directive. `RUST_LOG` overrides it when set. With
/// `log_file`, output is also written to a daily-rotated file next to that
/// path; keep the returned guard alive until exit or buffered lines are lost.
pub fn init(level: &str, disable_timestamp: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    Level::from_str(level).map_err(|_| anyhow!("unknown log level {:?}", level))?;
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid log level {:?}", level))?,
    };

    let (file_writer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow!("log_file {:?} has no file name", path))?;
            let appender = tracing_appender::rolling::daily(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let plain = disable_timestamp.then(|| fmt::layer().without_time());
    let timed = (!disable_timestamp).then(fmt::layer);
    let file = file_writer.map(|writer| fmt::layer().with_ansi(false).with_writer(writer));

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(timed)
        .with(file)
        .try_init()
        .context("install tracing subscriber")?;

    Ok(guard)
}
