use anyhow::{Context, Result};
use chrono::Local;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy)]
struct CustomTimer;

impl FormatTime for CustomTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%m%dT%H:%M:%S%.3f"))
    }
}

/// Log to stdout and to `log_path`; keep the guard alive until exit so the file gets flushed
///
/// `level` is an `EnvFilter` directive such as `info` or `auction=debug,info`.
pub fn init(log_path: impl AsRef<Path>, level: &str) -> Result<WorkerGuard> {
    let log_path = log_path.as_ref();
    if let Some(parent) = log_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = std::fs::File::create(log_path).with_context(|| format!("Failed to create {}", log_path.display()))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let filter = || EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(CustomTimer)
                .with_writer(std::io::stdout)
                .with_filter(filter()?),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(CustomTimer)
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(filter()?),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
