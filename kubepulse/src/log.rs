use std::{fs::File, path::Path, sync::OnceLock};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::Result;

static TRACER: OnceLock<()> = OnceLock::new();
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub const LOG_FILE_NAME: &str = "kubepulse.log";

/// Installs the file logger. The terminal belongs to the UI, so nothing is
/// written to stdout/stderr. Level comes from `RUST_LOG`, defaulting to info.
pub fn setup_logger(log_dir: &Path) -> Result<()> {
    if TRACER.get().is_some() {
        return Ok(());
    }

    std::fs::create_dir_all(log_dir)?;
    let file = File::create(log_dir.join(LOG_FILE_NAME))?;

    TRACER.get_or_init(|| {
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(file);

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let file_layer = fmt::layer()
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(non_blocking_writer)
            .with_filter(filter);

        LOG_GUARD.set(guard).ok();

        tracing_subscriber::registry().with(file_layer).try_init().ok();
    });

    Ok(())
}
