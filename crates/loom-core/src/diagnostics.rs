use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::DiagnosticsConfig;

/// Identifies one process run in the logs. Dropping it stops the session
/// log from flushing, so hosts keep it alive for as long as they run.
pub struct TelemetryGuard {
    pub session_id: Uuid,
    pub log_path: Option<PathBuf>,
    _flush: Option<WorkerGuard>,
}

struct SessionLog {
    path: PathBuf,
    writer: NonBlocking,
    guard: WorkerGuard,
}

/// Installs the process-wide subscriber: human-readable events on stderr and,
/// when `write_log_file` is set, one JSON line per event in a log file named
/// after the session start time.
pub fn init_tracing(config: &DiagnosticsConfig) -> anyhow::Result<TelemetryGuard> {
    let session_id = Uuid::new_v4();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.rust_log_filter));

    let session_log = if config.write_log_file {
        Some(open_session_log(&config.logs_dir, &config.trace_file_prefix)?)
    } else {
        None
    };
    let (log_path, writer, flush) = match session_log {
        Some(SessionLog {
            path,
            writer,
            guard,
        }) => (Some(path), Some(writer), Some(guard)),
        None => (None, None, None),
    };

    let json_layer = writer.map(|writer| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(writer)
    });
    let stderr_layer = fmt::layer()
        .compact()
        .with_target(true)
        .with_writer(std::io::stderr);

    match tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(json_layer)
        .try_init()
    {
        Ok(()) => info!(
            %session_id,
            log_path = ?log_path,
            "loom diagnostics ready"
        ),
        Err(error) => warn!(?error, "a tracing subscriber is already installed"),
    }

    Ok(TelemetryGuard {
        session_id,
        log_path,
        _flush: flush,
    })
}

fn open_session_log(logs_dir: &Path, prefix: &str) -> anyhow::Result<SessionLog> {
    fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create log directory: {}", logs_dir.display()))?;

    let file_name = format!("{prefix}-{}.log", Utc::now().format("%Y%m%d-%H%M%S"));
    let path = logs_dir.join(&file_name);
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(logs_dir, file_name));
    debug!(path = %path.display(), "session log opened");
    Ok(SessionLog {
        path,
        writer,
        guard,
    })
}
