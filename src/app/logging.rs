//! Usage: Process-wide tracing setup (env filter, stderr output, optional daily log files).

use std::path::Path;
use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::infra::settings::LoggingSettings;

const LOG_FILE_PREFIX: &str = "gateway.log";

static INIT: OnceLock<()> = OnceLock::new();

/// Keeps the non-blocking file writer alive; drop it only at process exit.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Installs the global subscriber once. Later calls return `None` and change nothing.
pub fn init(settings: &LoggingSettings) -> Option<LoggingGuard> {
    let mut guard = None;
    INIT.get_or_init(|| {
        guard = Some(install(settings));
    });
    guard
}

fn install(settings: &LoggingSettings) -> LoggingGuard {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(settings.filter.as_str()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![Box::new(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true),
    )];

    let mut file_guard = None;
    let mut file_setup_error = None;
    if let Some(dir) = settings.log_dir.as_deref() {
        let dir = Path::new(dir);
        match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                layers.push(Box::new(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true),
                ));
                file_guard = Some(guard);
            }
            Err(err) => {
                file_setup_error = Some(format!("log dir init failed for {}: {err}", dir.display()));
            }
        }
    }

    layers.push(Box::new(filter));

    let subscriber = Registry::default().with(layers);
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("tracing subscriber already installed: {err}");
    } else if let Err(err) = tracing_log::LogTracer::init() {
        tracing::debug!("log bridge not installed: {err}");
    }
    if let Some(error) = file_setup_error {
        tracing::warn!("{error}");
    }

    LoggingGuard {
        _file_guard: file_guard,
    }
}
