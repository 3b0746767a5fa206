use crate::shared::paths::get_log_dir;
use std::collections::HashMap;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Targets that get their own daily log file. Everything else goes to `system.log`.
pub const LOG_TARGETS: [&str; 4] = ["recorder", "store", "lifecycle", "capture"];

/// Must be held for the life of the process; dropping it flushes and closes the log files.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

struct TargetWriter {
    writers: HashMap<String, NonBlocking>,
    system_writer: NonBlocking,
}

impl TargetWriter {
    fn new(writers: HashMap<String, NonBlocking>, system_writer: NonBlocking) -> Self {
        Self {
            writers,
            system_writer,
        }
    }

    fn writer_for(&self, target: &str) -> &NonBlocking {
        self.writers
            .iter()
            .find(|(name, _)| target == name.as_str() || target.starts_with(&format!("{}::", name)))
            .map(|(_, writer)| writer)
            .unwrap_or(&self.system_writer)
    }
}

impl<'a> MakeWriter<'a> for TargetWriter {
    type Writer = NonBlocking;

    fn make_writer(&'a self) -> Self::Writer {
        self.system_writer.clone()
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        self.writer_for(meta.target()).clone()
    }
}

pub fn init_logging() -> LoggingGuards {
    let log_dir = get_log_dir();

    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir).expect("Failed to create logs directory");
    }

    let mut guards = Vec::new();
    let mut target_writers = HashMap::new();

    for target in LOG_TARGETS {
        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, &log_dir, format!("{}.log", target));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        target_writers.insert(target.to_string(), non_blocking);
        guards.push(guard);
    }

    let system_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "system.log");
    let (system_writer, system_guard) = tracing_appender::non_blocking(system_appender);
    guards.push(system_guard);

    let target_writer = TargetWriter::new(target_writers, system_writer);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(target_writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false),
        );

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global tracing subscriber");

    tracing::info!(target: "system", "Logging initialized at {:?}", log_dir);

    LoggingGuards { _guards: guards }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer() -> (TargetWriter, Vec<WorkerGuard>) {
        let mut guards = Vec::new();
        let mut writers = HashMap::new();
        for target in LOG_TARGETS {
            let (w, g) = tracing_appender::non_blocking(std::io::sink());
            writers.insert(target.to_string(), w);
            guards.push(g);
        }
        let (system, g) = tracing_appender::non_blocking(std::io::sink());
        guards.push(g);
        (TargetWriter::new(writers, system), guards)
    }

    #[test]
    fn test_known_targets_route_to_their_writer() {
        let (writer, _guards) = writer();
        let recorder = writer.writer_for("recorder") as *const NonBlocking;
        let nested = writer.writer_for("recorder::coordinator") as *const NonBlocking;
        let system = writer.writer_for("hyper") as *const NonBlocking;

        assert_eq!(recorder, nested);
        assert_ne!(recorder, system);
        assert_eq!(system, &writer.system_writer as *const NonBlocking);
    }

    #[test]
    fn test_prefix_without_separator_is_not_a_match() {
        let (writer, _guards) = writer();
        let fake = writer.writer_for("recorderx") as *const NonBlocking;
        assert_eq!(fake, &writer.system_writer as *const NonBlocking);
    }
}
