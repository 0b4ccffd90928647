//! Process-wide tracing setup, plus [`LogCapture`] for asserting on logs in tests.

use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::subscriber::DefaultGuard;
use tracing::Level;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

const DEFAULT_FILTER: &str = "info,gambit_web=debug";

/// Output format of the process-wide subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging(format: LogFormat) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = fmt().with_env_filter(filter).with_target(true);

    match format {
        LogFormat::Pretty => tracing::subscriber::set_global_default(
            builder.with_thread_ids(true).with_line_number(true).finish(),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            builder.json().with_current_span(false).finish(),
        ),
    }
}

/// One captured event.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl LogEntry {
    /// Debug rendering of a structured field, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// A tracing layer that records every event it sees. Clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route this thread's events into the capture until the guard drops.
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(Registry::default().with(self.clone()))
    }

    /// Run `f` with capture installed and return what it logged.
    pub fn during(f: impl FnOnce()) -> Vec<LogEntry> {
        let capture = Self::new();
        {
            let _guard = capture.install();
            f();
        }
        capture.entries()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entries whose message contains `needle`.
    pub fn find(&self, needle: &str) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.message.contains(needle))
            .collect()
    }
}

impl<S: tracing::Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogEntry {
                level: *metadata.level(),
                target: metadata.target().to_string(),
                message: fields.message.unwrap_or_default(),
                fields: fields.fields,
            });
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for FieldCollector {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.store(field, value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.store(field, format!("{value:?}"));
    }
}

impl FieldCollector {
    fn store(&mut self, field: &tracing::field::Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_levels_messages_and_fields() {
        let entries = LogCapture::during(|| {
            tracing::info!(code = "ABC123", kind = "chess", "session created");
            tracing::warn!(code = "ABC123", "subscriber dropped");
        });

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, Level::INFO);
        assert_eq!(entries[0].message, "session created");
        assert_eq!(entries[0].field("code"), Some("ABC123"));
        assert_eq!(entries[0].field("kind"), Some("chess"));
        assert_eq!(entries[1].level, Level::WARN);
        assert_eq!(entries[1].field("missing"), None);
    }

    #[test]
    fn capture_only_sees_its_own_scope() {
        let capture = LogCapture::new();
        {
            let _guard = capture.install();
            tracing::debug!(turn = 3, "stale timer ignored");
            tracing::info!("session created");
        }
        tracing::debug!("stale timer ignored");

        let stale = capture.find("stale timer");
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].level, Level::DEBUG);
        assert_eq!(stale[0].field("turn"), Some("3"));
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
