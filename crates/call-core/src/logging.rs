//! Tracing setup and the per-call span layout
//!
//! Every orchestrator operation runs inside a `call` span carrying `op`,
//! `call_id` and, when an acting participant is known, `participant`. Lines
//! logged underneath it by the store, relay or state machine inherit those
//! fields, so one call can be followed by filtering on `call_id`.

use serde::{Deserialize, Serialize};
use tracing::field::{self, Empty};
use tracing::{Span, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::{self as tracing_fmt, MakeWriter};
use tracing_subscriber::EnvFilter;

use crate::errors::{CallError, Result};
use crate::types::{CallId, ParticipantId};

/// Name of the span opened around each orchestrator operation
pub const CALL_SPAN: &str = "call";

/// Directives used when neither the config nor `RUST_LOG` says otherwise
pub const DEFAULT_FILTER: &str = "callhub_call_core=info";

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives. `RUST_LOG` wins when set.
    pub filter: String,
    /// One JSON object per line, with the current call span's fields
    pub json: bool,
    /// Emit a line with busy/idle timings when each call span closes
    pub span_timing: bool,
    /// Colour the text format
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
            span_timing: false,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_span_timing(mut self) -> Self {
        self.span_timing = true;
        self
    }

    pub fn without_ansi(mut self) -> Self {
        self.ansi = false;
        self
    }

    pub fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.filter)
            .map_err(|e| CallError::config(format!("Invalid log filter {:?}: {}", self.filter, e)))
    }

    pub fn validate(&self) -> Result<()> {
        self.env_filter().map(|_| ())
    }
}

/// Open the span an orchestrator operation runs in
pub fn call_span(op: &'static str, call_id: &CallId, participant: Option<&ParticipantId>) -> Span {
    let span = tracing::info_span!(CALL_SPAN, op, call_id = %call_id, participant = Empty);
    if let Some(participant) = participant {
        span.record("participant", field::display(participant));
    }
    span
}

/// Build a subscriber writing to `writer`, without installing it
pub fn build_subscriber<W>(config: &LoggingConfig, writer: W) -> Result<Box<dyn Subscriber + Send + Sync>>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let span_events = if config.span_timing {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let builder = tracing_fmt::Subscriber::builder()
        .with_env_filter(config.env_filter()?)
        .with_span_events(span_events)
        .with_ansi(config.ansi && !config.json)
        .with_writer(writer);

    let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json {
        Box::new(
            builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .finish(),
        )
    } else {
        Box::new(builder.finish())
    };
    Ok(subscriber)
}

/// Install the global subscriber on stdout.
///
/// Fails with `CallError::Config` on a bad filter or if a subscriber is
/// already installed.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let mut config = config.clone();
    if let Ok(directives) = std::env::var(EnvFilter::DEFAULT_ENV) {
        config.filter = directives;
    }

    let subscriber = build_subscriber(&config, std::io::stdout)?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| CallError::config(format!("Logging already initialized: {}", e)))?;

    tracing::info!("Starting callhub call core v{}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
