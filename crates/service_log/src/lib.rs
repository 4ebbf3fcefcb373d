//! `service_log` provides per-service structured logging with distributed trace correlation.
//!
//! It offers:
//! - A [`Logger`] built once per process by [`create_logger`] or [`Logger::new`], with one emit
//!   method per [`Level`].
//! - Two interchangeable output formats ([`RecordFormat`]): single-line JSON for log
//!   aggregation and colorized text for humans.
//! - Automatic injection of the active trace's `trace_id` and `span_id` into every record,
//!   read through a [`TraceContextProvider`]. The default provider, [`SpanTraceContext`], reads
//!   identifiers that [`TraceContextLayer`] attaches to `tracing` spans.
//! - Console, file and rotating-file [`Destination`]s, with per-record atomic writes.
//!
//! Logging never fails the caller: only construction can return an error
//! ([`ConfigurationError`]); write failures are retried once and then counted in
//! [`LoggerStats`].
//!
//! # Example
//!
//! ```
//! use service_log::{Destination, Fields, Level, RecordFormat, create_logger};
//!
//! let logger = create_logger(
//!     "order_service",
//!     Level::Info,
//!     [Destination::Console],
//!     RecordFormat::Structured,
//! )?;
//!
//! logger.debug("not written", None);
//! logger.info("Order created", Fields::new().with("order_id", 42));
//! # Ok::<(), service_log::ConfigurationError>(())
//! ```

mod context;
mod destination;
mod env;
mod format;
mod level;
mod logger;
mod record;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;

pub use tracing_appender::rolling::Rotation;

pub use self::{
    context::{
        NoTraceContext, SpanTraceContext, TraceContextLayer, TraceContextProvider, TraceSpan,
    },
    destination::{Destination, RollingFileConfig},
    env::{
        LOG_CONSOLE_ENV, LOG_CONSOLE_LEVEL_ENV, LOG_DIR_ENV, LOG_FILE_LEVEL_ENV, LOG_FORMAT_ENV,
        LOG_LEVEL_ENV, LOG_TRACE_CONTEXT_ENV,
    },
    format::RecordFormat,
    level::Level,
    logger::{Logger, LoggerConfig, LoggerStats, create_logger},
    record::{Fields, LogRecord},
};

mod keys {
    use std::sync::LazyLock;

    use rustc_hash::FxHashSet;

    pub(crate) const TIMESTAMP: &str = "timestamp";
    pub(crate) const LEVEL: &str = "level";
    pub(crate) const SERVICE: &str = "service";
    pub(crate) const MESSAGE: &str = "message";
    pub(crate) const TRACE_ID: &str = "trace_id";
    pub(crate) const SPAN_ID: &str = "span_id";

    /// Key used by [`Fields::with_error`](crate::Fields::with_error); not reserved.
    pub(crate) const ERROR: &str = "err";

    /// Keys written by the logger itself; caller fields can never override them.
    pub(crate) static RESERVED_KEYS: LazyLock<FxHashSet<&'static str>> = LazyLock::new(|| {
        [TIMESTAMP, LEVEL, SERVICE, MESSAGE, TRACE_ID, SPAN_ID]
            .iter()
            .copied()
            .collect()
    });

    pub(crate) fn is_reserved(key: &str) -> bool {
        RESERVED_KEYS.contains(key)
    }
}

/// Errors that can occur while constructing a [`Logger`].
///
/// This is the only error surfaced by the crate; failures while emitting records are absorbed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// The service name is empty or whitespace.
    #[error("Configuration error: service name must not be empty")]
    EmptyServiceName,

    /// No destination was configured.
    #[error("Configuration error: at least one log destination is required")]
    NoDestinations,

    /// A file destination does not end in a (UTF-8) file name.
    #[error("Configuration error: log file path `{}` does not name a file", .0.display())]
    InvalidFileName(PathBuf),

    /// A log file or its directory could not be created or opened.
    #[error("Configuration error: failed to open log file `{}`: {source}", path.display())]
    FileDestination {
        /// The file or directory that could not be opened.
        path: PathBuf,

        /// The underlying error from the file appender.
        #[source]
        source: tracing_appender::rolling::InitError,
    },

    /// A static field uses one of the keys written by the logger itself.
    #[error(
        "Configuration error: a reserved key `{0}` was included in the static fields of the logger"
    )]
    ReservedStaticField(String),

    /// A level name could not be parsed.
    #[error("Configuration error: unknown log level `{0}`")]
    InvalidLevel(String),

    /// A format name could not be parsed.
    #[error("Configuration error: unknown log format `{0}`")]
    InvalidFormat(String),

    /// A boolean environment setting has an unrecognized value.
    #[error("Configuration error: `{key}` must be a boolean, got `{value}`")]
    InvalidFlag {
        /// The setting name.
        key: &'static str,

        /// The rejected value.
        value: String,
    },
}
