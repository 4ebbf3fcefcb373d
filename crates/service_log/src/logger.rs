//! Logger construction and the emit path.

use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
};

use rustc_hash::FxHashSet;
use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::{
    ConfigurationError, Destination, Fields, Level, LogRecord, RecordFormat, SpanTraceContext,
    TraceContextProvider,
    destination::{self, DestinationLevels, OpenDestination, WriteOutcome},
    keys,
};

/// Configuration of a [`Logger`], fixed at construction.
#[derive(Debug)]
pub struct LoggerConfig {
    /// Name of the service, written as `service` in every record.
    pub service_name: String,

    /// Records below this level are discarded without being rendered.
    pub min_level: Level,

    /// Where records are written. Must not be empty.
    pub destinations: Vec<Destination>,

    /// Minimum level for the console destination, applied on top of `min_level`.
    pub console_level: Option<Level>,

    /// Minimum level for file and rolling-file destinations, applied on top of `min_level`.
    pub file_level: Option<Level>,

    /// Output format shared by all destinations.
    pub format: RecordFormat,

    /// Whether the active trace's identifiers are added to records.
    pub inject_trace_context: bool,

    /// Fields included in every record, such as the deployment environment or version.
    /// They take precedence over caller fields with the same name and must not use reserved
    /// keys.
    pub static_fields: Map<String, Value>,
}

impl LoggerConfig {
    /// Creates a configuration writing structured records of level `INFO` and above to the
    /// console, with trace injection enabled.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            min_level: Level::Info,
            destinations: vec![Destination::Console],
            console_level: None,
            file_level: None,
            format: RecordFormat::Structured,
            inject_trace_context: true,
            static_fields: Map::new(),
        }
    }
}

/// Counters describing what happened to the records of a [`Logger`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoggerStats {
    /// Destination writes that succeeded, including retried ones.
    pub written: u64,

    /// Writes that failed once and were retried.
    pub retried: u64,

    /// Writes that failed twice; the record was dropped for that destination.
    pub dropped: u64,

    /// Field values replaced by their textual form because they could not be serialized.
    pub serialization_fallbacks: u64,

    /// Caller fields ignored because they used a reserved or static key.
    pub reserved_key_collisions: u64,

    /// The most recent write failure, if any.
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    written: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    serialization_fallbacks: AtomicU64,
    reserved_key_collisions: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Counters {
    fn record_error(&self, error: String) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }
}

/// Wall clock that never goes backwards for one logger.
#[derive(Debug, Default)]
struct Clock {
    last_unix_nanos: AtomicI64,
}

impl Clock {
    fn now(&self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        let Ok(nanos) = i64::try_from(now.unix_timestamp_nanos()) else {
            return now;
        };

        let previous = self.last_unix_nanos.fetch_max(nanos, Ordering::AcqRel);
        if previous > nanos {
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(previous)).unwrap_or(now)
        } else {
            now
        }
    }
}

struct LoggerInner {
    service: Arc<str>,
    min_level: Level,
    format: RecordFormat,
    static_fields: Map<String, Value>,
    trace_context: Option<Arc<dyn TraceContextProvider>>,
    destinations: Vec<OpenDestination>,
    clock: Clock,
    counters: Counters,
    warned_keys: Mutex<FxHashSet<String>>,
}

/// A per-service logger.
///
/// Cloning is cheap and clones share destinations and statistics. Emitting never fails and
/// never panics: write failures are retried once and then counted in [`Logger::stats`].
/// Destination handles are released when the last clone is dropped or closed.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("service", &self.inner.service)
            .field("min_level", &self.inner.min_level)
            .field("format", &self.inner.format)
            .field("inject_trace_context", &self.inner.trace_context.is_some())
            .field("destinations", &self.inner.destinations)
            .finish_non_exhaustive()
    }
}

/// Creates a logger for `service_name` that writes records of `min_level` and above to every
/// destination in `destinations`, reading trace context from the current `tracing` span.
///
/// # Errors
///
/// Returns [`ConfigurationError`] if the service name is empty, no destination is given, or a
/// file destination cannot be opened.
pub fn create_logger(
    service_name: impl Into<String>,
    min_level: Level,
    destinations: impl IntoIterator<Item = Destination>,
    format: RecordFormat,
) -> Result<Logger, ConfigurationError> {
    Logger::new(LoggerConfig {
        min_level,
        destinations: destinations.into_iter().collect(),
        format,
        ..LoggerConfig::new(service_name)
    })
}

impl Logger {
    /// Creates a logger reading trace context from the current `tracing` span
    /// (see [`SpanTraceContext`]).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if the configuration is invalid or a destination cannot be
    /// opened.
    pub fn new(config: LoggerConfig) -> Result<Self, ConfigurationError> {
        Self::with_trace_context(config, Arc::new(SpanTraceContext))
    }

    /// Creates a logger reading trace context from `provider`.
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use service_log::{Destination, Logger, LoggerConfig, TraceSpan};
    ///
    /// let mut config = LoggerConfig::new("product_service");
    /// config.destinations = vec![Destination::Console];
    ///
    /// let provider = Arc::new(|| TraceSpan::from_raw(0x4bf9_2f35_77b3_4da6, 0x00f0_67aa));
    /// let logger = Logger::with_trace_context(config, provider)?;
    /// logger.info("Listing products", None);
    /// # Ok::<(), service_log::ConfigurationError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if the configuration is invalid or a destination cannot be
    /// opened.
    pub fn with_trace_context(
        config: LoggerConfig,
        provider: Arc<dyn TraceContextProvider>,
    ) -> Result<Self, ConfigurationError> {
        let service_name = config.service_name.trim();
        if service_name.is_empty() {
            return Err(ConfigurationError::EmptyServiceName);
        }

        if let Some(key) = config
            .static_fields
            .keys()
            .find(|key| keys::is_reserved(key))
        {
            return Err(ConfigurationError::ReservedStaticField(key.clone()));
        }

        let levels = DestinationLevels {
            console: config.console_level,
            file: config.file_level,
        };
        let destinations = destination::open_all(config.destinations, config.format, levels)?;

        Ok(Self {
            inner: Arc::new(LoggerInner {
                service: Arc::from(service_name),
                min_level: config.min_level,
                format: config.format,
                static_fields: config.static_fields,
                trace_context: config.inject_trace_context.then_some(provider),
                destinations,
                clock: Clock::default(),
                counters: Counters::default(),
                warned_keys: Mutex::new(FxHashSet::default()),
            }),
        })
    }

    /// The service name written into every record.
    pub fn service_name(&self) -> &str {
        &self.inner.service
    }

    /// The minimum level that is written.
    pub fn min_level(&self) -> Level {
        self.inner.min_level
    }

    /// Returns `true` if records of `level` would be written.
    pub fn enabled(&self, level: Level) -> bool {
        level >= self.inner.min_level
    }

    /// Emits a `DEBUG` record.
    pub fn debug(&self, message: impl Into<String>, extra: impl Into<Option<Fields>>) {
        self.log(Level::Debug, message, extra);
    }

    /// Emits an `INFO` record.
    pub fn info(&self, message: impl Into<String>, extra: impl Into<Option<Fields>>) {
        self.log(Level::Info, message, extra);
    }

    /// Emits a `WARNING` record.
    pub fn warning(&self, message: impl Into<String>, extra: impl Into<Option<Fields>>) {
        self.log(Level::Warning, message, extra);
    }

    /// Emits an `ERROR` record.
    pub fn error(&self, message: impl Into<String>, extra: impl Into<Option<Fields>>) {
        self.log(Level::Error, message, extra);
    }

    /// Emits a `CRITICAL` record.
    pub fn critical(&self, message: impl Into<String>, extra: impl Into<Option<Fields>>) {
        self.log(Level::Critical, message, extra);
    }

    /// Emits a record of `level` with the caller's `extra` fields.
    ///
    /// Records below the minimum level are discarded before anything is built. Otherwise the
    /// record is stamped with the current time and active trace, rendered, and written to every
    /// destination before this call returns.
    pub fn log(&self, level: Level, message: impl Into<String>, extra: impl Into<Option<Fields>>) {
        if !self.enabled(level) {
            return;
        }
        let inner = &*self.inner;

        let mut fields = extra.into().unwrap_or_default();
        inner.counters.serialization_fallbacks.fetch_add(
            to_u64(fields.serialization_fallbacks()),
            Ordering::Relaxed,
        );
        inner.note_collisions(&fields);
        for (key, value) in &inner.static_fields {
            fields.insert_value(key.clone(), value.clone());
        }

        let mut record = LogRecord {
            timestamp: inner.clock.now(),
            level,
            service: Arc::clone(&inner.service),
            message: message.into(),
            fields,
            trace: None,
        };
        if let Some(provider) = &inner.trace_context {
            record.trace = provider.current();
        }

        let mut plain = None;
        let mut coloured = None;
        for destination in inner.destinations.iter().filter(|d| d.accepts(level)) {
            let line = if destination.ansi() {
                coloured.get_or_insert_with(|| inner.format.render(&record, true))
            } else {
                plain.get_or_insert_with(|| inner.format.render(&record, false))
            };
            inner.write(destination, line);
        }
    }

    /// Returns a snapshot of the logger's counters.
    pub fn stats(&self) -> LoggerStats {
        let counters = &self.inner.counters;
        LoggerStats {
            written: counters.written.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            serialization_fallbacks: counters.serialization_fallbacks.load(Ordering::Relaxed),
            reserved_key_collisions: counters.reserved_key_collisions.load(Ordering::Relaxed),
            last_error: counters
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Flushes every destination and releases this handle.
    ///
    /// Destinations are closed once the last clone of the logger is closed or dropped. Flush
    /// failures are recorded in [`LoggerStats::last_error`].
    pub fn close(self) {
        for destination in &self.inner.destinations {
            if let Err(error) = destination.flush() {
                *self
                    .inner
                    .counters
                    .last_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
            }
        }
    }
}

impl LoggerInner {
    fn write(&self, destination: &OpenDestination, line: &[u8]) {
        match destination.write_line(line) {
            Ok(outcome) => {
                if outcome == WriteOutcome::WrittenOnRetry {
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                }
                self.counters.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
                self.counters.record_error(error.to_string());
            }
        }
    }

    /// Counts caller fields that will be ignored and warns once per key.
    fn note_collisions(&self, fields: &Fields) {
        for (key, _) in fields.iter() {
            if !keys::is_reserved(key) && !self.static_fields.contains_key(key) {
                continue;
            }
            self.counters
                .reserved_key_collisions
                .fetch_add(1, Ordering::Relaxed);

            let first_time = self
                .warned_keys
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.to_string());
            if first_time {
                tracing::warn!(
                    service = %self.service,
                    "Attempting to log a reserved key `{key}` via extra fields. Skipping."
                );
            }
        }
    }
}

fn to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
