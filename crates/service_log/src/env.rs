//! Environment variables understood by [`LoggerConfig::from_env`].
//!
//! Unset or empty variables take their defaults.

use crate::{ConfigurationError, Destination, Level, LoggerConfig, RecordFormat};

/// Minimum level, e.g. `debug` or `warning`. Defaults to `info`.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// `structured` (or `json`) and `colorized` (or `text`). Defaults to `structured`.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Whether records are written to the console. Defaults to `true`.
pub const LOG_CONSOLE_ENV: &str = "LOG_CONSOLE";

/// Minimum level for the console only. Unset means `LOG_LEVEL` applies alone.
pub const LOG_CONSOLE_LEVEL_ENV: &str = "LOG_CONSOLE_LEVEL";

/// Minimum level for the `LOG_DIR` file only. Unset means `LOG_LEVEL` applies alone.
pub const LOG_FILE_LEVEL_ENV: &str = "LOG_FILE_LEVEL";

/// When set, records are also written to `<LOG_DIR>/<service>.log`.
pub const LOG_DIR_ENV: &str = "LOG_DIR";

/// Whether trace identifiers are added to records. Defaults to `true`.
pub const LOG_TRACE_CONTEXT_ENV: &str = "LOG_TRACE_CONTEXT";

impl LoggerConfig {
    /// Builds a configuration for `service_name` from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if a variable holds an unrecognized value or the resulting
    /// configuration has no destination.
    pub fn from_env(service_name: impl Into<String>) -> Result<Self, ConfigurationError> {
        Self::from_lookup(service_name, |key| std::env::var(key).ok())
    }

    /// Builds a configuration for `service_name`, reading settings through `lookup`.
    ///
    /// ```
    /// use std::collections::HashMap;
    ///
    /// use service_log::{Level, LoggerConfig, RecordFormat};
    ///
    /// let vars = HashMap::from([("LOG_LEVEL", "debug"), ("LOG_FORMAT", "text")]);
    /// let config = LoggerConfig::from_lookup("api_gateway", |key| {
    ///     vars.get(key).map(|value| value.to_string())
    /// })?;
    ///
    /// assert_eq!(config.min_level, Level::Debug);
    /// assert_eq!(config.format, RecordFormat::Colorized);
    /// # Ok::<(), service_log::ConfigurationError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Same as [`LoggerConfig::from_env`].
    pub fn from_lookup<F>(
        service_name: impl Into<String>,
        lookup: F,
    ) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::new(service_name);

        if let Some(level) = get(LOG_LEVEL_ENV) {
            config.min_level = level.parse()?;
        }
        if let Some(level) = get(LOG_CONSOLE_LEVEL_ENV) {
            config.console_level = Some(level.parse()?);
        }
        if let Some(level) = get(LOG_FILE_LEVEL_ENV) {
            config.file_level = Some(level.parse()?);
        }
        if let Some(format) = get(LOG_FORMAT_ENV) {
            config.format = format.parse()?;
        }
        if let Some(inject) = get(LOG_TRACE_CONTEXT_ENV) {
            config.inject_trace_context = parse_flag(LOG_TRACE_CONTEXT_ENV, &inject)?;
        }

        config.destinations.clear();
        let console = get(LOG_CONSOLE_ENV)
            .map(|value| parse_flag(LOG_CONSOLE_ENV, &value))
            .transpose()?
            .unwrap_or(true);
        if console {
            config.destinations.push(Destination::Console);
        }
        if let Some(directory) = get(LOG_DIR_ENV) {
            let file_name = format!("{}.log", config.service_name.trim());
            config
                .destinations
                .push(Destination::File(std::path::Path::new(&directory).join(file_name)));
        }

        if config.destinations.is_empty() {
            return Err(ConfigurationError::NoDestinations);
        }
        Ok(config)
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigurationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigurationError::InvalidFlag {
            key,
            value: value.to_string(),
        }),
    }
}
