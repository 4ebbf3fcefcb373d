//! Log destinations and the write path shared by all of them.

use std::{
    ffi::OsStr,
    fmt,
    io::{self, IsTerminal, Write},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use rustc_hash::FxHashSet;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::{MakeWriter, writer::BoxMakeWriter};

use crate::{ConfigurationError, Level, RecordFormat};

/// Where a [`Logger`][crate::Logger] writes its records.
#[derive(Debug)]
pub enum Destination {
    /// Standard output. Colorized records are only coloured when stdout is a terminal.
    Console,

    /// A single file, opened in append mode. Missing parent directories are created.
    File(PathBuf),

    /// A file rotated on a time basis.
    RollingFile(RollingFileConfig),

    /// Any [`MakeWriter`], for example an in-memory buffer or a socket.
    Writer(BoxMakeWriter),
}

impl Destination {
    /// Creates a [`Destination::Writer`] from any [`MakeWriter`].
    pub fn writer<M>(make_writer: M) -> Self
    where
        M: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        Self::Writer(BoxMakeWriter::new(make_writer))
    }
}

/// Configuration of a rotating log file.
#[derive(Clone, Debug)]
pub struct RollingFileConfig {
    /// Directory where log files will be stored.
    pub directory: PathBuf,

    /// Prefix for log file names.
    pub file_name_prefix: String,

    /// Rotation strategy for log files.
    pub rotation: Rotation,

    /// Maximum number of log files to keep. If `None`, all files are kept.
    pub max_log_files: Option<NonZeroUsize>,
}

impl RollingFileConfig {
    /// Daily rotation of `<directory>/<file_name_prefix>.<date>` files, keeping all of them.
    pub fn daily(directory: impl Into<PathBuf>, file_name_prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            file_name_prefix: file_name_prefix.into(),
            rotation: Rotation::DAILY,
            max_log_files: None,
        }
    }
}

/// A single failed write, after the retry.
#[derive(Debug, thiserror::Error)]
#[error("Failed to write log record to {destination}: {source}")]
pub(crate) struct DestinationWriteError {
    destination: String,
    #[source]
    source: io::Error,
}

/// How a successful write went.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    Written,
    WrittenOnRetry,
}

/// An opened destination.
///
/// Writes are serialized by `lock`. A record is fully rendered before the lock is taken and is
/// handed to the writer as one buffer, so concurrent records cannot interleave.
pub(crate) struct OpenDestination {
    label: String,
    writer: BoxMakeWriter,
    ansi: bool,
    min_level: Option<Level>,
    lock: Mutex<()>,
}

impl fmt::Debug for OpenDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenDestination")
            .field("label", &self.label)
            .field("ansi", &self.ansi)
            .field("min_level", &self.min_level)
            .finish_non_exhaustive()
    }
}

impl OpenDestination {
    fn new(label: String, writer: BoxMakeWriter, ansi: bool, min_level: Option<Level>) -> Self {
        Self {
            label,
            writer,
            ansi,
            min_level,
            lock: Mutex::new(()),
        }
    }

    /// Whether records for this destination should carry colour codes.
    pub(crate) fn ansi(&self) -> bool {
        self.ansi
    }

    /// Whether records of `level` are written here.
    pub(crate) fn accepts(&self, level: Level) -> bool {
        self.min_level.is_none_or(|min_level| level >= min_level)
    }

    /// Writes one rendered record, retrying once on failure.
    ///
    /// The retry resumes after the bytes the writer already accepted, so a partial first attempt
    /// never duplicates the start of the record. If the retry fails too, a fragment is terminated
    /// with a newline so the next record starts on its own line.
    pub(crate) fn write_line(&self, line: &[u8]) -> Result<WriteOutcome, DestinationWriteError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut written = 0;

        if self.write_from(line, &mut written).is_ok() {
            return Ok(WriteOutcome::Written);
        }
        self.write_from(line, &mut written)
            .map(|()| WriteOutcome::WrittenOnRetry)
            .map_err(|source| {
                if written > 0 {
                    let mut writer = self.writer.make_writer();
                    let _ = writer.write_all(b"\n").and_then(|()| writer.flush());
                }
                DestinationWriteError {
                    destination: self.label.clone(),
                    source,
                }
            })
    }

    pub(crate) fn flush(&self) -> Result<(), DestinationWriteError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.writer
            .make_writer()
            .flush()
            .map_err(|source| DestinationWriteError {
                destination: self.label.clone(),
                source,
            })
    }

    /// Writes `line` starting at `*written`, advancing it by every byte the writer accepts.
    fn write_from(&self, line: &[u8], written: &mut usize) -> io::Result<()> {
        let mut writer = self.writer.make_writer();
        while let Some(rest) = line.get(*written..).filter(|rest| !rest.is_empty()) {
            match writer.write(rest) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(accepted) => *written = written.saturating_add(accepted),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
        writer.flush()
    }
}

/// Per-destination thresholds, applied on top of the logger's minimum level.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct DestinationLevels {
    pub(crate) console: Option<Level>,
    pub(crate) file: Option<Level>,
}

/// Opens every destination, skipping repeated `Console` entries and files that resolve to a file
/// that is already open.
pub(crate) fn open_all(
    destinations: Vec<Destination>,
    format: RecordFormat,
    levels: DestinationLevels,
) -> Result<Vec<OpenDestination>, ConfigurationError> {
    if destinations.is_empty() {
        return Err(ConfigurationError::NoDestinations);
    }

    let mut console_opened = false;
    let mut opened_files = FxHashSet::default();
    let mut opened_rolling_files = FxHashSet::default();
    let mut opened = Vec::with_capacity(destinations.len());

    for destination in destinations {
        match destination {
            Destination::Console => {
                if std::mem::replace(&mut console_opened, true) {
                    continue;
                }
                let ansi = format.supports_ansi() && io::stdout().is_terminal();
                opened.push(OpenDestination::new(
                    "console".to_string(),
                    BoxMakeWriter::new(io::stdout),
                    ansi,
                    levels.console,
                ));
            }
            Destination::File(path) => {
                let (resolved, writer) = open_file(&path)?;
                if !opened_files.insert(resolved) {
                    continue;
                }
                opened.push(OpenDestination::new(
                    format!("file `{}`", path.display()),
                    writer,
                    false,
                    levels.file,
                ));
            }
            Destination::RollingFile(config) => {
                let writer = open_rolling_file(&config)?;
                let resolved = resolve(&config.directory, &config.file_name_prefix);
                if !opened_rolling_files.insert(resolved) {
                    continue;
                }
                opened.push(OpenDestination::new(
                    format!(
                        "rolling file `{}`",
                        config.directory.join(&config.file_name_prefix).display()
                    ),
                    writer,
                    false,
                    levels.file,
                ));
            }
            Destination::Writer(writer) => {
                opened.push(OpenDestination::new("writer".to_string(), writer, false, None));
            }
        }
    }

    Ok(opened)
}

/// `directory/file_name` with `directory` canonicalized, so different spellings of one file
/// compare equal. The directory exists once its appender has been built.
fn resolve(directory: &Path, file_name: &str) -> PathBuf {
    std::fs::canonicalize(directory)
        .unwrap_or_else(|_| directory.to_path_buf())
        .join(file_name)
}

fn open_file(path: &Path) -> Result<(PathBuf, BoxMakeWriter), ConfigurationError> {
    let file_name = path
        .file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| ConfigurationError::InvalidFileName(path.to_path_buf()))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(directory)
        .map_err(|source| ConfigurationError::FileDestination {
            path: path.to_path_buf(),
            source,
        })?;

    Ok((resolve(directory, file_name), BoxMakeWriter::new(appender)))
}

fn open_rolling_file(config: &RollingFileConfig) -> Result<BoxMakeWriter, ConfigurationError> {
    let mut builder = RollingFileAppender::builder()
        .rotation(config.rotation.clone())
        .filename_prefix(config.file_name_prefix.clone());

    if let Some(max_log_files) = config.max_log_files {
        builder = builder.max_log_files(usize::from(max_log_files));
    }

    let appender =
        builder
            .build(&config.directory)
            .map_err(|source| ConfigurationError::FileDestination {
                path: config.directory.clone(),
                source,
            })?;

    Ok(BoxMakeWriter::new(appender))
}
