//! In-memory writers used by the unit tests.

use std::{
    io::{self, Write},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use tracing_subscriber::fmt::MakeWriter;

/// A cloneable in-memory destination.
#[derive(Clone, Debug, Default)]
pub(crate) struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
    /// Maximum bytes accepted per `write` call; `0` means unlimited.
    chunk: usize,
    /// Bytes accepted before failures start.
    healthy_bytes: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
}

impl SharedBuffer {
    /// Accepts at most `chunk` bytes per `write` call, so a record needs several calls.
    pub(crate) fn chunked(chunk: usize) -> Self {
        Self {
            chunk,
            ..Self::default()
        }
    }

    /// Fails the first `failures` writes.
    pub(crate) fn failing(failures: usize) -> Self {
        Self {
            failures_left: Arc::new(AtomicUsize::new(failures)),
            ..Self::default()
        }
    }

    /// Accepts `accepted` bytes, then fails the next `failures` writes.
    pub(crate) fn failing_after(accepted: usize, failures: usize) -> Self {
        Self {
            healthy_bytes: Arc::new(AtomicUsize::new(accepted)),
            ..Self::failing(failures)
        }
    }

    pub(crate) fn contents(&self) -> String {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

pub(crate) struct BufferWriter(SharedBuffer);

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let budget = self.0.healthy_bytes.load(Ordering::SeqCst);
        if budget == 0 {
            let failed = self
                .0
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failed {
                return Err(io::Error::other("disk full"));
            }
        }

        let mut len = match self.0.chunk {
            0 => buf.len(),
            chunk => buf.len().min(chunk),
        };
        if budget > 0 {
            len = len.min(budget);
            self.0.healthy_bytes.fetch_sub(len, Ordering::SeqCst);
        }

        let accepted = buf.get(..len).unwrap_or(buf);
        self.0
            .bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(accepted);
        std::thread::yield_now();
        Ok(accepted.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriter(self.clone())
    }
}
