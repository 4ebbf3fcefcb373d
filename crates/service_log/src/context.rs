//! Read access to the distributed trace that is active while a record is emitted.
//!
//! The logger never creates or changes trace state. It asks a [`TraceContextProvider`] for the
//! current [`TraceSpan`] once per record and copies the identifiers into it.

mod layer;

pub use self::layer::{SpanTraceContext, TraceContextLayer};

/// Identifiers of the trace and span that are current at a point in time.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TraceSpan {
    trace_id: String,
    span_id: String,
}

impl TraceSpan {
    /// Creates a trace span from already formatted identifiers.
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
        }
    }

    /// Creates a trace span from numeric OpenTelemetry identifiers, formatted as 32 and 16
    /// lowercase hex digits.
    ///
    /// Returns `None` if either identifier is zero, which OpenTelemetry uses for "no span".
    pub fn from_raw(trace_id: u128, span_id: u64) -> Option<Self> {
        if trace_id == 0 || span_id == 0 {
            return None;
        }
        Some(Self::new(
            format!("{trace_id:032x}"),
            format!("{span_id:016x}"),
        ))
    }

    /// Parses a W3C `traceparent` header such as
    /// `00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01`.
    ///
    /// The parent id of the header becomes the span id. Malformed headers and all-zero
    /// identifiers yield `None`.
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        if parts.next().is_some()
            || !is_hex(version, 2)
            || version == "ff"
            || !is_hex(flags, 2)
            || !is_hex(trace_id, 32)
            || !is_hex(span_id, 16)
            || is_unset(trace_id)
            || is_unset(span_id)
        {
            return None;
        }

        Some(Self::new(
            trace_id.to_ascii_lowercase(),
            span_id.to_ascii_lowercase(),
        ))
    }

    /// The trace identifier.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// The span identifier.
    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    /// Formats the identifiers as a sampled W3C `traceparent` header value.
    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }
}

fn is_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Empty and all-zero identifiers mean "no trace" and are never emitted.
pub(crate) fn is_unset(id: &str) -> bool {
    id.bytes().all(|b| b == b'0')
}

/// Capability to read the trace that is active for the calling thread or task.
///
/// Implementations must be cheap and must not fail: "nothing active" is reported as `None`.
/// Any `Fn() -> Option<TraceSpan>` closure is a provider, which makes it easy to pass an
/// explicitly threaded request context instead of ambient state.
pub trait TraceContextProvider: Send + Sync {
    /// Returns the active trace span, if any.
    fn current(&self) -> Option<TraceSpan>;
}

impl<F> TraceContextProvider for F
where
    F: Fn() -> Option<TraceSpan> + Send + Sync,
{
    fn current(&self) -> Option<TraceSpan> {
        self()
    }
}

/// A provider that never reports an active trace.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTraceContext;

impl TraceContextProvider for NoTraceContext {
    fn current(&self) -> Option<TraceSpan> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_ids_are_zero_padded_hex() {
        let span = TraceSpan::from_raw(0x4bf9_2f35, 0xf067_aa0b).expect("non-zero ids");

        assert_eq!(span.trace_id(), "0000000000000000000000004bf92f35");
        assert_eq!(span.span_id(), "00000000f067aa0b");
    }

    #[test]
    fn zero_raw_ids_mean_no_trace() {
        assert_eq!(TraceSpan::from_raw(0, 1), None);
        assert_eq!(TraceSpan::from_raw(1, 0), None);
    }

    #[test]
    fn traceparent_is_parsed() {
        let span =
            TraceSpan::from_traceparent("00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01")
                .expect("valid header");

        assert_eq!(span.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(span.span_id(), "00f067aa0ba902b7");
        assert_eq!(
            span.traceparent(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
        );
    }

    #[test]
    fn invalid_traceparents_are_rejected() {
        for header in [
            "",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "00-4bf92f3577b34da6a3ce929d0e0e473-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e473g-00f067aa0ba902b7-01",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        ] {
            assert_eq!(TraceSpan::from_traceparent(header), None, "{header}");
        }
    }

    #[test]
    fn closures_are_providers() {
        let provider = || Some(TraceSpan::new("T1", "S1"));

        assert_eq!(provider.current(), Some(TraceSpan::new("T1", "S1")));
        assert_eq!(NoTraceContext.current(), None);
    }
}
