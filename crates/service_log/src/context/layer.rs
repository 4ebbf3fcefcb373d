//! Ambient trace context carried by `tracing` spans.
//!
//! [`TraceContextLayer`] stores a [`TraceSpan`] in the extensions of every span that declares
//! (or inherits) `trace_id` and `span_id` fields. [`SpanTraceContext`] reads it back for the
//! span that is current when a record is emitted.

use std::fmt;

use tracing::{
    Span, Subscriber,
    field::{Field, Visit},
    span::{Attributes, Id, Record},
};
use tracing_subscriber::{
    Layer, Registry,
    layer::Context,
    registry::{LookupSpan, SpanData},
};

use super::{TraceContextProvider, TraceSpan, is_unset};
use crate::keys;

/// A [`tracing_subscriber::Layer`] that attaches trace identifiers to spans.
///
/// A span is traced when it declares string (or display) fields named `trace_id` and `span_id`,
/// either at creation or later through [`Span::record`]. Spans that declare neither inherit the
/// identifiers of their parent; a span that declares only `span_id` keeps its parent's trace id.
///
/// ```
/// use service_log::{SpanTraceContext, TraceContextLayer, TraceContextProvider};
/// use tracing_subscriber::layer::SubscriberExt;
///
/// let subscriber = tracing_subscriber::registry().with(TraceContextLayer);
/// tracing::subscriber::with_default(subscriber, || {
///     let span = tracing::info_span!(
///         "request",
///         trace_id = "4bf92f3577b34da6a3ce929d0e0e4736",
///         span_id = "00f067aa0ba902b7",
///     );
///     let _entered = span.enter();
///
///     let current = SpanTraceContext.current().expect("span is traced");
///     assert_eq!(current.span_id(), "00f067aa0ba902b7");
/// });
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceContextLayer;

/// Trace identifiers declared directly on a span.
#[derive(Clone, Debug, Default)]
struct DeclaredIds {
    trace_id: Option<String>,
    span_id: Option<String>,
}

impl DeclaredIds {
    fn set(&mut self, field: &Field, value: String) {
        if is_unset(&value) {
            return;
        }
        match field.name() {
            keys::TRACE_ID => self.trace_id = Some(value),
            keys::SPAN_ID => self.span_id = Some(value),
            _ => (),
        }
    }

    /// Numeric ids are formatted as zero-padded lowercase hex, 32 digits for traces and 16 for
    /// spans. Negative values and span ids wider than 64 bits are ignored.
    fn set_numeric(&mut self, field: &Field, value: u128) {
        let formatted = match field.name() {
            keys::TRACE_ID => format!("{value:032x}"),
            keys::SPAN_ID => match u64::try_from(value) {
                Ok(span_id) => format!("{span_id:016x}"),
                Err(_) => return,
            },
            _ => return,
        };
        self.set(field, formatted);
    }

    fn is_empty(&self) -> bool {
        self.trace_id.is_none() && self.span_id.is_none()
    }

    fn merge(&mut self, later: Self) {
        if later.trace_id.is_some() {
            self.trace_id = later.trace_id;
        }
        if later.span_id.is_some() {
            self.span_id = later.span_id;
        }
    }

    /// Combines the declared ids with the ones inherited from the parent span.
    fn resolve(&self, inherited: Option<&TraceSpan>) -> Option<TraceSpan> {
        let trace_id = self
            .trace_id
            .as_deref()
            .or_else(|| inherited.map(TraceSpan::trace_id))?;
        let span_id = self
            .span_id
            .as_deref()
            .or_else(|| inherited.map(TraceSpan::span_id))?;
        Some(TraceSpan::new(trace_id, span_id))
    }
}

impl Visit for DeclaredIds {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.set_numeric(field, u128::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if let Ok(value) = u128::try_from(value) {
            self.set_numeric(field, value);
        }
    }

    fn record_u128(&mut self, field: &Field, value: u128) {
        self.set_numeric(field, value);
    }

    fn record_i128(&mut self, field: &Field, value: i128) {
        if let Ok(value) = u128::try_from(value) {
            self.set_numeric(field, value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if matches!(field.name(), keys::TRACE_ID | keys::SPAN_ID) {
            self.set(field, format!("{value:?}"));
        }
    }
}

impl<S> Layer<S> for TraceContextLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let mut declared = DeclaredIds::default();
        attrs.record(&mut declared);

        let inherited = span
            .parent()
            .and_then(|parent| parent.extensions().get::<TraceSpan>().cloned());
        let resolved = declared.resolve(inherited.as_ref());

        let mut extensions = span.extensions_mut();
        if !declared.is_empty() {
            extensions.insert(declared);
        }
        if let Some(trace_span) = resolved {
            extensions.insert(trace_span);
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let mut recorded = DeclaredIds::default();
        values.record(&mut recorded);
        if recorded.is_empty() {
            return;
        }

        let inherited = span
            .parent()
            .and_then(|parent| parent.extensions().get::<TraceSpan>().cloned());

        // Child spans created before this call keep the identifiers they already resolved.
        let mut extensions = span.extensions_mut();
        let mut declared = extensions.remove::<DeclaredIds>().unwrap_or_default();
        declared.merge(recorded);

        let resolved = declared.resolve(inherited.as_ref());
        extensions.insert(declared);
        if let Some(trace_span) = resolved {
            extensions.remove::<TraceSpan>();
            extensions.insert(trace_span);
        }
    }
}

/// Reads the [`TraceSpan`] of the current `tracing` span.
///
/// Requires the default subscriber to be built on a [`Registry`] with a [`TraceContextLayer`];
/// with any other subscriber, or outside of a traced span, no trace is reported.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpanTraceContext;

impl TraceContextProvider for SpanTraceContext {
    fn current(&self) -> Option<TraceSpan> {
        Span::current()
            .with_subscriber(|(id, dispatch)| {
                dispatch
                    .downcast_ref::<Registry>()
                    .and_then(|registry| registry.span_data(id))
                    .and_then(|data| data.extensions().get::<TraceSpan>().cloned())
            })
            .flatten()
    }
}
