//! W3C trace context propagation for outbound HTTP calls.
//!
//! See: https://www.w3.org/TR/trace-context/

use http::HeaderMap;
use opentelemetry::trace::TraceContextExt;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Formats the current span's context as a `traceparent` header value.
///
/// Returns `None` outside of a sampled span, e.g. in tests or before the
/// subscriber is installed.
pub fn current_traceparent() -> Option<String> {
    let span = Span::current();
    let context = span.context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();

    if !span_context.is_valid() {
        return None;
    }

    // version-trace_id-span_id-trace_flags, version fixed at 00
    Some(format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8()
    ))
}

/// Injects the current trace context into outbound request headers so
/// downstream services join the same trace.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    if let Some(traceparent) = current_traceparent() {
        if let Ok(value) = traceparent.parse() {
            headers.insert(TRACEPARENT_HEADER, value);
        }
    }
}
