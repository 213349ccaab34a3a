pub mod logging;
pub mod trace_context;

pub use logging::init_tracing;
pub use trace_context::{current_traceparent, inject_trace_context, TRACEPARENT_HEADER};
