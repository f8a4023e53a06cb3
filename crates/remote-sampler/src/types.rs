//! Request/response shapes shared across the decision path.
//!
//! The tracing SDK's own span-context / trace-state representation is
//! treated as an opaque carrier (spec.md §1): the sampler never inspects it,
//! only copies it verbatim from the parent context into the returned
//! `Decision`. It is modeled as a generic type parameter rather than a
//! concrete SDK type so this crate has no dependency on any particular
//! tracing SDK.

use std::collections::HashMap;

use crate::ratio::TraceId;

/// Everything the decision path needs about one span.
#[derive(Debug, Clone)]
pub struct SamplingParameters<'a, T = ()> {
    /// 16-byte trace identifier (X-Ray style: first 4 bytes timestamp, last
    /// 8 random).
    pub trace_id: TraceId,
    /// Span attributes, keyed by attribute name. Must include
    /// `http.host`/`http.method`/`http.url`/`http.target` when those are
    /// known, since rule matching special-cases them (spec.md §4.3.1).
    pub span_attributes: &'a HashMap<String, String>,
    /// Resource-level service name (from the process's resource
    /// description).
    pub service_name: &'a str,
    /// Resource-level cloud platform identifier.
    pub cloud_platform: &'a str,
    /// Opaque carrier copied verbatim into the returned `Decision`.
    pub parent_trace_state: T,
}

impl<'a, T> SamplingParameters<'a, T> {
    /// Read a recognized HTTP attribute (`http.host`, `http.method`,
    /// `http.url`, `http.target`) from the span attribute map.
    #[must_use]
    pub fn http_attribute(&self, name: &str) -> Option<&str> {
        self.span_attributes.get(name).map(String::as_str)
    }
}

/// The sampling decision. Carries the same opaque trace-state `T` that was
/// passed in on `SamplingParameters`, copied verbatim per spec.md §4.3.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<T = ()> {
    /// The span should not be recorded.
    Drop(T),
    /// The span should be recorded and marked sampled.
    RecordAndSample(T),
}

impl<T> Decision<T> {
    /// `true` if this decision is `RecordAndSample`.
    #[must_use]
    pub fn is_sampled(&self) -> bool {
        matches!(self, Decision::RecordAndSample(_))
    }

    /// Unwrap the carried trace state regardless of which variant this is.
    pub fn into_trace_state(self) -> T {
        match self {
            Decision::Drop(t) | Decision::RecordAndSample(t) => t,
        }
    }
}
