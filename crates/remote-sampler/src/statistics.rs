//! Per-rule sampling statistics: lock-free counters plus the document shape
//! reported to, and reset by, a targets refresh.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::Timestamp;

/// Per-rule request counters. All three are always mutated via atomic
/// primitives, matching the `Counter`-style atomics in
/// `cratos-core::utils::metrics::types` — no lock needed on the fast path.
#[derive(Debug, Default)]
pub struct SamplingStatistics {
    matched_requests: AtomicU64,
    sampled_requests: AtomicU64,
    borrowed_requests: AtomicU64,
}

/// The per-rule statistics document sent in a statistics report.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsDocument {
    /// This sampler instance's client id (hex-encoded).
    pub client_id: String,
    /// The rule this document reports on.
    pub rule_name: String,
    /// Requests that matched the rule during the interval.
    pub request_count: u64,
    /// Requests sampled via the reservoir (normal mode) or the fixed-rate
    /// fallback during the interval.
    pub sampled_count: u64,
    /// Requests admitted via reservoir borrow mode during the interval.
    pub borrow_count: u64,
    /// Unix-seconds timestamp the snapshot was taken.
    pub timestamp: Timestamp,
}

impl SamplingStatistics {
    /// Record a span that matched this rule.
    pub fn record_matched(&self) {
        self.matched_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a span admitted via reservoir borrow mode.
    pub fn record_borrowed(&self) {
        self.borrowed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a span sampled (reservoir normal mode, or trace-id-ratio
    /// fallback).
    pub fn record_sampled(&self) {
        self.sampled_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Current matched-requests count, without resetting it.
    #[must_use]
    pub fn matched(&self) -> u64 {
        self.matched_requests.load(Ordering::Relaxed)
    }

    /// Atomically swap all three counters to zero and return a document
    /// built from the pre-swap values, stamped with `client_id`/`rule_name`/
    /// `now`. Concurrent increments that land between the three individual
    /// swaps may be attributed to the next interval instead of this one —
    /// an accepted statistical imprecision (spec.md §5).
    pub fn snapshot(&self, client_id: &str, rule_name: &str, now: Timestamp) -> StatisticsDocument {
        StatisticsDocument {
            client_id: client_id.to_string(),
            rule_name: rule_name.to_string(),
            request_count: self.matched_requests.swap(0, Ordering::Relaxed),
            sampled_count: self.sampled_requests.swap(0, Ordering::Relaxed),
            borrow_count: self.borrowed_requests.swap(0, Ordering::Relaxed),
            timestamp: now,
        }
    }
}
