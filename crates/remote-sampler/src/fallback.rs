//! The default sampler used before any rules have been fetched, and whenever
//! the manifest is expired: a shared 1-trace/s reservoir plus a 5%
//! trace-id-ratio fallback (spec.md §4.7).

use crate::clock::Timestamp;
use crate::ratio::{TraceId, TraceIdRatioSampler};
use crate::reservoir::Reservoir;
use crate::statistics::SamplingStatistics;
use crate::types::{Decision, SamplingParameters};

/// Fixed fraction used once the 1-trace/s reservoir is exhausted.
const FALLBACK_FIXED_RATE: f64 = 0.05;

/// A single reservoir/ratio pair shared by every span once the manifest is
/// unavailable. Unlike rule reservoirs, this one never expires and never
/// receives a backend-granted quota — it is permanently in borrow mode,
/// capped at one trace per second.
#[derive(Debug)]
pub struct FallbackSampler {
    reservoir: Reservoir,
    ratio: TraceIdRatioSampler,
    statistics: SamplingStatistics,
}

impl FallbackSampler {
    /// Build the fallback sampler: one-trace-per-second reservoir, 5%
    /// fixed-rate backstop.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reservoir: Reservoir::new(1.0),
            ratio: TraceIdRatioSampler::new(FALLBACK_FIXED_RATE),
            statistics: SamplingStatistics::default(),
        }
    }

    /// Decide whether to sample, always in borrow mode: at most one trace per
    /// second admitted unconditionally, everything else subject to the 5%
    /// trace-id ratio.
    pub fn sample<T>(&self, params: SamplingParameters<'_, T>, now: Timestamp) -> Decision<T> {
        self.statistics.record_matched();
        let trace_state = params.parent_trace_state;

        let sampled = if self.reservoir.take(now, true, 1.0) {
            self.statistics.record_borrowed();
            true
        } else {
            self.ratio.should_sample(&params.trace_id)
        };

        if sampled {
            self.statistics.record_sampled();
            Decision::RecordAndSample(trace_state)
        } else {
            Decision::Drop(trace_state)
        }
    }

    /// Convenience overload for callers that only have a bare trace id and no
    /// span context (e.g. the integration tests).
    #[must_use]
    pub fn should_sample_trace(&self, trace_id: &TraceId, now: Timestamp) -> bool {
        self.reservoir.take(now, true, 1.0) || self.ratio.should_sample(trace_id)
    }
}

impl Default for FallbackSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace_id(last_byte: u8) -> TraceId {
        let mut id = [0u8; 16];
        id[15] = last_byte;
        id
    }

    fn high_ratio_trace_id() -> TraceId {
        [0xFFu8; 16]
    }

    #[test]
    fn first_trace_each_second_always_samples() {
        let sampler = FallbackSampler::new();
        assert!(sampler.should_sample_trace(&trace_id(0), 1_500_000_000.0));
    }

    #[test]
    fn second_trace_in_same_second_falls_back_to_ratio() {
        let sampler = FallbackSampler::new();
        assert!(sampler.should_sample_trace(&trace_id(1), 1_500_000_000.0));
        // Exhausted the one-per-second borrow budget; a trace id whose ratio
        // hash lands above the 5% cutoff must be dropped.
        assert!(!sampler.should_sample_trace(&high_ratio_trace_id(), 1_500_000_000.0));
    }

    #[test]
    fn replenishes_after_a_second_passes() {
        let sampler = FallbackSampler::new();
        assert!(sampler.should_sample_trace(&trace_id(0), 1_500_000_000.0));
        assert!(sampler.should_sample_trace(&trace_id(0), 1_500_000_001.0));
    }
}
