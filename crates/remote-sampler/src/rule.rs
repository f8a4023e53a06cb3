//! A single sampling rule: its immutable backend-defined properties, its
//! reservoir, and its interval statistics.

use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Timestamp;
use crate::matcher::wildcard_match;
use crate::ratio::TraceIdRatioSampler;
use crate::reservoir::Reservoir;
use crate::statistics::{SamplingStatistics, StatisticsDocument};
use crate::types::{Decision, SamplingParameters};

/// Immutable payload describing one rule, as received from the backend.
/// Identity is `rule_name`; `version` must equal `1` or the rule is rejected
/// at refresh time (spec.md §3, §4.4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct RuleProperties {
    /// Unique, non-empty rule name.
    pub rule_name: String,
    /// Lower values are higher priority.
    pub priority: i64,
    /// Must equal `1`.
    pub version: i64,
    pub service_name: String,
    pub service_type: String,
    pub host: String,
    pub http_method: String,
    pub url_path: String,
    /// Reserved; currently unused by the matcher (spec.md §9(iii)).
    pub resource_arn: String,
    /// Attribute-key → wildcard-pattern. Keys are unique.
    pub attributes: HashMap<String, String>,
    /// Traces/sec the reservoir starts with capacity for.
    pub reservoir_size: f64,
    /// Fallback fraction used once the reservoir can't admit a trace.
    pub fixed_rate: f64,
}

impl RuleProperties {
    /// `true` iff this rule is well-formed enough to load: non-empty name
    /// and `version == 1` (spec.md §4.4.2).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.rule_name.is_empty() && self.version == 1
    }

    /// Evaluates the five matcher clauses of spec.md §4.3.1 in order,
    /// short-circuiting on the first failure.
    #[must_use]
    pub fn applies_to<T>(&self, params: &SamplingParameters<'_, T>) -> bool {
        for (key, pattern) in &self.attributes {
            match params.span_attributes.get(key) {
                Some(value) if wildcard_match(pattern, value) => {}
                _ => return false,
            }
        }

        if !wildcard_match(&self.service_name, params.service_name) {
            return false;
        }
        if !wildcard_match(&self.service_type, params.cloud_platform) {
            return false;
        }
        let http_method = params.http_attribute("http.method").unwrap_or_default();
        if !wildcard_match(&self.http_method, http_method) {
            return false;
        }
        let http_host = params.http_attribute("http.host").unwrap_or_default();
        if !wildcard_match(&self.host, http_host) {
            return false;
        }

        let path = params
            .http_attribute("http.url")
            .or_else(|| params.http_attribute("http.target"))
            .unwrap_or_default();
        wildcard_match(&self.url_path, path)
    }
}

/// A rule's properties, reservoir, and interval statistics, bundled so the
/// decision path can read them under a single lock acquisition (the
/// manifest's) and then operate on each independently (spec.md §3
/// ownership notes).
#[derive(Debug)]
pub struct Rule {
    properties: RuleProperties,
    reservoir: Reservoir,
    statistics: Arc<SamplingStatistics>,
}

impl Rule {
    /// Construct a rule with a fresh reservoir (`capacity = reservoir_size`)
    /// and empty statistics — the shape used when building rules from a
    /// rules refresh before reservoir/statistics preservation is applied.
    #[must_use]
    pub fn new(properties: RuleProperties) -> Self {
        let reservoir = Reservoir::new(properties.reservoir_size);
        Self {
            properties,
            reservoir,
            statistics: Arc::new(SamplingStatistics::default()),
        }
    }

    /// Deep-copy this rule: a freshly allocated (independent, value-copied)
    /// `Reservoir`, but the *same* statistics counters (shared `Arc`), so
    /// that stats reset as part of target reconciliation are visible on the
    /// live rule even if the reconciliation itself is later discarded on
    /// error (spec.md §3 ownership notes, §4.4.4 step 1-2).
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self {
            properties: self.properties.clone(),
            reservoir: self.reservoir.clone(),
            statistics: Arc::clone(&self.statistics),
        }
    }

    /// The rule's immutable properties.
    #[must_use]
    pub fn properties(&self) -> &RuleProperties {
        &self.properties
    }

    /// The rule's reservoir.
    #[must_use]
    pub fn reservoir(&self) -> &Reservoir {
        &self.reservoir
    }

    /// The rule's interval statistics.
    #[must_use]
    pub fn statistics(&self) -> &SamplingStatistics {
        &self.statistics
    }

    /// Update `fixed_rate` from a targets response. Only this single field
    /// of `properties` is mutable post-construction (spec.md §4.4.4 step 5);
    /// everything else about a rule's identity is replaced wholesale on a
    /// rules refresh instead.
    pub fn set_fixed_rate(&mut self, fixed_rate: f64) {
        self.properties.fixed_rate = fixed_rate;
    }

    /// `true` iff this rule matches the given span (spec.md §4.3.1).
    #[must_use]
    pub fn applies_to<T>(&self, params: &SamplingParameters<'_, T>) -> bool {
        self.properties.applies_to(params)
    }

    /// Run the decision algorithm of spec.md §4.3.2.
    pub fn sample<T>(&self, params: SamplingParameters<'_, T>, now: Timestamp) -> Decision<T> {
        self.statistics.record_matched();

        let trace_state = params.parent_trace_state;
        let sampled = if self.reservoir.expired(now) {
            if self.reservoir.take(now, true, 1.0) {
                self.statistics.record_borrowed();
                true
            } else {
                let ratio = TraceIdRatioSampler::new(self.properties.fixed_rate);
                ratio.should_sample(&params.trace_id)
            }
        } else if self.reservoir.take(now, false, 1.0) {
            true
        } else {
            let ratio = TraceIdRatioSampler::new(self.properties.fixed_rate);
            ratio.should_sample(&params.trace_id)
        };

        if sampled {
            self.statistics.record_sampled();
            Decision::RecordAndSample(trace_state)
        } else {
            Decision::Drop(trace_state)
        }
    }

    /// `true` iff this rule has matched at least once since its last
    /// statistics snapshot and its polling interval has elapsed (spec.md
    /// §4.3.3).
    #[must_use]
    pub fn stale(&self, now: Timestamp) -> bool {
        self.statistics.matched() != 0 && now >= self.reservoir.refreshed_at() + self.reservoir.interval()
    }

    /// Atomically reset this rule's statistics and return the document to
    /// report.
    #[must_use]
    pub fn snapshot(&self, client_id: &str, now: Timestamp) -> StatisticsDocument {
        self.statistics.snapshot(client_id, &self.properties.rule_name, now)
    }
}
