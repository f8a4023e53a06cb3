//! The full set of sampling rules this client knows about: a prioritized,
//! sorted rule sequence plus the bookkeeping needed to refresh it from, and
//! report statistics to, the sampling backend.

use std::sync::{Arc, RwLock};

use rand::RngCore;
use tracing::warn;

use crate::client::{RulesClient, SamplingTargetsResult};
use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::rule::{Rule, RuleProperties};
use crate::statistics::StatisticsDocument;
use crate::types::SamplingParameters;

#[cfg(test)]
mod tests;

/// A manifest is considered expired, and the fallback sampler takes over,
/// this long after its last successful rules refresh (spec.md §4.4.3).
const MANIFEST_TTL: Timestamp = 3600.0;

/// Default cadence of the background targets poller, in seconds.
const DEFAULT_TARGETS_POLLING_INTERVAL: f64 = 10.0;

#[derive(Debug)]
struct ManifestState {
    rules: Vec<Arc<Rule>>,
    refreshed_at: Timestamp,
    targets_polling_interval: f64,
}

/// Result of a target-reconciliation pass, reported back to the caller so it
/// can decide whether to force an out-of-band rules refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetsOutcome {
    /// Targets applied cleanly; no further action needed.
    Applied,
    /// The backend reported rules are stale (an `UnprocessedStatistics` 4xx,
    /// or `LastRuleModification` newer than this manifest's refresh time);
    /// the caller should force a rules refresh on its next cycle.
    RulesStale,
}

/// The prioritized, shared rule set backing `RemoteSampler`.
///
/// The rule sequence, and this manifest's own refresh timestamp, live behind
/// a single `RwLock` (spec.md §5): readers on the decision path take a brief
/// read lock to clone the `Arc<Rule>` sequence, then evaluate matches lock-free
/// against their own clones.
#[derive(Debug)]
pub struct Manifest {
    state: RwLock<ManifestState>,
    client_id: String,
}

impl Manifest {
    /// Build an empty manifest with a freshly generated client id (12 random
    /// bytes, hex-encoded — spec.md §11).
    #[must_use]
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            state: RwLock::new(ManifestState {
                rules: Vec::new(),
                refreshed_at: 0.0,
                targets_polling_interval: DEFAULT_TARGETS_POLLING_INTERVAL,
            }),
            client_id: hex::encode(bytes),
        }
    }

    /// This sampler instance's client id, sent with every statistics report.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Default cadence for the background targets poller, before any targets
    /// response has updated it.
    #[must_use]
    pub fn default_targets_polling_interval() -> f64 {
        DEFAULT_TARGETS_POLLING_INTERVAL
    }

    /// The targets poller's current cadence: the default until the first
    /// targets response carries per-rule intervals, after which it's the
    /// minimum positive `reservoir.interval()` across all rules (spec.md
    /// §4.4.4 step 8). Read under lock on each poller tick since it can
    /// change underneath the poller (spec.md §4.6).
    #[must_use]
    pub fn targets_polling_interval(&self) -> f64 {
        self.state.read().expect("manifest lock poisoned").targets_polling_interval
    }

    /// `true` once `MANIFEST_TTL` seconds have passed since the last
    /// successful rules refresh; callers should fall back to the default
    /// sampler rather than trust a stale rule set (spec.md §4.4.3).
    #[must_use]
    pub fn expired(&self, now: Timestamp) -> bool {
        let state = self.state.read().expect("manifest lock poisoned");
        state.rules.is_empty() || now > state.refreshed_at + MANIFEST_TTL
    }

    /// Find the highest-priority rule matching `params`, evaluating the
    /// sequence in `(priority, rule_name)` order and returning the first hit
    /// (spec.md §4.3.1, §4.4.1).
    #[must_use]
    pub fn match_against<T>(&self, params: &SamplingParameters<'_, T>) -> Option<Arc<Rule>> {
        let state = self.state.read().expect("manifest lock poisoned");
        state.rules.iter().find(|rule| rule.applies_to(params)).cloned()
    }

    /// Rules currently due for a statistics report (spec.md §4.3.3): matched
    /// at least once since their last report, and past their own interval.
    #[must_use]
    pub fn stale_rules(&self, now: Timestamp) -> Vec<Arc<Rule>> {
        let state = self.state.read().expect("manifest lock poisoned");
        state.rules.iter().filter(|r| r.stale(now)).cloned().collect()
    }

    /// Replace the rule sequence from a `GetSamplingRules` response.
    ///
    /// Invalid records (spec.md §4.4.2: empty name, `version != 1`) are
    /// dropped. A record whose name matches a live rule *and* whose
    /// properties are identical reuses the live `Arc<Rule>` verbatim,
    /// preserving its reservoir and statistics; anything else — a changed
    /// rule or a brand new one — gets a fresh `Rule` with an empty reservoir
    /// (spec.md §4.4.4 step 1-2). The result is sorted `(priority ASC,
    /// rule_name ASC)` and swapped in under a single write-lock acquisition.
    pub fn refresh_rules(&self, records: Vec<RuleProperties>, now: Timestamp) {
        let mut valid = Vec::with_capacity(records.len());
        for record in records {
            if record.is_valid() {
                valid.push(record);
            } else if record.rule_name.is_empty() {
                warn!(version = record.version, "dropping rule with empty name");
            } else {
                warn!(
                    rule_name = %record.rule_name,
                    version = record.version,
                    "dropping rule with unsupported version"
                );
            }
        }
        valid.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.rule_name.cmp(&b.rule_name)));

        let mut state = self.state.write().expect("manifest lock poisoned");
        let rules = valid
            .into_iter()
            .map(|props| {
                match state.rules.iter().find(|r| r.properties().rule_name == props.rule_name) {
                    Some(existing) if existing.properties() == &props => Arc::clone(existing),
                    _ => Arc::new(Rule::new(props)),
                }
            })
            .collect();
        state.rules = rules;
        state.refreshed_at = now;
    }

    /// Report interval statistics for every stale rule and apply whatever
    /// targets the backend sends back.
    ///
    /// Per spec.md §4.4.4: if no rule is due for a report, this is a no-op —
    /// the backend is never called. Otherwise, statistics are snapshotted
    /// (and thus reset) on the live rules directly — since `Rule::statistics`
    /// is an `Arc` shared with any in-flight deep copy, this is safe
    /// regardless of how the update is ultimately applied. A `5xx` entry in
    /// `UnprocessedStatistics` aborts the whole refresh with an error before
    /// anything is applied (spec.md §7); otherwise each targeted rule is
    /// rebuilt via `Rule::deep_copy` with the new
    /// quota/expiry/interval/fixed-rate applied to the copy, and the whole
    /// sequence is swapped into the live manifest under one write-lock
    /// acquisition — untargeted rules keep their existing `Arc` unchanged.
    pub async fn refresh_targets(
        &self,
        client: &dyn RulesClient,
        now: Timestamp,
    ) -> Result<TargetsOutcome> {
        let stale = self.stale_rules(now);
        if stale.is_empty() {
            return Ok(TargetsOutcome::Applied);
        }
        let documents: Vec<StatisticsDocument> =
            stale.iter().map(|r| r.snapshot(&self.client_id, now)).collect();

        let SamplingTargetsResult {
            last_rule_modification,
            targets,
            unprocessed,
        } = client.sampling_targets(&documents).await?;

        if let Some(failed) = unprocessed.iter().find(|u| u.error_code.starts_with('5')) {
            return Err(Error::Backend(format!(
                "rule {:?} reported a server-side failure ({}): {}",
                failed.rule_name, failed.error_code, failed.message
            )));
        }

        let mut min_interval = None;
        {
            let mut state = self.state.write().expect("manifest lock poisoned");
            let updated: Vec<Arc<Rule>> = state
                .rules
                .iter()
                .map(|rule| {
                    match targets.iter().find(|t| t.rule_name == rule.properties().rule_name) {
                        Some(target) => {
                            let mut copy = rule.deep_copy();
                            copy.reservoir().apply_target(
                                now,
                                target.reservoir_quota,
                                target.reservoir_quota_ttl,
                                target.interval.map(|i| i as f64),
                            );
                            copy.set_fixed_rate(target.fixed_rate);
                            Arc::new(copy)
                        }
                        None => Arc::clone(rule),
                    }
                })
                .collect();

            for rule in &updated {
                let interval = rule.reservoir().interval();
                if interval > 0.0 {
                    min_interval = Some(min_interval.map_or(interval, |m: f64| m.min(interval)));
                }
            }

            state.rules = updated;
            if let Some(interval) = min_interval {
                state.targets_polling_interval = interval;
            }
        }

        let rules_stale = unprocessed.iter().any(|u| u.error_code.starts_with('4'))
            || last_rule_modification.is_some_and(|t| {
                let state = self.state.read().expect("manifest lock poisoned");
                t > state.refreshed_at
            });

        Ok(if rules_stale {
            TargetsOutcome::RulesStale
        } else {
            TargetsOutcome::Applied
        })
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}
