//! Per-rule reservoir: a token bucket gating how many traces/second a rule
//! may admit, plus a "borrow" mode used while the bucket's quota has expired
//! and a fresh one hasn't arrived yet.

use std::sync::Mutex;

use crate::clock::Timestamp;

/// Hard cap on tokens accrued per second while borrowing (spec.md §4.2 step 4).
const BORROW_CAP_PER_SECOND: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
struct State {
    quota: f64,
    capacity: f64,
    quota_balance: f64,
    expires_at: Timestamp,
    refreshed_at: Timestamp,
    interval: f64,
    last_tick: Option<Timestamp>,
}

/// A per-rule quota store behaving as a token bucket.
///
/// All mutation happens inside a single `Mutex`-guarded critical section
/// (`take`); there is no `.await` inside it, so it never blocks on I/O — the
/// discipline spec.md §5 requires of the decision path.
#[derive(Debug)]
pub struct Reservoir {
    state: Mutex<State>,
}

impl Reservoir {
    /// Create a reservoir with the given `capacity` (the rule's
    /// `reservoirSize`). `quota` starts at zero and `expires_at` at zero, so
    /// the reservoir begins expired (borrow mode) until the backend grants a
    /// target.
    #[must_use]
    pub fn new(capacity: f64) -> Self {
        Self {
            state: Mutex::new(State {
                quota: 0.0,
                capacity,
                quota_balance: 0.0,
                expires_at: 0.0,
                refreshed_at: 0.0,
                interval: 0.0,
                last_tick: None,
            }),
        }
    }

    /// `true` iff `now` is strictly after `expires_at` (spec.md §9(i): the
    /// boundary `now == expires_at` counts as still valid).
    #[must_use]
    pub fn expired(&self, now: Timestamp) -> bool {
        let state = self.state.lock().expect("reservoir mutex poisoned");
        now > state.expires_at
    }

    /// Attempt to consume `cost` traces of credit. See spec.md §4.2 for the
    /// full algorithm; `borrow` selects between the capped 1-token/s borrow
    /// mode and the quota-capped normal mode.
    pub fn take(&self, now: Timestamp, borrow: bool, cost: f64) -> bool {
        let mut state = self.state.lock().expect("reservoir mutex poisoned");

        if state.capacity == 0.0 {
            return false;
        }

        if state.last_tick.is_none() {
            state.last_tick = Some(now);
            state.quota_balance = if borrow { 1.0 } else { state.quota };
        }

        if state.quota_balance >= cost {
            state.quota_balance -= cost;
            return true;
        }

        let last_tick = state.last_tick.expect("set above");
        let elapsed = (now - last_tick).max(0.0);
        state.last_tick = Some(now);

        if borrow {
            state.quota_balance = (state.quota_balance + elapsed.min(BORROW_CAP_PER_SECOND))
                .min(BORROW_CAP_PER_SECOND);
        } else {
            state.quota_balance = (state.quota_balance + elapsed * state.quota).min(state.quota);
        }

        if state.quota_balance >= cost {
            state.quota_balance -= cost;
            true
        } else {
            false
        }
    }

    /// Current quota balance, for tests/introspection.
    #[must_use]
    pub fn quota_balance(&self) -> f64 {
        self.state.lock().expect("reservoir mutex poisoned").quota_balance
    }

    /// Current quota (traces/sec granted by the backend).
    #[must_use]
    pub fn quota(&self) -> f64 {
        self.state.lock().expect("reservoir mutex poisoned").quota
    }

    /// Current capacity (the rule's `reservoirSize`).
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.state.lock().expect("reservoir mutex poisoned").capacity
    }

    /// Current expiry timestamp.
    #[must_use]
    pub fn expires_at(&self) -> Timestamp {
        self.state.lock().expect("reservoir mutex poisoned").expires_at
    }

    /// Current polling interval for this rule, in seconds.
    #[must_use]
    pub fn interval(&self) -> f64 {
        self.state.lock().expect("reservoir mutex poisoned").interval
    }

    /// Timestamp the quota was last refreshed.
    #[must_use]
    pub fn refreshed_at(&self) -> Timestamp {
        self.state.lock().expect("reservoir mutex poisoned").refreshed_at
    }

    /// Apply a target update from the backend: new quota, expiry, and
    /// interval, stamping `refreshed_at = now`. Called from
    /// `Manifest::refresh_targets` under the deep-copied manifest, never on
    /// the live one directly.
    pub fn apply_target(
        &self,
        now: Timestamp,
        quota: Option<f64>,
        expires_at: Option<Timestamp>,
        interval: Option<f64>,
    ) {
        let mut state = self.state.lock().expect("reservoir mutex poisoned");
        state.refreshed_at = now;
        if let Some(quota) = quota {
            state.quota = quota;
        }
        if let Some(expires_at) = expires_at {
            state.expires_at = expires_at;
        }
        if let Some(interval) = interval {
            state.interval = interval;
        }
    }
}

impl Clone for Reservoir {
    /// Deep copy: a freshly allocated reservoir carrying over the *granted*
    /// quota fields but none of the in-flight accrual state, matching
    /// spec.md §3's "Manifest owns Rules... deep-copy... allocates fresh
    /// reservoirs" used during target reconciliation.
    fn clone(&self) -> Self {
        let state = self.state.lock().expect("reservoir mutex poisoned");
        Self {
            state: Mutex::new(State {
                last_tick: None,
                quota_balance: 0.0,
                ..*state
            }),
        }
    }
}
