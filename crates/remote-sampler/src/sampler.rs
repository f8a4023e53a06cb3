//! `RemoteSampler`: the public entry point wiring a `Manifest`, a
//! `RulesClient`, and a `FallbackSampler` into a background-refreshed
//! sampling decision.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{HttpRulesClient, RulesClient};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::fallback::FallbackSampler;
use crate::manifest::{Manifest, TargetsOutcome};
use crate::types::{Decision, SamplingParameters};

/// Human-readable identifier returned by `RemoteSampler::description`.
const DESCRIPTION: &str = "RemoteSampler{remote ruleset with local fallback}";

/// Builder for `RemoteSampler`'s construction-time parameters.
///
/// Mirrors the `with_*` builder idiom used by this workspace's other runtime
/// configuration structs (e.g. retry/circuit-breaker configs): every field
/// has a sensible default, and callers override only what they need.
#[derive(Debug, Clone)]
pub struct RemoteSamplerConfig {
    endpoint: String,
    sampling_rules_polling_interval: Duration,
    service_name: String,
    cloud_platform: String,
    request_timeout: Duration,
}

impl RemoteSamplerConfig {
    /// Start a config pointed at `endpoint`, with every other field at its
    /// default (300s rules-polling interval, "unknown" service name/cloud
    /// platform, 10s request timeout).
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            sampling_rules_polling_interval: Duration::from_secs(300),
            service_name: "unknown".to_string(),
            cloud_platform: "unknown".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Override how often the rules set is re-fetched from the backend.
    #[must_use]
    pub fn with_sampling_rules_polling_interval(mut self, interval: Duration) -> Self {
        self.sampling_rules_polling_interval = interval;
        self
    }

    /// Set the resource-level service name attached to every `GetSamplingRules`
    /// match and `SamplingTargets` report.
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the resource-level cloud platform identifier.
    #[must_use]
    pub fn with_cloud_platform(mut self, platform: impl Into<String>) -> Self {
        self.cloud_platform = platform.into();
        self
    }

    /// Override the per-request HTTP timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Configuration("endpoint must not be empty".to_string()));
        }
        reqwest::Url::parse(&self.endpoint)
            .map_err(|e| Error::Configuration(format!("invalid endpoint {:?}: {e}", self.endpoint)))?;
        if self.sampling_rules_polling_interval.is_zero() {
            return Err(Error::Configuration(
                "sampling_rules_polling_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Centralized adaptive sampler with a remotely managed ruleset.
///
/// Two background tasks keep the manifest current: a rules poller
/// (`sampling_rules_polling_interval`, default 300s) and a targets poller
/// (the manifest's own interval, default 10s) both jittered by up to ±10%
/// so that many sampler instances don't thunder the backend in lockstep.
/// Both stop on `shutdown()` (spec.md §11: graceful shutdown via
/// `CancellationToken`, following this workspace's scheduler engine).
pub struct RemoteSampler {
    manifest: Arc<Manifest>,
    fallback: FallbackSampler,
    clock: Arc<dyn Clock>,
    service_name: String,
    cloud_platform: String,
    shutdown: CancellationToken,
    rules_task: JoinHandle<()>,
    targets_task: JoinHandle<()>,
}

impl RemoteSampler {
    /// Validate `config`, start the background pollers, and return a sampler
    /// ready to make decisions. The fallback sampler is active immediately;
    /// remote rules take over once the first rules fetch succeeds.
    pub fn new(config: RemoteSamplerConfig) -> Result<Self> {
        config.validate()?;
        let client = HttpRulesClient::new(&config.endpoint, config.request_timeout)?;
        Self::with_client(config, Arc::new(client))
    }

    /// Same as `new`, but with an explicit `RulesClient` — the seam tests use
    /// to substitute a mock instead of a live HTTP server.
    pub fn with_client(config: RemoteSamplerConfig, client: Arc<dyn RulesClient>) -> Result<Self> {
        Self::with_client_and_clock(config, client, Arc::new(SystemClock))
    }

    /// Same as `with_client`, but with an explicit `Clock` too — the seam
    /// tests use to pin time with `ManualClock` instead of the real wall
    /// clock (spec.md §9: "All time reads go through a trait... so tests can
    /// pin time").
    pub fn with_client_and_clock(
        config: RemoteSamplerConfig,
        client: Arc<dyn RulesClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let manifest = Arc::new(Manifest::new());
        let shutdown = CancellationToken::new();

        let rules_task = spawn_rules_poller(
            Arc::clone(&manifest),
            Arc::clone(&client),
            Arc::clone(&clock),
            config.sampling_rules_polling_interval,
            shutdown.clone(),
        );
        let targets_task = spawn_targets_poller(
            Arc::clone(&manifest),
            Arc::clone(&client),
            Arc::clone(&clock),
            shutdown.clone(),
        );

        Ok(Self {
            manifest,
            fallback: FallbackSampler::new(),
            clock,
            service_name: config.service_name,
            cloud_platform: config.cloud_platform,
            shutdown,
            rules_task,
            targets_task,
        })
    }

    /// Decide whether a span should be recorded and sampled.
    ///
    /// Delegates to the manifest's matched rule when one is available and
    /// the manifest isn't expired; otherwise falls back to the shared
    /// 1-trace/s + 5% sampler (spec.md §4.6).
    pub fn should_sample<T>(&self, params: SamplingParameters<'_, T>) -> Decision<T> {
        let now = self.clock.now();
        if !self.manifest.expired(now) {
            if let Some(rule) = self.manifest.match_against(&params) {
                return rule.sample(params, now);
            }
        }
        self.fallback.sample(params, now)
    }

    /// A constant, human-readable description of this sampler.
    #[must_use]
    pub fn description(&self) -> &'static str {
        DESCRIPTION
    }

    /// This sampler instance's client id, as reported in statistics documents.
    #[must_use]
    pub fn client_id(&self) -> &str {
        self.manifest.client_id()
    }

    /// The service name attached to every rules match and targets report.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The cloud platform identifier attached to every rules match.
    #[must_use]
    pub fn cloud_platform(&self) -> &str {
        &self.cloud_platform
    }

    /// Signal both background pollers to stop and wait for them to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.rules_task.await;
        let _ = self.targets_task.await;
    }
}

/// Multiply `interval` by a random factor in `[0.9, 1.1]`, so that many
/// sampler instances polling the same backend don't all wake up in lockstep
/// (spec.md §11: jitter via `rand`, a deliberate deviation from this
/// workspace's nanosecond-modulo jitter elsewhere).
fn jittered(interval: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    interval.mul_f64(factor)
}

/// Fetch the current rule set once and apply it to `manifest`, logging
/// either a `debug!` on success or a `warn!` on transport failure.
async fn fetch_and_apply_rules(client: &dyn RulesClient, manifest: &Manifest, clock: &dyn Clock) {
    match client.get_sampling_rules().await {
        Ok(records) => {
            debug!(count = records.len(), "rules refreshed");
            manifest.refresh_rules(records, clock.now());
        }
        Err(e) => warn!(error = %e, "rules refresh failed, keeping current manifest"),
    }
}

fn spawn_rules_poller(
    manifest: Arc<Manifest>,
    client: Arc<dyn RulesClient>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("rules poller starting");

        // spec.md §4.6: "First tick fires shortly after startup" — fetch
        // once immediately so the manifest isn't sitting empty/expired for
        // a full `interval` before the first scheduled tick.
        tokio::select! {
            () = fetch_and_apply_rules(client.as_ref(), &manifest, clock.as_ref()) => {}
            _ = shutdown.cancelled() => {
                info!("rules poller shutting down");
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(jittered(interval)) => {
                    fetch_and_apply_rules(client.as_ref(), &manifest, clock.as_ref()).await;
                }
                _ = shutdown.cancelled() => {
                    info!("rules poller shutting down");
                    break;
                }
            }
        }
    })
}

fn spawn_targets_poller(
    manifest: Arc<Manifest>,
    client: Arc<dyn RulesClient>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("targets poller starting");
        loop {
            let interval = jittered(Duration::from_secs_f64(manifest.targets_polling_interval()));
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match manifest.refresh_targets(client.as_ref(), clock.now()).await {
                        Ok(TargetsOutcome::RulesStale) => {
                            debug!("targets report requested a rules refresh");
                            if let Ok(records) = client.get_sampling_rules().await {
                                manifest.refresh_rules(records, clock.now());
                            }
                        }
                        Ok(TargetsOutcome::Applied) => {}
                        Err(e) => error!(error = %e, "targets refresh failed"),
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("targets poller shutting down");
                    break;
                }
            }
        }
    })
}
