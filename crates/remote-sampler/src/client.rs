//! HTTP client for the `GetSamplingRules` / `SamplingTargets` endpoints.
//!
//! Bit-exact to the backend's JSON field contract (spec.md §6): both
//! operations `POST application/json` to fixed paths under a configured base
//! URL, with a per-call timeout honoring the caller's deadline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::rule::RuleProperties;
use crate::statistics::StatisticsDocument;

/// One `SamplingRule` record as received on the wire.
#[derive(Debug, Clone, Deserialize)]
struct WireRuleProperties {
    #[serde(rename = "RuleName", default)]
    rule_name: String,
    #[serde(rename = "Priority", default)]
    priority: i64,
    #[serde(rename = "Version", default)]
    version: i64,
    #[serde(rename = "ServiceName", default = "default_star")]
    service_name: String,
    #[serde(rename = "ServiceType", default = "default_star")]
    service_type: String,
    #[serde(rename = "Host", default = "default_star")]
    host: String,
    #[serde(rename = "HTTPMethod", default = "default_star")]
    http_method: String,
    #[serde(rename = "URLPath", default = "default_star")]
    url_path: String,
    #[serde(rename = "ResourceARN", default = "default_star")]
    resource_arn: String,
    #[serde(rename = "Attributes", default)]
    attributes: HashMap<String, String>,
    #[serde(rename = "ReservoirSize", default)]
    reservoir_size: f64,
    #[serde(rename = "FixedRate", default)]
    fixed_rate: f64,
}

fn default_star() -> String {
    "*".to_string()
}

impl From<WireRuleProperties> for RuleProperties {
    fn from(w: WireRuleProperties) -> Self {
        RuleProperties {
            rule_name: w.rule_name,
            priority: w.priority,
            version: w.version,
            service_name: w.service_name,
            service_type: w.service_type,
            host: w.host,
            http_method: w.http_method,
            url_path: w.url_path,
            resource_arn: w.resource_arn,
            attributes: w.attributes,
            reservoir_size: w.reservoir_size,
            fixed_rate: w.fixed_rate,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireRuleRecord {
    #[serde(rename = "SamplingRule")]
    sampling_rule: WireRuleProperties,
}

#[derive(Debug, Deserialize)]
struct GetSamplingRulesResponse {
    #[serde(rename = "SamplingRuleRecords", default)]
    sampling_rule_records: Vec<WireRuleRecord>,
}

#[derive(Debug, Serialize)]
struct GetSamplingRulesRequest {
    #[serde(rename = "NextToken")]
    next_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireStatisticsDocument {
    #[serde(rename = "ClientID")]
    client_id: String,
    #[serde(rename = "RuleName")]
    rule_name: String,
    #[serde(rename = "RequestCount")]
    request_count: u64,
    #[serde(rename = "SampledCount")]
    sampled_count: u64,
    #[serde(rename = "BorrowCount")]
    borrow_count: u64,
    #[serde(rename = "Timestamp")]
    timestamp: f64,
}

impl From<&StatisticsDocument> for WireStatisticsDocument {
    fn from(d: &StatisticsDocument) -> Self {
        WireStatisticsDocument {
            client_id: d.client_id.clone(),
            rule_name: d.rule_name.clone(),
            request_count: d.request_count,
            sampled_count: d.sampled_count,
            borrow_count: d.borrow_count,
            timestamp: d.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
struct SamplingTargetsRequest {
    #[serde(rename = "SamplingStatisticsDocuments")]
    sampling_statistics_documents: Vec<WireStatisticsDocument>,
}

/// One updated `(fixedRate, quota, ttl, interval)` for a rule.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingTargetDocument {
    /// The rule this target applies to.
    #[serde(rename = "RuleName")]
    pub rule_name: String,
    /// The new fallback fraction for the rule.
    #[serde(rename = "FixedRate")]
    pub fixed_rate: f64,
    /// Newly granted traces/sec quota, if the backend sent one.
    #[serde(rename = "ReservoirQuota")]
    pub reservoir_quota: Option<f64>,
    /// Unix-seconds expiry of the granted quota, if sent.
    #[serde(rename = "ReservoirQuotaTTL")]
    pub reservoir_quota_ttl: Option<f64>,
    /// Seconds between statistics reports for this rule, if sent.
    #[serde(rename = "Interval")]
    pub interval: Option<i64>,
}

/// A statistics document the backend could not process for one rule.
#[derive(Debug, Clone, Deserialize)]
pub struct UnprocessedStatistics {
    /// The rule the failure applies to.
    #[serde(rename = "RuleName")]
    pub rule_name: String,
    /// Backend error code; `"5xx"` aborts the refresh, `"4xx"` forces a
    /// rules re-sync (spec.md §4.4.4 step 6).
    #[serde(rename = "ErrorCode")]
    pub error_code: String,
    /// Human-readable detail.
    #[serde(rename = "Message", default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct SamplingTargetsResponse {
    #[serde(rename = "LastRuleModification")]
    last_rule_modification: Option<f64>,
    #[serde(rename = "SamplingTargetDocuments", default)]
    sampling_target_documents: Vec<SamplingTargetDocument>,
    #[serde(rename = "UnprocessedStatistics", default)]
    unprocessed_statistics: Vec<UnprocessedStatistics>,
}

/// Parsed result of a `SamplingTargets` call.
#[derive(Debug, Clone)]
pub struct SamplingTargetsResult {
    /// Unix-seconds the backend last modified any rule, if known.
    pub last_rule_modification: Option<f64>,
    /// Updated targets, one per rule the backend had something to say about.
    pub targets: Vec<SamplingTargetDocument>,
    /// Per-rule failures the backend reported.
    pub unprocessed: Vec<UnprocessedStatistics>,
}

/// The two operations the sampling backend exposes. A trait so tests can
/// substitute a mock (`mockall`) instead of a live HTTP server.
#[async_trait]
pub trait RulesClient: Send + Sync {
    /// Fetch the current prioritized rule set.
    async fn get_sampling_rules(&self) -> Result<Vec<RuleProperties>>;

    /// Report interval statistics and receive updated targets.
    async fn sampling_targets(
        &self,
        statistics: &[StatisticsDocument],
    ) -> Result<SamplingTargetsResult>;
}

/// `reqwest`-backed implementation, POSTing to `{base}/GetSamplingRules` and
/// `{base}/SamplingTargets`.
#[derive(Debug, Clone)]
pub struct HttpRulesClient {
    http: reqwest::Client,
    base_url: reqwest::Url,
}

impl HttpRulesClient {
    /// Build a client against `base_url`, honoring `timeout` per call.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| Error::Configuration(format!("invalid endpoint {base_url:?}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build http client: {e}")))?;
        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> Result<reqwest::Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Configuration(format!("invalid path {path:?}: {e}")))
    }

    async fn post_json<Req: Serialize + Sync, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp> {
        let url = self.url(path)?;
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport {
                status: Some(status.as_u16()),
                message: format!("non-2xx response from {path}"),
            });
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| Error::Malformed(format!("invalid json from {path}: {e}")))
    }
}

#[async_trait]
impl RulesClient for HttpRulesClient {
    async fn get_sampling_rules(&self) -> Result<Vec<RuleProperties>> {
        let request = GetSamplingRulesRequest { next_token: None };
        let response: GetSamplingRulesResponse =
            self.post_json("GetSamplingRules", &request).await?;
        Ok(response
            .sampling_rule_records
            .into_iter()
            .map(|r| r.sampling_rule.into())
            .collect())
    }

    async fn sampling_targets(
        &self,
        statistics: &[StatisticsDocument],
    ) -> Result<SamplingTargetsResult> {
        let request = SamplingTargetsRequest {
            sampling_statistics_documents: statistics.iter().map(Into::into).collect(),
        };
        let response: SamplingTargetsResponse =
            self.post_json("SamplingTargets", &request).await?;
        Ok(SamplingTargetsResult {
            last_rule_modification: response.last_rule_modification,
            targets: response.sampling_target_documents,
            unprocessed: response.unprocessed_statistics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_rule_properties_default_wildcards() {
        let json = r#"{"RuleName":"r1","Version":1,"Priority":10}"#;
        let wire: WireRuleProperties = serde_json::from_str(json).unwrap();
        let props: RuleProperties = wire.into();
        assert_eq!(props.rule_name, "r1");
        assert_eq!(props.service_name, "*");
        assert_eq!(props.url_path, "*");
        assert_eq!(props.reservoir_size, 0.0);
    }

    #[test]
    fn get_sampling_rules_response_parses() {
        let json = r#"{
            "SamplingRuleRecords": [
                {"SamplingRule": {"RuleName":"r1","Version":1,"Priority":10,"FixedRate":0.05,"ReservoirSize":2}}
            ]
        }"#;
        let response: GetSamplingRulesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.sampling_rule_records.len(), 1);
        assert_eq!(response.sampling_rule_records[0].sampling_rule.rule_name, "r1");
    }

    #[test]
    fn sampling_targets_response_parses() {
        let json = r#"{
            "LastRuleModification": 15000000.0,
            "SamplingTargetDocuments": [
                {"RuleName":"r1","FixedRate":0.06,"ReservoirQuota":23,"ReservoirQuotaTTL":15000000.0,"Interval":25}
            ],
            "UnprocessedStatistics": [
                {"RuleName":"r2","ErrorCode":"500","Message":"internal error"}
            ]
        }"#;
        let response: SamplingTargetsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.sampling_target_documents.len(), 1);
        assert_eq!(response.sampling_target_documents[0].reservoir_quota, Some(23.0));
        assert_eq!(response.unprocessed_statistics.len(), 1);
        assert_eq!(response.unprocessed_statistics[0].error_code, "500");
    }

    #[test]
    fn invalid_endpoint_is_a_configuration_error() {
        let result = HttpRulesClient::new("not a url", Duration::from_secs(1));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
