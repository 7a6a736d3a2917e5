//! Prometheus query client
//!
//! Only instant vector queries are needed: every metered figure is either a
//! gauge read or an `increase(...)` over a window evaluated at its end.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tally_common::{Result, TallyError};
use tracing::{debug, instrument};

/// One series of an instant vector
#[derive(Debug, Clone, Deserialize)]
pub struct PromSample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    /// `[unix_ts, "value"]`
    pub value: (f64, String),
}

impl PromSample {
    /// Parsed sample value
    pub fn as_f64(&self) -> Result<f64> {
        self.value
            .1
            .parse()
            .map_err(|_| TallyError::Metrics(format!("Non-numeric sample value {:?}", self.value.1)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromData {
    result_type: String,
    #[serde(default)]
    result: Vec<PromSample>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromResponse {
    status: String,
    #[serde(default)]
    data: Option<PromData>,
    #[serde(default)]
    error: Option<String>,
}

/// Prometheus HTTP API client
#[derive(Clone)]
pub struct PromClient {
    http: reqwest::Client,
    base_url: String,
}

impl PromClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(crate::DEFAULT_HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| TallyError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Evaluate an instant query, optionally at a fixed time
    #[instrument(skip(self))]
    pub async fn query(&self, promql: &str, at: Option<DateTime<Utc>>) -> Result<Vec<PromSample>> {
        let mut params = vec![("query", promql.to_string())];
        if let Some(at) = at {
            params.push(("time", at.timestamp().to_string()));
        }

        let response: PromResponse = self
            .http
            .get(format!("{}/api/v1/query", self.base_url))
            .query(&params)
            .send()
            .await
            .map_err(|e| TallyError::Metrics(format!("Prometheus request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| TallyError::Metrics(format!("Prometheus response undecodable: {}", e)))?;

        let samples = parse_vector(response)?;
        debug!(series = samples.len(), "Prometheus query answered");
        Ok(samples)
    }

    /// Sum of all series values, zero when the vector is empty
    pub async fn query_sum(&self, promql: &str, at: Option<DateTime<Utc>>) -> Result<f64> {
        let samples = self.query(promql, at).await?;
        samples.iter().try_fold(0.0, |acc, s| Ok(acc + s.as_f64()?))
    }

    /// `query_sum` as a whole non-negative byte/count figure
    pub async fn query_count(&self, promql: &str, at: Option<DateTime<Utc>>) -> Result<u64> {
        Ok(to_count(self.query_sum(promql, at).await?))
    }
}

fn parse_vector(response: PromResponse) -> Result<Vec<PromSample>> {
    if response.status != "success" {
        return Err(TallyError::Metrics(format!(
            "Prometheus query failed: {}",
            response.error.unwrap_or(response.status)
        )));
    }
    let data = response
        .data
        .ok_or_else(|| TallyError::Metrics("Prometheus response has no data".into()))?;
    if data.result_type != "vector" {
        return Err(TallyError::Metrics(format!(
            "Expected a vector result, got {}",
            data.result_type
        )));
    }
    Ok(data.result)
}

/// Round a counter figure to a whole count; NaN and negatives become zero
pub(crate) fn to_count(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

/// Quote a label value for a PromQL selector
pub(crate) fn label_value(raw: &str) -> String {
    let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// PromQL range selector duration for a window, at least one second
pub(crate) fn range(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!("{}s", (end - start).num_seconds().max(1))
}
