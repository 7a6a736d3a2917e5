//! Object storage metering via MinIO's Prometheus metrics
//!
//! MinIO exports per-bucket usage gauges and traffic counters labelled with
//! the bucket name. Buckets belong to an account when their name starts with
//! `<account>-`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_common::{BucketUsage, ObjectStorage, Result};
use tracing::instrument;

use crate::prometheus::{label_value, range, PromClient};

const OBJECTS_METRIC: &str = "minio_bucket_usage_object_total";
const BYTES_METRIC: &str = "minio_bucket_usage_total_bytes";
const SENT_METRIC: &str = "minio_bucket_traffic_sent_bytes";

/// Object storage collaborator backed by Prometheus
pub struct PromObjectStorage {
    prom: PromClient,
    /// `instance` label of the MinIO deployment
    instance: String,
}

impl PromObjectStorage {
    pub fn new(prom: PromClient, instance: impl Into<String>) -> Self {
        Self {
            prom,
            instance: instance.into(),
        }
    }

    fn selector(&self, bucket: Option<&str>) -> String {
        match bucket {
            Some(b) => format!(
                "{{instance={},bucket={}}}",
                label_value(&self.instance),
                label_value(b)
            ),
            None => format!("{{instance={}}}", label_value(&self.instance)),
        }
    }
}

/// Buckets named `<account>-...`, deduplicated and sorted
fn owned_buckets<'a>(account: &str, names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let prefix = format!("{}-", account);
    names
        .filter(|name| name.starts_with(&prefix))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[async_trait]
impl ObjectStorage for PromObjectStorage {
    #[instrument(skip(self))]
    async fn list_buckets(&self, account: &str) -> Result<Vec<String>> {
        let series = self
            .prom
            .query(&format!("{}{}", OBJECTS_METRIC, self.selector(None)), None)
            .await?;
        Ok(owned_buckets(
            account,
            series
                .iter()
                .filter_map(|s| s.metric.get("bucket").map(String::as_str)),
        ))
    }

    async fn bucket_usage(&self, bucket: &str) -> Result<BucketUsage> {
        let selector = self.selector(Some(bucket));
        let objects = self
            .prom
            .query_count(&format!("sum({}{})", OBJECTS_METRIC, selector), None)
            .await?;
        let bytes = self
            .prom
            .query_count(&format!("sum({}{})", BYTES_METRIC, selector), None)
            .await?;
        Ok(BucketUsage { bytes, objects })
    }

    async fn egress_bytes(&self, bucket: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64> {
        let promql = format!(
            "sum(increase({}{}[{}]))",
            SENT_METRIC,
            self.selector(Some(bucket)),
            range(start, end)
        );
        self.prom.query_count(&promql, Some(end)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_buckets() {
        let names = ["alice-assets", "alice-logs", "alicex-other", "bob-assets", "alice-assets"];
        assert_eq!(
            owned_buckets("alice", names.into_iter()),
            vec!["alice-assets".to_string(), "alice-logs".to_string()]
        );
    }

    #[test]
    fn test_selector() {
        let storage = PromObjectStorage::new(PromClient::new("http://prom:9090").unwrap(), "minio:9000");
        assert_eq!(storage.selector(None), r#"{instance="minio:9000"}"#);
        assert_eq!(
            storage.selector(Some("alice-assets")),
            r#"{instance="minio:9000",bucket="alice-assets"}"#
        );
    }
}
