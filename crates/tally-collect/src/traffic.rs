//! Per-entity traffic counters via Prometheus
//!
//! Expects a cumulative sent-bytes counter labelled with `namespace`,
//! `type` and `name`, the same identity the meter records samples under.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_common::{EntityIdentity, Result, TenantId, TrafficSource};
use tracing::instrument;

use crate::prometheus::{label_value, range, PromClient};

/// Default counter name
pub const DEFAULT_TRAFFIC_METRIC: &str = "traffic_sent_bytes";

/// Traffic collaborator backed by Prometheus
pub struct PromTraffic {
    prom: PromClient,
    metric: String,
}

impl PromTraffic {
    pub fn new(prom: PromClient, metric: impl Into<String>) -> Self {
        Self {
            prom,
            metric: metric.into(),
        }
    }

    fn promql(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tenant: &TenantId,
        entity: &EntityIdentity,
    ) -> String {
        format!(
            "sum(increase({}{{namespace={},type={},name={}}}[{}]))",
            self.metric,
            label_value(tenant.as_str()),
            label_value(entity.kind.as_str()),
            label_value(&entity.name),
            range(start, end)
        )
    }
}

#[async_trait]
impl TrafficSource for PromTraffic {
    #[instrument(skip(self))]
    async fn sent_bytes(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tenant: &TenantId,
        entity: &EntityIdentity,
    ) -> Result<u64> {
        let promql = self.promql(start, end, tenant, entity);
        self.prom.query_count(&promql, Some(end)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tally_common::EntityKind;

    #[test]
    fn test_promql() {
        let traffic = PromTraffic::new(
            PromClient::new("http://prom:9090").unwrap(),
            DEFAULT_TRAFFIC_METRIC,
        );
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap();
        let promql = traffic.promql(
            start,
            end,
            &TenantId::from("ns-acme"),
            &EntityIdentity::new(EntityKind::App, "web"),
        );
        assert_eq!(
            promql,
            r#"sum(increase(traffic_sent_bytes{namespace="ns-acme",type="APP",name="web"}[3600s]))"#
        );
    }
}
