use crate::{
    aws::metrics::{fetch_metrics, MetricConfig, Statistic, PERIOD_ONE_DAY},
    error::Result,
    pricing::{CostEstimator, ResourceCostConfig, ResourceSize, ResourceType},
    ratelimit::scan_limiter,
    scanners::{name_from_tags, older_than_days, rate_limited, Scanner},
    types::{ScanOptions, ScanResult},
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Consumed-to-provisioned capacity ratio below which a provisioned table
/// is over-sized.
const LOW_UTILIZATION_RATIO: f64 = 0.10;
/// Consumed units per day below this, on a table that still holds items,
/// count as "very low throughput".
const VERY_LOW_THROUGHPUT_UNITS: f64 = 100.0;

pub struct DynamoDbTableScanner {
    estimator: Arc<CostEstimator>,
}

impl DynamoDbTableScanner {
    pub fn new(estimator: Arc<CostEstimator>) -> Self {
        Self { estimator }
    }
}

#[async_trait]
impl Scanner for DynamoDbTableScanner {
    fn argument_name(&self) -> &'static str {
        "dynamodb-tables"
    }

    fn label(&self) -> &'static str {
        "DynamoDB Tables"
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let dynamodb = options.session.tables();
        let ddb_limiter = scan_limiter(&options.account_id, &options.region, "dynamodb");
        let cloudwatch = scan_limiter(&options.account_id, &options.region, "cloudwatch");
        let metrics = options.session.metrics();

        let tables =
            rate_limited(&ddb_limiter, &options.cancel, || dynamodb.list_tables()).await?;
        debug!(count = tables.len(), region = %options.region, "Listing DynamoDB tables");

        let mut results = Vec::new();
        for table in tables {
            if !older_than_days(table.creation_time, options.days_unused) {
                continue;
            }

            let dimensions = vec![("TableName".to_string(), table.name.clone())];
            let usage_configs = vec![
                MetricConfig::over_days(
                    "consumed_read",
                    "AWS/DynamoDB",
                    "ConsumedReadCapacityUnits",
                    dimensions.clone(),
                    Statistic::Sum,
                    PERIOD_ONE_DAY,
                    options.days_unused,
                ),
                MetricConfig::over_days(
                    "consumed_write",
                    "AWS/DynamoDB",
                    "ConsumedWriteCapacityUnits",
                    dimensions,
                    Statistic::Sum,
                    PERIOD_ONE_DAY,
                    options.days_unused,
                ),
            ];
            let usage = rate_limited(&cloudwatch, &options.cancel, || {
                fetch_metrics(metrics.as_ref(), &usage_configs)
            })
            .await?;
            let consumed_read = usage.get("consumed_read").copied().unwrap_or(0.0);
            let consumed_write = usage.get("consumed_write").copied().unwrap_or(0.0);
            let consumed_total = consumed_read + consumed_write;

            let mut reasons = Vec::new();
            if consumed_total == 0.0 {
                reasons.push(format!(
                    "No read or write throughput in the last {} days",
                    options.days_unused
                ));
            } else if consumed_total < VERY_LOW_THROUGHPUT_UNITS && table.item_count > 0 {
                reasons.push(format!(
                    "Only {:.0} capacity units consumed against {} stored items",
                    consumed_total, table.item_count
                ));
            }

            let provisioned = table.read_capacity + table.write_capacity;
            if provisioned > 0 {
                // Window totals versus what provisioning could have served.
                let window_seconds = (options.days_unused * 86_400) as f64;
                let utilization = consumed_total / (provisioned as f64 * window_seconds);
                if utilization < LOW_UTILIZATION_RATIO {
                    reasons.push(format!(
                        "Provisioned capacity utilization {:.1}% is below {:.0}%",
                        utilization * 100.0,
                        LOW_UTILIZATION_RATIO * 100.0
                    ));
                }
            }

            if reasons.is_empty() {
                continue;
            }

            let size_gb = (table.size_bytes as f64 / 1_073_741_824.0).ceil() as i64;
            let mut cost_config = ResourceCostConfig::new(
                ResourceType::DynamoDbTable,
                ResourceSize::Gigabytes(size_gb),
                &options.region,
            );
            cost_config.creation_time = table.creation_time;
            cost_config.read_capacity = Some(table.read_capacity);
            cost_config.write_capacity = Some(table.write_capacity);
            let cost = match self
                .estimator
                .calculate_cost(&options.cancel, &cost_config)
                .await
            {
                Ok(breakdown) => Some(json!({ "total": breakdown })),
                Err(err) => {
                    warn!(table = %table.name, "No cost estimate: {err}");
                    None
                }
            };

            results.push(ScanResult {
                resource_type: self.label().to_string(),
                resource_name: name_from_tags(&table.tags, &table.name),
                resource_id: table.name.clone(),
                account_id: options.account_id.clone(),
                region: options.region.clone(),
                reason: reasons.join("\n"),
                tags: table.tags.clone(),
                details: json!({
                    "item_count": table.item_count,
                    "size_bytes": table.size_bytes,
                    "billing_mode": table.billing_mode,
                    "read_capacity": table.read_capacity,
                    "write_capacity": table.write_capacity,
                    "consumed_read": consumed_read,
                    "consumed_write": consumed_write,
                }),
                cost,
            });
        }

        Ok(results)
    }
}
