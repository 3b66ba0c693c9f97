use crate::{
    aws::metrics::{fetch_metrics, MetricConfig, Statistic, PERIOD_ONE_DAY},
    error::Result,
    pricing::{CostEstimator, ResourceCostConfig, ResourceSize, ResourceType},
    ratelimit::scan_limiter,
    scanners::{name_from_tags, rate_limited, Scanner},
    types::{ScanOptions, ScanResult},
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Gateways moving less than this many bytes over the whole window are
/// considered idle.
const IDLE_TRAFFIC_BYTES: f64 = 1_048_576.0;

pub struct NatGatewayScanner {
    estimator: Arc<CostEstimator>,
}

impl NatGatewayScanner {
    pub fn new(estimator: Arc<CostEstimator>) -> Self {
        Self { estimator }
    }
}

#[async_trait]
impl Scanner for NatGatewayScanner {
    fn argument_name(&self) -> &'static str {
        "nat-gateways"
    }

    fn label(&self) -> &'static str {
        "NAT Gateways"
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let compute = options.session.compute();
        let ec2 = scan_limiter(&options.account_id, &options.region, "ec2");
        let cloudwatch = scan_limiter(&options.account_id, &options.region, "cloudwatch");
        let metrics = options.session.metrics();

        let gateways =
            rate_limited(&ec2, &options.cancel, || compute.describe_nat_gateways()).await?;
        debug!(count = gateways.len(), region = %options.region, "Describing NAT gateways");

        let mut results = Vec::new();
        for gateway in gateways {
            if gateway.state != "available" {
                continue;
            }

            let traffic_configs = vec![
                MetricConfig::over_days(
                    "bytes_out_to_destination",
                    "AWS/NATGateway",
                    "BytesOutToDestination",
                    vec![("NatGatewayId".to_string(), gateway.id.clone())],
                    Statistic::Sum,
                    PERIOD_ONE_DAY,
                    options.days_unused,
                ),
                MetricConfig::over_days(
                    "bytes_out_to_source",
                    "AWS/NATGateway",
                    "BytesOutToSource",
                    vec![("NatGatewayId".to_string(), gateway.id.clone())],
                    Statistic::Sum,
                    PERIOD_ONE_DAY,
                    options.days_unused,
                ),
            ];
            let traffic = rate_limited(&cloudwatch, &options.cancel, || {
                fetch_metrics(metrics.as_ref(), &traffic_configs)
            })
            .await?;
            let total_bytes: f64 = traffic.values().sum();
            if total_bytes > IDLE_TRAFFIC_BYTES {
                continue;
            }

            let mut cost_config = ResourceCostConfig::new(
                ResourceType::NatGateway,
                ResourceSize::Gigabytes(0),
                &options.region,
            );
            cost_config.creation_time = gateway.create_time;
            let cost = match self
                .estimator
                .calculate_cost(&options.cancel, &cost_config)
                .await
            {
                Ok(breakdown) => Some(json!({ "total": breakdown })),
                Err(err) => {
                    warn!(gateway = %gateway.id, "No cost estimate: {err}");
                    None
                }
            };

            results.push(ScanResult {
                resource_type: self.label().to_string(),
                resource_name: name_from_tags(&gateway.tags, &gateway.id),
                resource_id: gateway.id.clone(),
                account_id: options.account_id.clone(),
                region: options.region.clone(),
                reason: format!(
                    "Gateway moved {:.0} bytes in the last {} days (threshold {:.0})",
                    total_bytes, options.days_unused, IDLE_TRAFFIC_BYTES
                ),
                tags: gateway.tags.clone(),
                details: json!({
                    "state": gateway.state,
                    "vpc_id": gateway.vpc_id,
                    "create_time": gateway.create_time,
                    "total_bytes": total_bytes,
                }),
                cost,
            });
        }

        Ok(results)
    }
}
