use crate::{
    aws::metrics::{
        fetch_metrics, MetricConfig, Statistic, PERIOD_ONE_DAY, PERIOD_ONE_HOUR,
    },
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

const IDLE_CPU_PERCENT: f64 = 5.0;

pub struct RdsInstanceScanner {
    estimator: Arc<CostEstimator>,
}

impl RdsInstanceScanner {
    pub fn new(estimator: Arc<CostEstimator>) -> Self {
        Self { estimator }
    }
}

#[async_trait]
impl Scanner for RdsInstanceScanner {
    fn argument_name(&self) -> &'static str {
        "rds-instances"
    }

    fn label(&self) -> &'static str {
        "RDS Instances"
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let rds = options.session.database();
        let rds_limiter = scan_limiter(&options.account_id, &options.region, "rds");
        let cloudwatch = scan_limiter(&options.account_id, &options.region, "cloudwatch");
        let metrics = options.session.metrics();

        let instances = rate_limited(&rds_limiter, &options.cancel, || {
            rds.describe_db_instances()
        })
        .await?;
        debug!(count = instances.len(), region = %options.region, "Describing RDS instances");

        let mut results = Vec::new();
        for instance in instances {
            let mut reasons = Vec::new();

            if instance.status == "stopped" {
                if !older_than_days(instance.create_time, options.days_unused) {
                    continue;
                }
                reasons.push(format!(
                    "Database has been stopped for at least {} days",
                    options.days_unused
                ));
            } else {
                if !older_than_days(instance.create_time, options.days_unused) {
                    continue;
                }
                let dimensions = vec![(
                    "DBInstanceIdentifier".to_string(),
                    instance.identifier.clone(),
                )];
                let usage_configs = vec![
                    MetricConfig::over_days(
                        "connections",
                        "AWS/RDS",
                        "DatabaseConnections",
                        dimensions.clone(),
                        Statistic::Maximum,
                        PERIOD_ONE_HOUR,
                        options.days_unused,
                    ),
                    MetricConfig::over_days(
                        "cpu",
                        "AWS/RDS",
                        "CPUUtilization",
                        dimensions.clone(),
                        Statistic::Average,
                        PERIOD_ONE_HOUR,
                        options.days_unused,
                    ),
                    MetricConfig::over_days(
                        "read_iops",
                        "AWS/RDS",
                        "ReadIOPS",
                        dimensions.clone(),
                        Statistic::Sum,
                        PERIOD_ONE_DAY,
                        options.days_unused,
                    ),
                    MetricConfig::over_days(
                        "write_iops",
                        "AWS/RDS",
                        "WriteIOPS",
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

                let connections = usage.get("connections").copied().unwrap_or(0.0);
                let cpu = usage.get("cpu").copied().unwrap_or(0.0);
                let iops = usage.get("read_iops").copied().unwrap_or(0.0)
                    + usage.get("write_iops").copied().unwrap_or(0.0);

                if connections == 0.0 {
                    reasons.push(format!(
                        "No client connections in the last {} days",
                        options.days_unused
                    ));
                }
                if cpu < IDLE_CPU_PERCENT {
                    reasons.push(format!(
                        "Average CPU utilization {:.1}% is below {:.0}%",
                        cpu, IDLE_CPU_PERCENT
                    ));
                }
                if iops == 0.0 {
                    reasons.push("No read or write IOPS over the window".to_string());
                }
                if reasons.is_empty() {
                    continue;
                }
            }

            let mut cost_config = ResourceCostConfig::new(
                ResourceType::RdsInstance,
                ResourceSize::InstanceClass(instance.instance_class.clone()),
                &options.region,
            );
            cost_config.creation_time = instance.create_time;
            cost_config.engine = Some(instance.engine.clone());
            let cost = match self
                .estimator
                .calculate_cost(&options.cancel, &cost_config)
                .await
            {
                Ok(breakdown) => Some(json!({ "total": breakdown })),
                Err(err) => {
                    warn!(db = %instance.identifier, "No cost estimate: {err}");
                    None
                }
            };

            results.push(ScanResult {
                resource_type: self.label().to_string(),
                resource_name: name_from_tags(&instance.tags, &instance.identifier),
                resource_id: instance.identifier.clone(),
                account_id: options.account_id.clone(),
                region: options.region.clone(),
                reason: reasons.join("\n"),
                tags: instance.tags.clone(),
                details: json!({
                    "instance_class": instance.instance_class,
                    "engine": instance.engine,
                    "status": instance.status,
                    "create_time": instance.create_time,
                    "allocated_storage_gb": instance.allocated_storage_gb,
                }),
                cost,
            });
        }

        Ok(results)
    }
}
