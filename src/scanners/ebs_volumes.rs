use crate::{
    aws::metrics::{fetch_metrics, MetricConfig, Statistic, PERIOD_ONE_DAY},
    error::Result,
    pricing::{CostEstimator, ResourceCostConfig, ResourceSize, ResourceType},
    ratelimit::scan_limiter,
    scanners::{name_from_tags, older_than_days, rate_limited, Scanner},
    types::{ScanOptions, ScanResult},
    utils::format_time_difference,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct EbsVolumeScanner {
    estimator: Arc<CostEstimator>,
}

impl EbsVolumeScanner {
    pub fn new(estimator: Arc<CostEstimator>) -> Self {
        Self { estimator }
    }
}

#[async_trait]
impl Scanner for EbsVolumeScanner {
    fn argument_name(&self) -> &'static str {
        "ebs-volumes"
    }

    fn label(&self) -> &'static str {
        "EBS Volumes"
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let compute = options.session.compute();
        let ec2 = scan_limiter(&options.account_id, &options.region, "ec2");
        let cloudwatch = scan_limiter(&options.account_id, &options.region, "cloudwatch");
        let metrics = options.session.metrics();

        let volumes =
            rate_limited(&ec2, &options.cancel, || compute.describe_volumes()).await?;
        debug!(count = volumes.len(), region = %options.region, "Describing EBS volumes");

        let mut results = Vec::new();
        for volume in volumes {
            if volume.state != "available" {
                continue;
            }
            if !older_than_days(volume.create_time, options.days_unused) {
                continue;
            }

            let mut reasons = vec![format!(
                "Volume is not attached to any instance (created {} ago)",
                format_time_difference(Utc::now(), volume.create_time)
            )];

            // Idle I/O confirms the volume also saw no use while attached.
            let io_configs = vec![
                MetricConfig::over_days(
                    "read_ops",
                    "AWS/EBS",
                    "VolumeReadOps",
                    vec![("VolumeId".to_string(), volume.id.clone())],
                    Statistic::Sum,
                    PERIOD_ONE_DAY,
                    options.days_unused,
                ),
                MetricConfig::over_days(
                    "write_ops",
                    "AWS/EBS",
                    "VolumeWriteOps",
                    vec![("VolumeId".to_string(), volume.id.clone())],
                    Statistic::Sum,
                    PERIOD_ONE_DAY,
                    options.days_unused,
                ),
            ];
            let io = rate_limited(&cloudwatch, &options.cancel, || {
                fetch_metrics(metrics.as_ref(), &io_configs)
            })
            .await?;
            let read_ops = io.get("read_ops").copied().unwrap_or(0.0);
            let write_ops = io.get("write_ops").copied().unwrap_or(0.0);
            if read_ops == 0.0 && write_ops == 0.0 {
                reasons.push(format!(
                    "No read or write operations in the last {} days",
                    options.days_unused
                ));
            }

            let mut cost_config = ResourceCostConfig::new(
                ResourceType::EbsVolume,
                ResourceSize::Gigabytes(volume.size_gb),
                &options.region,
            );
            cost_config.creation_time = volume.create_time;
            cost_config.volume_type = Some(volume.volume_type.clone());
            let cost = match self
                .estimator
                .calculate_cost(&options.cancel, &cost_config)
                .await
            {
                Ok(breakdown) => Some(json!({ "total": breakdown })),
                Err(err) => {
                    warn!(volume = %volume.id, "No cost estimate: {err}");
                    None
                }
            };

            results.push(ScanResult {
                resource_type: self.label().to_string(),
                resource_name: name_from_tags(&volume.tags, &volume.id),
                resource_id: volume.id.clone(),
                account_id: options.account_id.clone(),
                region: options.region.clone(),
                reason: reasons.join("\n"),
                tags: volume.tags.clone(),
                details: json!({
                    "state": volume.state,
                    "size_gb": volume.size_gb,
                    "volume_type": volume.volume_type,
                    "create_time": volume.create_time,
                    "read_ops": read_ops,
                    "write_ops": write_ops,
                }),
                cost,
            });
        }

        Ok(results)
    }
}
