use crate::{
    error::Result,
    pricing::{CostBreakdown, CostEstimator, ResourceCostConfig, ResourceSize, ResourceType},
    ratelimit::scan_limiter,
    scanners::{name_from_tags, older_than_days, rate_limited, Scanner},
    types::{ScanOptions, ScanResult},
    utils::format_time_difference,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::{debug, warn};

pub struct AmiScanner {
    estimator: Arc<CostEstimator>,
}

impl AmiScanner {
    pub fn new(estimator: Arc<CostEstimator>) -> Self {
        Self { estimator }
    }
}

#[async_trait]
impl Scanner for AmiScanner {
    fn argument_name(&self) -> &'static str {
        "amis"
    }

    fn label(&self) -> &'static str {
        "AMIs"
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let compute = options.session.compute();
        let ec2 = scan_limiter(&options.account_id, &options.region, "ec2");

        let images = rate_limited(&ec2, &options.cancel, || compute.describe_images()).await?;
        debug!(count = images.len(), region = %options.region, "Describing owned AMIs");

        let instances =
            rate_limited(&ec2, &options.cancel, || compute.describe_instances()).await?;
        let referenced_images: HashSet<&str> = instances
            .iter()
            .filter(|instance| instance.state != "terminated")
            .filter_map(|instance| instance.image_id.as_deref())
            .collect();

        let snapshots =
            rate_limited(&ec2, &options.cancel, || compute.describe_snapshots()).await?;
        let snapshot_sizes: HashMap<&str, i64> = snapshots
            .iter()
            .map(|snapshot| (snapshot.id.as_str(), snapshot.size_gb))
            .collect();

        let mut results = Vec::new();
        for image in images {
            if referenced_images.contains(image.id.as_str()) {
                continue;
            }
            if !older_than_days(image.creation_date, options.days_unused) {
                continue;
            }

            let reason = [
                "No running or stopped instance was launched from this image".to_string(),
                format!(
                    "Image is {} old",
                    format_time_difference(Utc::now(), image.creation_date)
                ),
            ]
            .join("\n");

            // An AMI's carrying cost is the sum of its backing snapshots.
            let mut snapshot_hourly = 0.0;
            let mut priced = 0;
            for snapshot_id in &image.snapshot_ids {
                let Some(size_gb) = snapshot_sizes.get(snapshot_id.as_str()) else {
                    continue;
                };
                let config = ResourceCostConfig::new(
                    ResourceType::EbsSnapshot,
                    ResourceSize::Gigabytes(*size_gb),
                    &options.region,
                );
                match self.estimator.calculate_cost(&options.cancel, &config).await {
                    Ok(breakdown) => {
                        snapshot_hourly += breakdown.hourly_rate;
                        priced += 1;
                    }
                    Err(err) => {
                        warn!(snapshot = %snapshot_id, "No snapshot cost estimate: {err}");
                    }
                }
            }
            let cost = (priced > 0).then(|| {
                let hours = image
                    .creation_date
                    .map(|created| (Utc::now() - created).num_seconds().max(0) as f64 / 3600.0);
                json!({ "total": CostBreakdown::from_hourly(snapshot_hourly, hours) })
            });

            results.push(ScanResult {
                resource_type: self.label().to_string(),
                resource_name: image
                    .name
                    .clone()
                    .unwrap_or_else(|| name_from_tags(&image.tags, &image.id)),
                resource_id: image.id.clone(),
                account_id: options.account_id.clone(),
                region: options.region.clone(),
                reason,
                tags: image.tags.clone(),
                details: json!({
                    "creation_date": image.creation_date,
                    "snapshot_ids": image.snapshot_ids,
                }),
                cost,
            });
        }

        Ok(results)
    }
}
