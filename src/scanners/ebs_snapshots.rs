use crate::{
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
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::{debug, warn};

pub struct EbsSnapshotScanner {
    estimator: Arc<CostEstimator>,
}

impl EbsSnapshotScanner {
    pub fn new(estimator: Arc<CostEstimator>) -> Self {
        Self { estimator }
    }
}

#[async_trait]
impl Scanner for EbsSnapshotScanner {
    fn argument_name(&self) -> &'static str {
        "ebs-snapshots"
    }

    fn label(&self) -> &'static str {
        "EBS Snapshots"
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let compute = options.session.compute();
        let ec2 = scan_limiter(&options.account_id, &options.region, "ec2");

        let snapshots =
            rate_limited(&ec2, &options.cancel, || compute.describe_snapshots()).await?;
        debug!(count = snapshots.len(), region = %options.region, "Describing EBS snapshots");

        let volumes =
            rate_limited(&ec2, &options.cancel, || compute.describe_volumes()).await?;
        let live_volume_ids: HashSet<&str> =
            volumes.iter().map(|volume| volume.id.as_str()).collect();

        // Newest snapshot instant per source volume; anything older is a
        // duplicate candidate.
        let mut newest_per_volume: HashMap<&str, Option<chrono::DateTime<Utc>>> = HashMap::new();
        for snapshot in &snapshots {
            if let Some(volume_id) = snapshot.volume_id.as_deref() {
                let newest = newest_per_volume
                    .entry(volume_id)
                    .or_insert(snapshot.start_time);
                if snapshot.start_time > *newest {
                    *newest = snapshot.start_time;
                }
            }
        }

        let mut results = Vec::new();
        for snapshot in &snapshots {
            if !older_than_days(snapshot.start_time, options.days_unused) {
                continue;
            }

            let mut reasons = vec![format!(
                "Snapshot is {} old",
                format_time_difference(Utc::now(), snapshot.start_time)
            )];
            if let Some(volume_id) = snapshot.volume_id.as_deref() {
                if !live_volume_ids.contains(volume_id) {
                    reasons.push(format!("Source volume {volume_id} has been deleted"));
                }
                let newest = newest_per_volume.get(volume_id).copied().flatten();
                if snapshot.start_time < newest {
                    reasons.push(format!(
                        "A newer duplicate snapshot of volume {volume_id} exists"
                    ));
                }
            }

            let mut cost_config = ResourceCostConfig::new(
                ResourceType::EbsSnapshot,
                ResourceSize::Gigabytes(snapshot.size_gb),
                &options.region,
            );
            cost_config.creation_time = snapshot.start_time;
            let cost = match self
                .estimator
                .calculate_cost(&options.cancel, &cost_config)
                .await
            {
                Ok(breakdown) => Some(json!({ "total": breakdown })),
                Err(err) => {
                    warn!(snapshot = %snapshot.id, "No cost estimate: {err}");
                    None
                }
            };

            results.push(ScanResult {
                resource_type: self.label().to_string(),
                resource_name: name_from_tags(&snapshot.tags, &snapshot.id),
                resource_id: snapshot.id.clone(),
                account_id: options.account_id.clone(),
                region: options.region.clone(),
                reason: reasons.join("\n"),
                tags: snapshot.tags.clone(),
                details: json!({
                    "volume_id": snapshot.volume_id,
                    "start_time": snapshot.start_time,
                    "size_gb": snapshot.size_gb,
                    "description": snapshot.description,
                }),
                cost,
            });
        }

        Ok(results)
    }
}
