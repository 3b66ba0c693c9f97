use crate::{
    aws::{
        metrics::{fetch_metrics, MetricConfig, Statistic, PERIOD_ONE_DAY, PERIOD_ONE_HOUR},
        types::{Instance, Volume},
    },
    error::Result,
    pricing::{CostBreakdown, CostEstimator, ResourceCostConfig, ResourceSize, ResourceType},
    ratelimit::scan_limiter,
    scanners::{name_from_tags, older_than_days, rate_limited, Scanner},
    types::{ScanOptions, ScanResult},
};
use async_trait::async_trait;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, warn};

/// Running instances below this average CPU are idle candidates.
const IDLE_CPU_PERCENT: f64 = 5.0;
/// Total network packets over the window below which a running instance
/// counts as idle.
const IDLE_NETWORK_PACKETS: f64 = 1_000_000.0;

pub struct Ec2InstanceScanner {
    estimator: Arc<CostEstimator>,
}

impl Ec2InstanceScanner {
    pub fn new(estimator: Arc<CostEstimator>) -> Self {
        Self { estimator }
    }

    /// Stopped instances incur no compute charge but their volumes keep
    /// billing; running idle instances bill both.
    async fn cost_map(
        &self,
        options: &ScanOptions,
        instance: &Instance,
        volumes_by_id: &HashMap<String, Volume>,
        include_instance: bool,
    ) -> Option<serde_json::Value> {
        let mut map = serde_json::Map::new();
        let mut total_hourly = 0.0;
        let mut hours_running = None;

        if include_instance {
            let mut config = ResourceCostConfig::new(
                ResourceType::Ec2Instance,
                ResourceSize::InstanceClass(instance.instance_type.clone()),
                &options.region,
            );
            config.creation_time = instance.launch_time;
            match self.estimator.calculate_cost(&options.cancel, &config).await {
                Ok(breakdown) => {
                    total_hourly += breakdown.hourly_rate;
                    hours_running = breakdown.hours_running;
                    map.insert("instance".to_string(), json!(breakdown));
                }
                Err(err) => {
                    warn!(instance = %instance.id, "No instance cost estimate: {err}");
                    return None;
                }
            }
        }

        let mut ebs_hourly = 0.0;
        let mut priced_volumes = 0;
        for volume_id in &instance.volume_ids {
            let Some(volume) = volumes_by_id.get(volume_id) else {
                continue;
            };
            let mut config = ResourceCostConfig::new(
                ResourceType::EbsVolume,
                ResourceSize::Gigabytes(volume.size_gb),
                &options.region,
            );
            config.volume_type = Some(volume.volume_type.clone());
            config.creation_time = volume.create_time;
            match self.estimator.calculate_cost(&options.cancel, &config).await {
                Ok(breakdown) => {
                    ebs_hourly += breakdown.hourly_rate;
                    priced_volumes += 1;
                }
                Err(err) => {
                    warn!(volume = %volume_id, "No volume cost estimate: {err}");
                }
            }
        }
        if priced_volumes > 0 {
            let ebs = CostBreakdown::from_hourly(ebs_hourly, hours_running);
            total_hourly += ebs.hourly_rate;
            map.insert("ebs".to_string(), json!(ebs));
        }

        if map.is_empty() {
            return None;
        }
        map.insert(
            "total".to_string(),
            json!(CostBreakdown::from_hourly(total_hourly, hours_running)),
        );
        Some(serde_json::Value::Object(map))
    }
}

#[async_trait]
impl Scanner for Ec2InstanceScanner {
    fn argument_name(&self) -> &'static str {
        "ec2-instances"
    }

    fn label(&self) -> &'static str {
        "EC2 Instances"
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let compute = options.session.compute();
        let ec2 = scan_limiter(&options.account_id, &options.region, "ec2");
        let cloudwatch = scan_limiter(&options.account_id, &options.region, "cloudwatch");
        let metrics = options.session.metrics();

        let instances =
            rate_limited(&ec2, &options.cancel, || compute.describe_instances()).await?;
        debug!(count = instances.len(), region = %options.region, "Describing EC2 instances");

        let volumes =
            rate_limited(&ec2, &options.cancel, || compute.describe_volumes()).await?;
        let volumes_by_id: HashMap<String, Volume> = volumes
            .into_iter()
            .map(|volume| (volume.id.clone(), volume))
            .collect();

        let mut results = Vec::new();
        for instance in instances {
            match instance.state.as_str() {
                "stopped" => {
                    let stopped_since =
                        instance.state_transition_time.or(instance.launch_time);
                    if !older_than_days(stopped_since, options.days_unused) {
                        continue;
                    }
                    let reason = format!(
                        "Instance has been stopped for {} days",
                        options.days_unused
                    );
                    let cost = self
                        .cost_map(options, &instance, &volumes_by_id, false)
                        .await;
                    results.push(build_result(options, self.label(), &instance, reason, cost));
                }
                "running" => {
                    if !older_than_days(instance.launch_time, options.days_unused) {
                        continue;
                    }
                    let usage_configs = vec![
                        MetricConfig::over_days(
                            "cpu",
                            "AWS/EC2",
                            "CPUUtilization",
                            vec![("InstanceId".to_string(), instance.id.clone())],
                            Statistic::Average,
                            PERIOD_ONE_HOUR,
                            options.days_unused,
                        ),
                        MetricConfig::over_days(
                            "packets_in",
                            "AWS/EC2",
                            "NetworkPacketsIn",
                            vec![("InstanceId".to_string(), instance.id.clone())],
                            Statistic::Sum,
                            PERIOD_ONE_DAY,
                            options.days_unused,
                        ),
                        MetricConfig::over_days(
                            "packets_out",
                            "AWS/EC2",
                            "NetworkPacketsOut",
                            vec![("InstanceId".to_string(), instance.id.clone())],
                            Statistic::Sum,
                            PERIOD_ONE_DAY,
                            options.days_unused,
                        ),
                    ];
                    let usage = rate_limited(&cloudwatch, &options.cancel, || {
                        fetch_metrics(metrics.as_ref(), &usage_configs)
                    })
                    .await?;

                    let cpu = usage.get("cpu").copied().unwrap_or(0.0);
                    let packets = usage.get("packets_in").copied().unwrap_or(0.0)
                        + usage.get("packets_out").copied().unwrap_or(0.0);
                    if cpu >= IDLE_CPU_PERCENT || packets >= IDLE_NETWORK_PACKETS {
                        continue;
                    }

                    let reason = [
                        format!(
                            "Average CPU utilization {:.1}% is below {:.0}% over the last {} days",
                            cpu, IDLE_CPU_PERCENT, options.days_unused
                        ),
                        format!(
                            "Total network traffic {:.0} packets is below {:.0}",
                            packets, IDLE_NETWORK_PACKETS
                        ),
                    ]
                    .join("\n");
                    let cost = self
                        .cost_map(options, &instance, &volumes_by_id, true)
                        .await;
                    results.push(build_result(options, self.label(), &instance, reason, cost));
                }
                _ => continue,
            }
        }

        Ok(results)
    }
}

fn build_result(
    options: &ScanOptions,
    label: &str,
    instance: &Instance,
    reason: String,
    cost: Option<serde_json::Value>,
) -> ScanResult {
    ScanResult {
        resource_type: label.to_string(),
        resource_name: instance
            .name
            .clone()
            .unwrap_or_else(|| name_from_tags(&instance.tags, &instance.id)),
        resource_id: instance.id.clone(),
        account_id: options.account_id.clone(),
        region: options.region.clone(),
        reason,
        tags: instance.tags.clone(),
        details: json!({
            "state": instance.state,
            "instance_type": instance.instance_type,
            "launch_time": instance.launch_time,
            "state_transition_time": instance.state_transition_time,
            "volume_count": instance.volume_ids.len(),
        }),
        cost,
    }
}
