use crate::{
    aws::metrics::{fetch_metrics, MetricConfig, Statistic, PERIOD_ONE_DAY, PERIOD_ONE_HOUR},
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

const IDLE_CPU_PERCENT: f64 = 10.0;
/// Below this share of used storage the cluster is over-provisioned.
const LOW_STORAGE_UTILIZATION: f64 = 0.20;
/// Sustained JVM memory pressure above this indicates an unhealthy,
/// mis-sized cluster.
const HIGH_JVM_PRESSURE_PERCENT: f64 = 85.0;

pub struct OpenSearchDomainScanner {
    estimator: Arc<CostEstimator>,
}

impl OpenSearchDomainScanner {
    pub fn new(estimator: Arc<CostEstimator>) -> Self {
        Self { estimator }
    }
}

#[async_trait]
impl Scanner for OpenSearchDomainScanner {
    fn argument_name(&self) -> &'static str {
        "opensearch-domains"
    }

    fn label(&self) -> &'static str {
        "OpenSearch Domains"
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let search = options.session.search();
        let es_limiter = scan_limiter(&options.account_id, &options.region, "es");
        let cloudwatch = scan_limiter(&options.account_id, &options.region, "cloudwatch");
        let metrics = options.session.metrics();

        let domains = rate_limited(&es_limiter, &options.cancel, || search.list_domains()).await?;
        debug!(count = domains.len(), region = %options.region, "Listing OpenSearch domains");

        let mut results = Vec::new();
        for domain in domains {
            let dimensions = vec![
                ("DomainName".to_string(), domain.name.clone()),
                ("ClientId".to_string(), options.account_id.clone()),
            ];
            let usage_configs = vec![
                MetricConfig::over_days(
                    "search_rate",
                    "AWS/ES",
                    "SearchRate",
                    dimensions.clone(),
                    Statistic::Sum,
                    PERIOD_ONE_DAY,
                    options.days_unused,
                ),
                MetricConfig::over_days(
                    "index_rate",
                    "AWS/ES",
                    "IndexingRate",
                    dimensions.clone(),
                    Statistic::Sum,
                    PERIOD_ONE_DAY,
                    options.days_unused,
                ),
                MetricConfig::over_days(
                    "delete_rate",
                    "AWS/ES",
                    "DeleteRate",
                    dimensions.clone(),
                    Statistic::Sum,
                    PERIOD_ONE_DAY,
                    options.days_unused,
                ),
                MetricConfig::over_days(
                    "cpu",
                    "AWS/ES",
                    "CPUUtilization",
                    dimensions.clone(),
                    Statistic::Average,
                    PERIOD_ONE_HOUR,
                    options.days_unused,
                ),
                MetricConfig::over_days(
                    "free_storage_mb",
                    "AWS/ES",
                    "FreeStorageSpace",
                    dimensions.clone(),
                    Statistic::Average,
                    PERIOD_ONE_HOUR,
                    options.days_unused,
                ),
                MetricConfig::over_days(
                    "jvm_pressure",
                    "AWS/ES",
                    "JVMMemoryPressure",
                    dimensions,
                    Statistic::Average,
                    PERIOD_ONE_HOUR,
                    options.days_unused,
                ),
            ];
            let usage = rate_limited(&cloudwatch, &options.cancel, || {
                fetch_metrics(metrics.as_ref(), &usage_configs)
            })
            .await?;

            let activity = usage.get("search_rate").copied().unwrap_or(0.0)
                + usage.get("index_rate").copied().unwrap_or(0.0)
                + usage.get("delete_rate").copied().unwrap_or(0.0);
            let cpu = usage.get("cpu").copied().unwrap_or(0.0);
            let jvm_pressure = usage.get("jvm_pressure").copied().unwrap_or(0.0);

            let mut reasons = Vec::new();
            if activity == 0.0 {
                reasons.push(format!(
                    "No search, indexing, or delete activity in the last {} days",
                    options.days_unused
                ));
            }
            if cpu < IDLE_CPU_PERCENT {
                reasons.push(format!(
                    "Average CPU utilization {:.1}% is below {:.0}%",
                    cpu, IDLE_CPU_PERCENT
                ));
            }
            if domain.storage_gb > 0 {
                let free_gb = usage.get("free_storage_mb").copied().unwrap_or(0.0) / 1024.0;
                let used_ratio =
                    ((domain.storage_gb as f64 - free_gb) / domain.storage_gb as f64).max(0.0);
                if used_ratio < LOW_STORAGE_UTILIZATION {
                    reasons.push(format!(
                        "Storage utilization {:.1}% is below {:.0}%",
                        used_ratio * 100.0,
                        LOW_STORAGE_UTILIZATION * 100.0
                    ));
                }
            }
            if jvm_pressure > HIGH_JVM_PRESSURE_PERCENT {
                reasons.push(format!(
                    "JVM memory pressure {:.1}% exceeds {:.0}%",
                    jvm_pressure, HIGH_JVM_PRESSURE_PERCENT
                ));
            }

            if reasons.is_empty() {
                continue;
            }

            let mut cost_config = ResourceCostConfig::new(
                ResourceType::OpenSearchDomain,
                ResourceSize::InstanceClass(domain.instance_type.clone()),
                &options.region,
            );
            cost_config.creation_time = domain.created;
            cost_config.instance_count = Some(domain.instance_count);
            cost_config.storage_size = Some(domain.storage_gb);
            cost_config.volume_type = Some(domain.volume_type.clone());
            let cost = match self
                .estimator
                .calculate_cost(&options.cancel, &cost_config)
                .await
            {
                Ok(breakdown) => Some(json!({ "total": breakdown })),
                Err(err) => {
                    warn!(domain = %domain.name, "No cost estimate: {err}");
                    None
                }
            };

            results.push(ScanResult {
                resource_type: self.label().to_string(),
                resource_name: name_from_tags(&domain.tags, &domain.name),
                resource_id: domain.name.clone(),
                account_id: options.account_id.clone(),
                region: options.region.clone(),
                reason: reasons.join("\n"),
                tags: domain.tags.clone(),
                details: json!({
                    "instance_type": domain.instance_type,
                    "instance_count": domain.instance_count,
                    "storage_gb": domain.storage_gb,
                    "activity_total": activity,
                    "cpu_average": cpu,
                    "jvm_pressure": jvm_pressure,
                }),
                cost,
            });
        }

        Ok(results)
    }
}
