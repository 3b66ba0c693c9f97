use crate::{
    aws::metrics::{
        fetch_metrics, std_deviation, MetricConfig, Statistic, PERIOD_ONE_DAY, PERIOD_ONE_HOUR,
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

/// Hourly request counts whose standard deviation falls below this are
/// treated as synthetic (health checks only), not organic traffic.
const MIN_REQUEST_STDDEV: f64 = 2.0;
/// Request totals below this over the window count as no traffic.
const LOW_TRAFFIC_REQUESTS: f64 = 1.0;
/// Byte totals below this over the window count as no traffic.
const LOW_TRAFFIC_BYTES: f64 = 1.0;

pub struct LoadBalancerScanner {
    estimator: Arc<CostEstimator>,
}

impl LoadBalancerScanner {
    pub fn new(estimator: Arc<CostEstimator>) -> Self {
        Self { estimator }
    }
}

#[async_trait]
impl Scanner for LoadBalancerScanner {
    fn argument_name(&self) -> &'static str {
        "load-balancers"
    }

    fn label(&self) -> &'static str {
        "Load Balancers"
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let elb = options.session.load_balancing();
        let elb_limiter =
            scan_limiter(&options.account_id, &options.region, "elasticloadbalancing");
        let cloudwatch = scan_limiter(&options.account_id, &options.region, "cloudwatch");
        let metrics = options.session.metrics();

        let balancers = rate_limited(&elb_limiter, &options.cancel, || {
            elb.describe_load_balancers()
        })
        .await?;
        debug!(count = balancers.len(), region = %options.region, "Describing load balancers");

        let mut results = Vec::new();
        for balancer in balancers {
            if !older_than_days(balancer.created_time, options.days_unused) {
                continue;
            }

            let mut reasons = Vec::new();

            let arn = balancer.arn.clone();
            let targets =
                rate_limited(&elb_limiter, &options.cancel, || elb.target_count(&arn)).await?;
            if targets == 0 {
                reasons.push("No targets are registered with this load balancer".to_string());
            }

            let namespace = if balancer.lb_type == "network" {
                "AWS/NetworkELB"
            } else {
                "AWS/ApplicationELB"
            };
            let dimension = metric_dimension(&balancer.arn);
            let traffic_configs = vec![
                MetricConfig::over_days(
                    "requests",
                    namespace,
                    "RequestCount",
                    vec![("LoadBalancer".to_string(), dimension.clone())],
                    Statistic::Sum,
                    PERIOD_ONE_DAY,
                    options.days_unused,
                ),
                MetricConfig::over_days(
                    "bytes",
                    namespace,
                    "ProcessedBytes",
                    vec![("LoadBalancer".to_string(), dimension.clone())],
                    Statistic::Sum,
                    PERIOD_ONE_DAY,
                    options.days_unused,
                ),
            ];
            let traffic = rate_limited(&cloudwatch, &options.cancel, || {
                fetch_metrics(metrics.as_ref(), &traffic_configs)
            })
            .await?;
            let requests = traffic.get("requests").copied().unwrap_or(0.0);
            let bytes = traffic.get("bytes").copied().unwrap_or(0.0);
            if requests < LOW_TRAFFIC_REQUESTS && bytes < LOW_TRAFFIC_BYTES {
                reasons.push(format!(
                    "No request or byte traffic in the last {} days",
                    options.days_unused
                ));
            } else if requests >= LOW_TRAFFIC_REQUESTS {
                // Flat hourly request counts point at health checks rather
                // than real clients.
                let series_config = MetricConfig::over_days(
                    "request_series",
                    namespace,
                    "RequestCount",
                    vec![("LoadBalancer".to_string(), dimension.clone())],
                    Statistic::Sum,
                    PERIOD_ONE_HOUR,
                    options.days_unused,
                );
                let series = rate_limited(&cloudwatch, &options.cancel, || {
                    metrics.metric_series(&series_config)
                })
                .await?;
                let stddev = std_deviation(&series);
                if !series.is_empty() && stddev < MIN_REQUEST_STDDEV {
                    reasons.push(format!(
                        "Request variation {stddev:.2} is below {MIN_REQUEST_STDDEV:.2}, suggesting only synthetic traffic"
                    ));
                }
            }

            if reasons.is_empty() {
                continue;
            }

            let mut cost_config = ResourceCostConfig::new(
                ResourceType::LoadBalancer,
                ResourceSize::Gigabytes(0),
                &options.region,
            );
            cost_config.creation_time = balancer.created_time;
            cost_config.lb_type = Some(balancer.lb_type.clone());
            let cost = match self
                .estimator
                .calculate_cost(&options.cancel, &cost_config)
                .await
            {
                Ok(breakdown) => Some(json!({ "total": breakdown })),
                Err(err) => {
                    warn!(balancer = %balancer.name, "No cost estimate: {err}");
                    None
                }
            };

            results.push(ScanResult {
                resource_type: self.label().to_string(),
                resource_name: name_from_tags(&balancer.tags, &balancer.name),
                resource_id: balancer.arn.clone(),
                account_id: options.account_id.clone(),
                region: options.region.clone(),
                reason: reasons.join("\n"),
                tags: balancer.tags.clone(),
                details: json!({
                    "lb_type": balancer.lb_type,
                    "state": balancer.state,
                    "created_time": balancer.created_time,
                    "registered_targets": targets,
                    "requests": requests,
                    "processed_bytes": bytes,
                }),
                cost,
            });
        }

        Ok(results)
    }
}

/// CloudWatch wants the trailing `app/name/id` portion of the ARN.
fn metric_dimension(arn: &str) -> String {
    arn.splitn(2, "loadbalancer/")
        .nth(1)
        .unwrap_or(arn)
        .to_string()
}
