use crate::{
    aws::metrics::{fetch_metrics, MetricConfig, Statistic, PERIOD_ONE_DAY},
    error::Result,
    ratelimit::scan_limiter,
    scanners::{name_from_tags, older_than_days, rate_limited, Scanner},
    types::{ScanOptions, ScanResult},
};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

pub struct S3BucketScanner;

impl S3BucketScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for S3BucketScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for S3BucketScanner {
    fn argument_name(&self) -> &'static str {
        "s3-buckets"
    }

    fn label(&self) -> &'static str {
        "S3 Buckets"
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let s3 = options.session.object_storage();
        let s3_limiter = scan_limiter(&options.account_id, &options.region, "s3");
        let cloudwatch = scan_limiter(&options.account_id, &options.region, "cloudwatch");
        let metrics = options.session.metrics();

        let buckets = rate_limited(&s3_limiter, &options.cancel, || s3.list_buckets()).await?;
        debug!(count = buckets.len(), region = %options.region, "Listing S3 buckets");

        let mut results = Vec::new();
        for bucket in buckets {
            if !older_than_days(bucket.creation_date, options.days_unused) {
                continue;
            }

            let request_configs: Vec<MetricConfig> = ["GetRequests", "PutRequests", "DeleteRequests"]
                .iter()
                .map(|metric| {
                    MetricConfig::over_days(
                        metric.to_lowercase(),
                        "AWS/S3",
                        *metric,
                        vec![
                            ("BucketName".to_string(), bucket.name.clone()),
                            ("FilterId".to_string(), "EntireBucket".to_string()),
                        ],
                        Statistic::Sum,
                        PERIOD_ONE_DAY,
                        options.days_unused,
                    )
                })
                .collect();
            let requests = rate_limited(&cloudwatch, &options.cancel, || {
                fetch_metrics(metrics.as_ref(), &request_configs)
            })
            .await?;
            let total_requests: f64 = requests.values().sum();
            if total_requests > 0.0 {
                continue;
            }

            results.push(ScanResult {
                resource_type: self.label().to_string(),
                resource_name: name_from_tags(&bucket.tags, &bucket.name),
                resource_id: bucket.name.clone(),
                account_id: options.account_id.clone(),
                region: options.region.clone(),
                reason: format!(
                    "No GET, PUT, or DELETE requests in the last {} days",
                    options.days_unused
                ),
                tags: bucket.tags.clone(),
                details: json!({
                    "creation_date": bucket.creation_date,
                }),
                cost: None,
            });
        }

        Ok(results)
    }
}
