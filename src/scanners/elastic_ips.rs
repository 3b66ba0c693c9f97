use crate::{
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

pub struct ElasticIpScanner {
    estimator: Arc<CostEstimator>,
}

impl ElasticIpScanner {
    pub fn new(estimator: Arc<CostEstimator>) -> Self {
        Self { estimator }
    }
}

#[async_trait]
impl Scanner for ElasticIpScanner {
    fn argument_name(&self) -> &'static str {
        "elastic-ips"
    }

    fn label(&self) -> &'static str {
        "Elastic IPs"
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let compute = options.session.compute();
        let ec2 = scan_limiter(&options.account_id, &options.region, "ec2");

        let addresses =
            rate_limited(&ec2, &options.cancel, || compute.describe_addresses()).await?;
        debug!(count = addresses.len(), region = %options.region, "Describing elastic IPs");

        let mut results = Vec::new();
        for address in addresses {
            // Any binding (instance, interface, or the association a NAT
            // gateway holds) makes the address used.
            if address.instance_id.is_some()
                || address.network_interface_id.is_some()
                || address.association_id.is_some()
            {
                continue;
            }

            // Unattached addresses have no meaningful creation instant, so
            // no lifetime is reported.
            let config = ResourceCostConfig::new(
                ResourceType::ElasticIp,
                ResourceSize::Gigabytes(0),
                &options.region,
            );
            let cost = match self.estimator.calculate_cost(&options.cancel, &config).await {
                Ok(breakdown) => Some(json!({ "total": breakdown })),
                Err(err) => {
                    warn!(address = %address.allocation_id, "No cost estimate: {err}");
                    None
                }
            };

            results.push(ScanResult {
                resource_type: self.label().to_string(),
                resource_name: name_from_tags(&address.tags, &address.public_ip),
                resource_id: address.allocation_id.clone(),
                account_id: options.account_id.clone(),
                region: options.region.clone(),
                reason:
                    "Elastic IP is not associated with any instance, network interface, or NAT gateway"
                        .to_string(),
                tags: address.tags.clone(),
                details: json!({
                    "public_ip": address.public_ip,
                }),
                cost,
            });
        }

        Ok(results)
    }
}
