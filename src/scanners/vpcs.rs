use crate::{
    error::Result,
    ratelimit::scan_limiter,
    scanners::{name_from_tags, rate_limited, Scanner},
    types::{ScanOptions, ScanResult},
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use tracing::debug;

pub struct VpcScanner;

impl VpcScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for VpcScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for VpcScanner {
    fn argument_name(&self) -> &'static str {
        "vpcs"
    }

    fn label(&self) -> &'static str {
        "VPCs"
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let compute = options.session.compute();
        let ec2 = scan_limiter(&options.account_id, &options.region, "ec2");

        let vpcs = rate_limited(&ec2, &options.cancel, || compute.describe_vpcs()).await?;
        debug!(count = vpcs.len(), region = %options.region, "Describing VPCs");

        let instances =
            rate_limited(&ec2, &options.cancel, || compute.describe_instances()).await?;
        // An instance anywhere inside the VPC keeps it alive.
        let occupied: HashSet<&str> = instances
            .iter()
            .filter(|instance| instance.state != "terminated")
            .filter_map(|instance| instance.vpc_id.as_deref())
            .collect();

        let mut results = Vec::new();
        for vpc in vpcs {
            if vpc.is_default {
                continue;
            }
            if occupied.contains(vpc.id.as_str()) {
                continue;
            }

            results.push(ScanResult {
                resource_type: self.label().to_string(),
                resource_name: name_from_tags(&vpc.tags, &vpc.id),
                resource_id: vpc.id.clone(),
                account_id: options.account_id.clone(),
                region: options.region.clone(),
                reason: "VPC is not the default and contains no instances".to_string(),
                tags: vpc.tags.clone(),
                details: json!({
                    "cidr_block": vpc.cidr_block,
                    "is_default": vpc.is_default,
                }),
                cost: None,
            });
        }

        Ok(results)
    }
}
