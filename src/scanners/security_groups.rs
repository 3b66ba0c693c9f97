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

pub struct SecurityGroupScanner;

impl SecurityGroupScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SecurityGroupScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for SecurityGroupScanner {
    fn argument_name(&self) -> &'static str {
        "security-groups"
    }

    fn label(&self) -> &'static str {
        "Security Groups"
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let compute = options.session.compute();
        let ec2 = scan_limiter(&options.account_id, &options.region, "ec2");

        let groups =
            rate_limited(&ec2, &options.cancel, || compute.describe_security_groups()).await?;
        debug!(count = groups.len(), region = %options.region, "Describing security groups");

        let interfaces = rate_limited(&ec2, &options.cancel, || {
            compute.describe_network_interfaces()
        })
        .await?;
        let attached_groups: HashSet<&str> = interfaces
            .iter()
            .flat_map(|eni| eni.security_group_ids.iter().map(String::as_str))
            .collect();

        let mut results = Vec::new();
        for group in groups {
            // The default group cannot be deleted; never report it.
            if group.name == "default" {
                continue;
            }
            if attached_groups.contains(group.id.as_str()) {
                continue;
            }

            results.push(ScanResult {
                resource_type: self.label().to_string(),
                resource_name: name_from_tags(&group.tags, &group.name),
                resource_id: group.id.clone(),
                account_id: options.account_id.clone(),
                region: options.region.clone(),
                reason: "Security group is not associated with any network interface".to_string(),
                tags: group.tags.clone(),
                details: json!({
                    "group_name": group.name,
                    "description": group.description,
                    "vpc_id": group.vpc_id,
                }),
                cost: None,
            });
        }

        Ok(results)
    }
}
