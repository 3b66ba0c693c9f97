use crate::{
    error::Result,
    ratelimit::scan_limiter,
    scanners::{older_than_days, rate_limited, Scanner},
    types::{ScanOptions, ScanResult},
    utils::format_time_difference,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;

pub struct IamRoleScanner;

impl IamRoleScanner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IamRoleScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for IamRoleScanner {
    fn argument_name(&self) -> &'static str {
        "iam-roles"
    }

    fn label(&self) -> &'static str {
        "IAM Roles"
    }

    fn account_global(&self) -> bool {
        true
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let identity = options.session.identity();
        let iam = scan_limiter(&options.account_id, "global", "iam");

        let roles = rate_limited(&iam, &options.cancel, || identity.list_roles()).await?;
        debug!(count = roles.len(), account = %options.account_id, "Listing IAM roles");

        let mut results = Vec::new();
        for role in roles {
            // Service-linked roles are managed by the provider.
            if role.name.starts_with("AWSServiceRole") {
                continue;
            }

            let unused = match role.last_used {
                None => older_than_days(role.create_date, options.days_unused),
                Some(last) => older_than_days(Some(last), options.days_unused),
            };
            if !unused {
                continue;
            }

            let now = Utc::now();
            let mut reasons = vec![match role.last_used {
                None => "Role has never been assumed".to_string(),
                Some(last) => format!(
                    "Role was last assumed {} ago",
                    format_time_difference(now, Some(last))
                ),
            }];
            if role.attached_policy_count == 0 {
                reasons.push("No policies are attached to this role".to_string());
            }

            results.push(ScanResult {
                resource_type: self.label().to_string(),
                resource_name: role.name.clone(),
                resource_id: role.name.clone(),
                account_id: options.account_id.clone(),
                region: options.region.clone(),
                reason: reasons.join("\n"),
                tags: role.tags.clone(),
                details: json!({
                    "create_date": role.create_date,
                    "last_used": role.last_used,
                    "attached_policy_count": role.attached_policy_count,
                }),
                cost: None,
            });
        }

        Ok(results)
    }
}
