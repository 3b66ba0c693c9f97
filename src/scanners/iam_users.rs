use crate::{
    aws::{types::UserInfo, IdentityClient},
    error::Result,
    pool::{Task, WorkerPool},
    ratelimit::{scan_limiter, RateLimiter},
    scanners::{older_than_days, rate_limited, Scanner},
    types::{ScanOptions, ScanResult},
    utils::format_time_difference,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct IamUserScanner {
    pool: Arc<WorkerPool>,
}

impl IamUserScanner {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Scanner for IamUserScanner {
    fn argument_name(&self) -> &'static str {
        "iam-users"
    }

    fn label(&self) -> &'static str {
        "IAM Users"
    }

    fn account_global(&self) -> bool {
        true
    }

    async fn scan(&self, options: &ScanOptions) -> Result<Vec<ScanResult>> {
        let identity = options.session.identity();
        let iam = scan_limiter(&options.account_id, "global", "iam");

        let users = rate_limited(&iam, &options.cancel, || identity.list_users()).await?;
        debug!(count = users.len(), account = %options.account_id, "Listing IAM users");

        // This scanner occupies a pool worker itself; fanning sub-queries
        // into a one-worker pool would wait on itself forever.
        if self.pool.size() < 2 {
            let mut collected = Vec::new();
            for user in users {
                if let Some(result) =
                    evaluate_user(&*identity, &iam, options, self.label(), &user).await?
                {
                    collected.push(result);
                }
            }
            collected.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
            return Ok(collected);
        }

        // Per-user access-key lookups are the expensive part; fan them out
        // through the shared pool. The aggregate mutex is only taken to
        // push a finished result, never across I/O.
        let results: Arc<Mutex<Vec<ScanResult>>> = Arc::new(Mutex::new(Vec::new()));
        let mut tasks: Vec<Task> = Vec::new();
        for user in users {
            let identity = identity.clone();
            let iam = iam.clone();
            let results = results.clone();
            let options = options.clone();
            let label = self.label();
            tasks.push(Box::new(move |_pool_cancel| {
                Box::pin(async move {
                    let finding =
                        evaluate_user(&*identity, &iam, &options, label, &user).await?;
                    if let Some(result) = finding {
                        results.lock().unwrap().push(result);
                    }
                    Ok(())
                })
            }));
        }
        self.pool.execute_tasks(tasks).await?;

        let mut collected = std::mem::take(&mut *results.lock().unwrap());
        collected.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        Ok(collected)
    }
}

async fn evaluate_user(
    identity: &dyn IdentityClient,
    iam: &RateLimiter,
    options: &ScanOptions,
    label: &str,
    user: &UserInfo,
) -> Result<Option<ScanResult>> {
    let keys = rate_limited(iam, &options.cancel, || {
        identity.list_access_keys(&user.user_name)
    })
    .await?;

    let mut key_details = Vec::new();
    let mut last_key_activity: Option<DateTime<Utc>> = None;
    for key in &keys {
        if key.status != "Active" {
            continue;
        }
        let key_id = key.id.clone();
        let last_used = rate_limited(iam, &options.cancel, || {
            identity.access_key_last_used(&key_id)
        })
        .await?;
        if last_used > last_key_activity {
            last_key_activity = last_used;
        }
        key_details.push(json!({
            "access_key_id": key.id,
            "last_used": last_used,
        }));
    }

    let last_activity = std::cmp::max(user.password_last_used, last_key_activity);

    let unused = match last_activity {
        None => older_than_days(user.create_date, options.days_unused),
        Some(last) => older_than_days(Some(last), options.days_unused),
    };
    if !unused {
        return Ok(None);
    }

    let now = Utc::now();
    let mut reasons = vec![match user.password_last_used {
        None => "User has never logged in with a password".to_string(),
        Some(last) => format!(
            "Last console login was {} ago",
            format_time_difference(now, Some(last))
        ),
    }];
    match last_key_activity {
        None if !keys.is_empty() => {
            reasons.push("No active access key has ever been used".to_string());
        }
        Some(last) => {
            reasons.push(format!(
                "Access keys last used {} ago",
                format_time_difference(now, Some(last))
            ));
        }
        None => {}
    }

    Ok(Some(ScanResult {
        resource_type: label.to_string(),
        resource_name: user.user_name.clone(),
        resource_id: user.user_name.clone(),
        account_id: options.account_id.clone(),
        region: options.region.clone(),
        reason: reasons.join("\n"),
        tags: user.tags.clone(),
        details: json!({
            "create_date": user.create_date,
            "password_last_used": user.password_last_used,
            "access_keys": key_details,
        }),
        cost: None,
    }))
}
