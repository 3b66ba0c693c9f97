use crate::aws::CloudSession;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;

/// A provider account (tenant) discovered by the account-listing
/// collaborator and handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
}

impl Account {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Per-task scan parameters. Immutable for the lifetime of one scanner
/// invocation.
#[derive(Clone)]
pub struct ScanOptions {
    pub region: String,
    pub account_id: String,
    /// Unused-age threshold in days.
    pub days_unused: i64,
    /// Region/account-scoped auth handle vending the service clients.
    pub session: Arc<dyn CloudSession>,
    /// Run-scoped cancellation, observed by every limiter wait and remote
    /// call.
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for ScanOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOptions")
            .field("region", &self.region)
            .field("account_id", &self.account_id)
            .field("days_unused", &self.days_unused)
            .finish()
    }
}

pub const DEFAULT_DAYS_UNUSED: i64 = 90;

/// One unused-resource finding. `details` is opaque structured data for the
/// report renderer; `cost` maps component names ("total", "instance", "ebs")
/// to cost breakdowns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub resource_type: String,
    pub resource_name: String,
    pub resource_id: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub region: String,
    /// Free-form, one line per triggering condition. Never empty.
    pub reason: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<serde_json::Value>,
}

/// Summary statistics for one dispatcher run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanMetrics {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub peak_workers: usize,
    pub avg_execution_time_ms: f64,
    pub total_run_time_ms: u64,
    pub tasks_per_second: f64,
}

/// Post-scan ignore lists. All matching is case-insensitive exact match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IgnoreFilters {
    #[serde(default)]
    pub resource_ids: Vec<String>,
    #[serde(default)]
    pub resource_names: Vec<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl IgnoreFilters {
    pub fn is_empty(&self) -> bool {
        self.resource_ids.is_empty() && self.resource_names.is_empty() && self.tags.is_empty()
    }

    fn matches(&self, result: &ScanResult) -> bool {
        let id = result.resource_id.to_lowercase();
        if self.resource_ids.iter().any(|i| i.to_lowercase() == id) {
            return true;
        }

        let name = result.resource_name.to_lowercase();
        if self.resource_names.iter().any(|n| n.to_lowercase() == name) {
            return true;
        }

        for (key, value) in &self.tags {
            let key = key.to_lowercase();
            let value = value.to_lowercase();
            let hit = result
                .tags
                .iter()
                .any(|(k, v)| k.to_lowercase() == key && v.to_lowercase() == value);
            if hit {
                return true;
            }
        }

        false
    }

    /// Drop every result matching any ignore rule. Idempotent and
    /// order-independent.
    pub fn apply(&self, results: Vec<ScanResult>) -> Vec<ScanResult> {
        if self.is_empty() {
            return results;
        }
        results.into_iter().filter(|r| !self.matches(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, name: &str, tags: &[(&str, &str)]) -> ScanResult {
        ScanResult {
            resource_type: "EBS Volumes".to_string(),
            resource_name: name.to_string(),
            resource_id: id.to_string(),
            account_id: "123456789012".to_string(),
            region: "us-east-1".to_string(),
            reason: "Volume is not attached to any instance".to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            details: serde_json::json!({}),
            cost: None,
        }
    }

    #[test]
    fn filter_by_id_is_case_insensitive() {
        let filters = IgnoreFilters {
            resource_ids: vec!["VOL-ABC123".to_string()],
            ..Default::default()
        };
        let kept = filters.apply(vec![
            result("vol-abc123", "data", &[]),
            result("vol-def456", "logs", &[]),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].resource_id, "vol-def456");
    }

    #[test]
    fn filter_by_name_is_case_insensitive() {
        let filters = IgnoreFilters {
            resource_names: vec!["Data".to_string()],
            ..Default::default()
        };
        let kept = filters.apply(vec![
            result("vol-1", "data", &[]),
            result("vol-2", "logs", &[]),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].resource_name, "logs");
    }

    #[test]
    fn filter_by_tag_matches_key_and_value_case_insensitively() {
        let filters = IgnoreFilters {
            tags: HashMap::from([("environment".to_string(), "PRODUCTION".to_string())]),
            ..Default::default()
        };
        let kept = filters.apply(vec![
            result("vol-1", "a", &[("Environment", "production")]),
            result("vol-2", "b", &[]),
            result("vol-3", "c", &[("Environment", "staging")]),
        ]);
        let ids: Vec<_> = kept.iter().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["vol-2", "vol-3"]);
    }

    #[test]
    fn filtering_twice_is_a_no_op() {
        let filters = IgnoreFilters {
            resource_ids: vec!["vol-1".to_string()],
            ..Default::default()
        };
        let once = filters.apply(vec![
            result("vol-1", "a", &[]),
            result("vol-2", "b", &[]),
        ]);
        let twice = filters.apply(once.clone());
        assert_eq!(once.len(), twice.len());
        assert_eq!(twice[0].resource_id, "vol-2");
    }

    #[test]
    fn empty_filters_keep_everything() {
        let filters = IgnoreFilters::default();
        let kept = filters.apply(vec![result("vol-1", "a", &[])]);
        assert_eq!(kept.len(), 1);
    }
}
