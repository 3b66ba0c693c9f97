use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type Tags = HashMap<String, String>;

/// EC2 instance as the scanners consume it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Instance {
    pub id: String,
    pub name: Option<String>,
    /// Lifecycle state name ("running", "stopped", ...).
    pub state: String,
    pub instance_type: String,
    pub launch_time: Option<DateTime<Utc>>,
    /// Parsed from the state-transition reason when the instance is
    /// stopped; absent when the provider gives no timestamp.
    pub state_transition_time: Option<DateTime<Utc>>,
    pub image_id: Option<String>,
    pub vpc_id: Option<String>,
    pub volume_ids: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Volume {
    pub id: String,
    /// "available" means unattached.
    pub state: String,
    pub size_gb: i64,
    pub volume_type: String,
    pub create_time: Option<DateTime<Utc>>,
    pub attached_instance_ids: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub id: String,
    pub volume_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub size_gb: i64,
    pub description: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Image {
    pub id: String,
    pub name: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    /// Backing snapshots from the block device mappings.
    pub snapshot_ids: Vec<String>,
    pub tags: Tags,
}

/// Elastic IP allocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    pub allocation_id: String,
    pub public_ip: String,
    pub instance_id: Option<String>,
    pub network_interface_id: Option<String>,
    pub association_id: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NatGatewayInfo {
    pub id: String,
    pub state: String,
    pub vpc_id: String,
    pub create_time: Option<DateTime<Utc>>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityGroupInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub vpc_id: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkInterface {
    pub id: String,
    pub status: String,
    pub security_group_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VpcInfo {
    pub id: String,
    pub is_default: bool,
    pub cidr_block: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerInfo {
    pub arn: String,
    pub name: String,
    /// "application" or "network".
    pub lb_type: String,
    pub state: String,
    pub created_time: Option<DateTime<Utc>>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbInstanceInfo {
    pub identifier: String,
    pub instance_class: String,
    pub engine: String,
    pub status: String,
    pub create_time: Option<DateTime<Utc>>,
    pub allocated_storage_gb: i64,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableInfo {
    pub name: String,
    pub item_count: i64,
    pub size_bytes: i64,
    /// Provisioned units; zero for on-demand billing.
    pub read_capacity: i64,
    pub write_capacity: i64,
    pub billing_mode: String,
    pub creation_time: Option<DateTime<Utc>>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchDomainInfo {
    pub name: String,
    pub instance_type: String,
    pub instance_count: i64,
    pub storage_gb: i64,
    pub volume_type: String,
    pub created: Option<DateTime<Utc>>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketInfo {
    pub name: String,
    pub creation_date: Option<DateTime<Utc>>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserInfo {
    pub user_name: String,
    pub create_date: Option<DateTime<Utc>>,
    pub password_last_used: Option<DateTime<Utc>>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessKeyInfo {
    pub id: String,
    pub user_name: String,
    pub status: String,
    pub create_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleInfo {
    pub name: String,
    pub create_date: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub attached_policy_count: usize,
    pub tags: Tags,
}
