use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod error;

pub use error::{IncompleteCreate, ProvisionError, RecordFailure};

/// Tag key carrying the human-readable instance name.
pub const NAME_TAG: &str = "Name";

/// Well-known remote state names.
/// Valid values are: pending, running, shutting-down, terminated, stopping, stopped.
pub mod states {
    pub const PENDING: &str = "pending";
    pub const RUNNING: &str = "running";
    pub const SHUTTING_DOWN: &str = "shutting-down";
    pub const TERMINATED: &str = "terminated";
    pub const STOPPING: &str = "stopping";
    pub const STOPPED: &str = "stopped";
}

// --- Remote view (provider-owned, immutable) ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The `Name` tag applied to every instance right after creation.
    pub fn name(value: impl Into<String>) -> Self {
        Self::new(NAME_TAG, value)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SecurityGroupRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SecurityGroupRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct InstanceState {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl InstanceState {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: None,
        }
    }
}

/// The provider's authoritative view of one instance at a point in time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct RemoteSnapshot {
    pub instance_id: String,
    pub instance_type: String,
    pub image_id: String,
    pub subnet_id: String,
    pub key_name: String,
    pub availability_zone: String,
    pub ebs_optimized: bool,
    pub security_groups: Vec<SecurityGroupRef>,
    pub state: InstanceState,
    pub tags: Vec<Tag>,
    pub private_ip_address: Option<String>,
    pub public_ip_address: Option<String>,
    pub placement_group: Option<String>,
    pub launch_time: Option<DateTime<Utc>>,
}

impl RemoteSnapshot {
    /// Value of the first tag with `key`, if any.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value.as_str())
    }
}

// --- Declarative inputs ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct VolumeSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub size_gb: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iops: Option<u32>,
}

/// Desired instance shape. A resolvable field that is `None` or empty takes the cluster
/// default; any other value is kept as is.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct MachineTemplate {
    /// Only honoured for single-machine runs (adoption). Expansion always clears it.
    pub id: Option<String>,
    pub name: String,
    pub instance_type: String,
    pub image_id: Option<String>,
    pub region: Option<String>,
    pub key_name: Option<String>,
    pub security_groups: Option<Vec<String>>,
    pub subnet_id: Option<String>,
    pub availability_zone: Option<String>,
    pub cloud_config: Option<PathBuf>,
    pub ebs_optimized: bool,
    pub enable_api_termination: bool,
    pub shutdown_behavior: Option<String>,
    pub placement_group: Option<String>,
    pub volumes: Vec<VolumeSpec>,
}

/// Cluster-wide fallbacks, read-only once loaded.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ClusterDefaults {
    pub image_id: Option<String>,
    pub region: Option<String>,
    pub key_name: Option<String>,
    pub security_groups: Option<Vec<String>>,
    pub subnet_id: Option<String>,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEntry {
    pub machine: MachineTemplate,
    pub nodes: u32,
}

// --- Live entity ---

/// The mutable per-node entity driven from unprovisioned to confirmed running.
#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct InstanceRecord {
    pub id: Option<String>,
    pub name: String,
    pub instance_type: String,
    pub image_id: String,
    pub region: String,
    pub key_name: String,
    pub security_groups: Vec<String>,
    pub subnet_id: String,
    pub availability_zone: String,
    pub cloud_config: Option<PathBuf>,
    pub ebs_optimized: bool,
    pub enable_api_termination: bool,
    pub shutdown_behavior: Option<String>,
    pub placement_group: Option<String>,
    pub volumes: Vec<VolumeSpec>,
    /// Last snapshot merged into this record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<RemoteSnapshot>,
}

impl InstanceRecord {
    pub fn from_template(template: &MachineTemplate) -> Self {
        Self {
            id: template.id.clone().filter(|id| !id.is_empty()),
            name: template.name.clone(),
            instance_type: template.instance_type.clone(),
            image_id: template.image_id.clone().unwrap_or_default(),
            region: template.region.clone().unwrap_or_default(),
            key_name: template.key_name.clone().unwrap_or_default(),
            security_groups: template.security_groups.clone().unwrap_or_default(),
            subnet_id: template.subnet_id.clone().unwrap_or_default(),
            availability_zone: template.availability_zone.clone().unwrap_or_default(),
            cloud_config: template.cloud_config.clone(),
            ebs_optimized: template.ebs_optimized,
            enable_api_termination: template.enable_api_termination,
            shutdown_behavior: template.shutdown_behavior.clone(),
            placement_group: template.placement_group.clone(),
            volumes: template.volumes.clone(),
            snapshot: None,
        }
    }

    /// Identifier of the remote instance, if one is believed to exist.
    pub fn identifier(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Last-known remote state name; empty until a snapshot has been merged.
    pub fn state(&self) -> &str {
        self.snapshot
            .as_ref()
            .map(|snapshot| snapshot.state.name.as_str())
            .unwrap_or("")
    }

    pub fn private_ip_address(&self) -> Option<&str> {
        self.snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.private_ip_address.as_deref())
    }

    /// Merge a remote snapshot into this record. The remote side is authoritative:
    /// every field it reports overwrites the local value, and the name is taken from
    /// the first `Name` tag when one is present.
    pub fn apply_snapshot(&mut self, snapshot: &RemoteSnapshot) {
        self.snapshot = Some(snapshot.clone());

        self.id = Some(snapshot.instance_id.clone());
        self.instance_type = snapshot.instance_type.clone();
        self.image_id = snapshot.image_id.clone();
        self.subnet_id = snapshot.subnet_id.clone();
        self.key_name = snapshot.key_name.clone();
        self.availability_zone = snapshot.availability_zone.clone();
        self.ebs_optimized = snapshot.ebs_optimized;
        self.security_groups = snapshot
            .security_groups
            .iter()
            .map(|group| group.id.clone())
            .collect();

        if let Some(name) = snapshot.tag(NAME_TAG) {
            self.name = name.to_string();
        }
    }

    /// Wrap `error` with this record's identity.
    pub fn fail(&self, error: ProvisionError) -> RecordFailure {
        RecordFailure {
            name: self.name.clone(),
            id: self.identifier().map(str::to_string),
            error,
        }
    }
}

/// Provider-neutral creation request built from a record.
#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct RunInstancesRequest {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_groups: Vec<String>,
    pub subnet_id: String,
    pub availability_zone: String,
    pub ebs_optimized: bool,
    pub disable_api_termination: bool,
    pub placement_group: Option<String>,
    pub shutdown_behavior: Option<String>,
    #[serde(skip)]
    pub user_data: Option<Vec<u8>>,
}

impl RunInstancesRequest {
    pub fn for_record(record: &InstanceRecord) -> Self {
        Self {
            name: record.name.clone(),
            image_id: record.image_id.clone(),
            instance_type: record.instance_type.clone(),
            key_name: record.key_name.clone(),
            security_groups: record.security_groups.clone(),
            subnet_id: record.subnet_id.clone(),
            availability_zone: record.availability_zone.clone(),
            ebs_optimized: record.ebs_optimized,
            disable_api_termination: !record.enable_api_termination,
            placement_group: record.placement_group.clone().filter(|s| !s.is_empty()),
            shutdown_behavior: record.shutdown_behavior.clone().filter(|s| !s.is_empty()),
            user_data: None,
        }
    }
}
