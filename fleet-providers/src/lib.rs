use anyhow::Result;
use async_trait::async_trait;
use fleet_common::{RemoteSnapshot, RunInstancesRequest, Tag, VolumeSpec};

/// Remote compute API used by the instance lifecycle.
///
/// Every call is scoped to a `region` (zone-scoped providers interpret it as the zone).
/// Adapters translate the provider-neutral `RunInstancesRequest`, `Tag` and
/// `RemoteSnapshot` values to and from their own wire shapes.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Describe instances by id. Ids with no remote counterpart are absent from the result.
    async fn describe_instances(
        &self,
        region: &str,
        instance_ids: &[String],
    ) -> Result<Vec<RemoteSnapshot>>;

    /// Submit a creation request; returns the snapshots of the instances it started.
    async fn run_instances(
        &self,
        region: &str,
        request: &RunInstancesRequest,
    ) -> Result<Vec<RemoteSnapshot>>;

    async fn create_tags(&self, region: &str, instance_ids: &[String], tags: &[Tag])
        -> Result<()>;

    async fn terminate_instances(&self, region: &str, instance_ids: &[String]) -> Result<()>;

    async fn reboot_instances(&self, region: &str, instance_ids: &[String]) -> Result<()>;

    // Optional: volume lifecycle (Block Storage, EBS, etc.)
    // Default implementations allow providers that don't support volumes to compile.
    // `Ok(None)` / `Ok(false)` mean "not supported", not failure.
    async fn create_volume(
        &self,
        _region: &str,
        _zone: &str,
        _volume: &VolumeSpec,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    async fn attach_volume(
        &self,
        _region: &str,
        _instance_id: &str,
        _volume_id: &str,
        _device: Option<&str>,
    ) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "scaleway")]
pub mod scaleway;
