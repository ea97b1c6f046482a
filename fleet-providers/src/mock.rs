use crate::ComputeProvider;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use fleet_common::{
    states, InstanceState, RemoteSnapshot, RunInstancesRequest, SecurityGroupRef, Tag, VolumeSpec,
};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// In-memory provider for dry runs and tests.
///
/// Instance ids are sequential (`i-1`, `i-2`, ...) and private addresses are allocated
/// deterministically from the same sequence. New instances start `pending` and report
/// `running` after `boot_polls` describe calls (0 = running immediately).
pub struct MockProvider {
    boot_polls: u32,
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    next_instance: u64,
    next_volume: u64,
    instances: HashMap<String, MockInstance>,
    volumes: HashMap<String, MockVolume>,
    reboots: HashMap<String, u32>,
}

struct MockInstance {
    region: String,
    snapshot: RemoteSnapshot,
    polls_left: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockVolume {
    pub name: String,
    pub size_gb: u64,
    pub attached_to: Option<String>,
    pub device: Option<String>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            boot_polls: 1,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_boot_polls(mut self, boot_polls: u32) -> Self {
        self.boot_polls = boot_polls;
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("MockProvider: state lock poisoned"))
    }

    /// Current snapshot of an instance, without advancing its boot sequence.
    pub fn instance(&self, instance_id: &str) -> Option<RemoteSnapshot> {
        let state = self.lock().ok()?;
        state
            .instances
            .get(instance_id)
            .map(|instance| instance.snapshot.clone())
    }

    pub fn volume_count(&self) -> usize {
        self.lock().map(|state| state.volumes.len()).unwrap_or(0)
    }

    pub fn volume(&self, volume_id: &str) -> Option<MockVolume> {
        let state = self.lock().ok()?;
        state.volumes.get(volume_id).cloned()
    }

    pub fn reboot_count(&self, instance_id: &str) -> u32 {
        self.lock()
            .ok()
            .and_then(|state| state.reboots.get(instance_id).copied())
            .unwrap_or(0)
    }

    fn check_known(state: &MockState, region: &str, instance_ids: &[String]) -> Result<()> {
        for id in instance_ids {
            match state.instances.get(id) {
                Some(instance) if instance.region == region => {}
                _ => {
                    return Err(anyhow::anyhow!(
                        "MockProvider: unknown instance '{}' in region '{}'",
                        id,
                        region
                    ))
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ComputeProvider for MockProvider {
    async fn describe_instances(
        &self,
        region: &str,
        instance_ids: &[String],
    ) -> Result<Vec<RemoteSnapshot>> {
        let mut state = self.lock()?;
        let mut found = Vec::new();
        for id in instance_ids {
            let Some(instance) = state.instances.get_mut(id) else {
                continue;
            };
            if instance.region != region {
                continue;
            }
            if instance.snapshot.state.name == states::PENDING {
                if instance.polls_left <= 1 {
                    instance.polls_left = 0;
                    instance.snapshot.state = InstanceState {
                        name: states::RUNNING.to_string(),
                        code: Some(16),
                    };
                } else {
                    instance.polls_left -= 1;
                }
            }
            found.push(instance.snapshot.clone());
        }
        Ok(found)
    }

    async fn run_instances(
        &self,
        region: &str,
        request: &RunInstancesRequest,
    ) -> Result<Vec<RemoteSnapshot>> {
        if request.image_id.is_empty() {
            return Err(anyhow::anyhow!("MockProvider: image id is required"));
        }
        if request.instance_type.is_empty() {
            return Err(anyhow::anyhow!("MockProvider: instance type is required"));
        }

        let mut state = self.lock()?;
        state.next_instance += 1;
        let seq = state.next_instance;
        let instance_id = format!("i-{}", seq);
        let last_octet = (seq % 250) + 1;
        let third_octet = ((seq / 250) % 250) + 1;

        let running = self.boot_polls == 0;
        let snapshot = RemoteSnapshot {
            instance_id: instance_id.clone(),
            instance_type: request.instance_type.clone(),
            image_id: request.image_id.clone(),
            subnet_id: request.subnet_id.clone(),
            key_name: request.key_name.clone(),
            availability_zone: if request.availability_zone.is_empty() {
                format!("{}a", region)
            } else {
                request.availability_zone.clone()
            },
            ebs_optimized: request.ebs_optimized,
            security_groups: request
                .security_groups
                .iter()
                .map(SecurityGroupRef::new)
                .collect(),
            state: if running {
                InstanceState {
                    name: states::RUNNING.to_string(),
                    code: Some(16),
                }
            } else {
                InstanceState {
                    name: states::PENDING.to_string(),
                    code: Some(0),
                }
            },
            tags: Vec::new(),
            private_ip_address: Some(format!("10.0.{}.{}", third_octet, last_octet)),
            public_ip_address: None,
            placement_group: request.placement_group.clone(),
            launch_time: Some(Utc::now()),
        };

        debug!(
            instance_id = %instance_id,
            region,
            user_data_bytes = request.user_data.as_ref().map(Vec::len).unwrap_or(0),
            "[MockProvider] run_instances"
        );

        state.instances.insert(
            instance_id,
            MockInstance {
                region: region.to_string(),
                snapshot: snapshot.clone(),
                polls_left: self.boot_polls,
            },
        );
        Ok(vec![snapshot])
    }

    async fn create_tags(
        &self,
        region: &str,
        instance_ids: &[String],
        tags: &[Tag],
    ) -> Result<()> {
        let mut state = self.lock()?;
        Self::check_known(&state, region, instance_ids)?;
        for id in instance_ids {
            if let Some(instance) = state.instances.get_mut(id) {
                for tag in tags {
                    let existing = &mut instance.snapshot.tags;
                    match existing.iter_mut().find(|t| t.key == tag.key) {
                        Some(t) => t.value = tag.value.clone(),
                        None => existing.push(tag.clone()),
                    }
                }
            }
        }
        Ok(())
    }

    async fn terminate_instances(&self, region: &str, instance_ids: &[String]) -> Result<()> {
        let mut state = self.lock()?;
        Self::check_known(&state, region, instance_ids)?;
        for id in instance_ids {
            if let Some(instance) = state.instances.get_mut(id) {
                instance.snapshot.state = InstanceState {
                    name: states::TERMINATED.to_string(),
                    code: Some(48),
                };
            }
        }
        Ok(())
    }

    async fn reboot_instances(&self, region: &str, instance_ids: &[String]) -> Result<()> {
        let mut state = self.lock()?;
        Self::check_known(&state, region, instance_ids)?;
        for id in instance_ids {
            *state.reboots.entry(id.clone()).or_insert(0) += 1;
        }
        Ok(())
    }

    async fn create_volume(
        &self,
        _region: &str,
        _zone: &str,
        volume: &VolumeSpec,
    ) -> Result<Option<String>> {
        let mut state = self.lock()?;
        state.next_volume += 1;
        let volume_id = format!("vol-{}", state.next_volume);
        state.volumes.insert(
            volume_id.clone(),
            MockVolume {
                name: volume.name.clone(),
                size_gb: volume.size_gb,
                attached_to: None,
                device: None,
            },
        );
        Ok(Some(volume_id))
    }

    async fn attach_volume(
        &self,
        region: &str,
        instance_id: &str,
        volume_id: &str,
        device: Option<&str>,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        Self::check_known(&state, region, &[instance_id.to_string()])?;
        let volume = state
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| anyhow::anyhow!("MockProvider: unknown volume '{}'", volume_id))?;
        if let Some(current) = &volume.attached_to {
            if current != instance_id {
                return Err(anyhow::anyhow!(
                    "MockProvider: volume '{}' already attached to '{}'",
                    volume_id,
                    current
                ));
            }
        }
        volume.attached_to = Some(instance_id.to_string());
        volume.device = device.map(str::to_string);
        Ok(true)
    }
}
