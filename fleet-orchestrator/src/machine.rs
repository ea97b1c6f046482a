use fleet_common::{InstanceRecord, ProvisionError, RecordFailure, RemoteSnapshot};

use crate::lifecycle::InstanceLifecycle;
use crate::logger::LifecycleEvent;

/// Bring one record to running (creating or adopting it), then make sure its volumes
/// exist and are attached.
pub async fn provision_machine(
    lifecycle: &InstanceLifecycle,
    record: &mut InstanceRecord,
) -> Result<RemoteSnapshot, RecordFailure> {
    let created = record.identifier().is_none();
    let snapshot = lifecycle.get(record).await?;

    if !record.volumes.is_empty() {
        ensure_volumes(lifecycle, record, created)
            .await
            .map_err(|e| record.fail(e))?;
    }
    Ok(snapshot)
}

/// Create every volume that has no id yet and attach it to the record's instance.
///
/// Only instances created in this run get volumes. An adopted instance is assumed to have
/// its volumes already, whether or not the record carries their ids.
pub async fn ensure_volumes(
    lifecycle: &InstanceLifecycle,
    record: &mut InstanceRecord,
    created: bool,
) -> Result<(), ProvisionError> {
    let instance_id = record
        .identifier()
        .map(str::to_string)
        .ok_or(ProvisionError::MissingIdentifier)?;
    let provider = lifecycle.provider();
    let observer = lifecycle.observer();
    let zone = record.availability_zone.clone();

    if !created {
        for volume in &record.volumes {
            tracing::debug!(
                instance_id = %instance_id,
                volume = %volume.name,
                "adopted instance keeps its volumes"
            );
        }
        return Ok(());
    }

    for volume in record.volumes.iter_mut() {
        let volume_id = match volume.id.clone().filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => {
                let Some(id) = provider
                    .create_volume(&record.region, &zone, volume)
                    .await
                    .map_err(|source| ProvisionError::Volume {
                        volume: volume.name.clone(),
                        source,
                    })?
                else {
                    observer.notify(&LifecycleEvent::VolumeSkipped {
                        name: record.name.clone(),
                        volume: volume.name.clone(),
                        reason: "provider does not support volume creation".to_string(),
                    });
                    continue;
                };
                volume.id = Some(id.clone());
                observer.notify(&LifecycleEvent::VolumeCreated {
                    name: record.name.clone(),
                    volume: volume.name.clone(),
                    volume_id: id.clone(),
                });
                id
            }
        };

        let attached = provider
            .attach_volume(
                &record.region,
                &instance_id,
                &volume_id,
                volume.device.as_deref(),
            )
            .await
            .map_err(|source| ProvisionError::Volume {
                volume: volume.name.clone(),
                source,
            })?;
        if attached {
            observer.notify(&LifecycleEvent::VolumeAttached {
                name: record.name.clone(),
                volume_id,
                instance_id: instance_id.clone(),
            });
        } else {
            observer.notify(&LifecycleEvent::VolumeSkipped {
                name: record.name.clone(),
                volume: volume.name.clone(),
                reason: "provider does not support volume attachment".to_string(),
            });
        }
    }
    Ok(())
}
