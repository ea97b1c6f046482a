use std::sync::Arc;
use std::time::Duration;

use fleet_common::{
    states, IncompleteCreate, InstanceRecord, ProvisionError, RecordFailure, RemoteSnapshot, RunInstancesRequest,
    Tag,
};
use fleet_providers::ComputeProvider;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, TokioClock};
use crate::cloud_config;
use crate::logger::{LifecycleEvent, LifecycleObserver, TracingObserver};
use crate::state_machine::{LifecyclePhase, PhaseTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Delay between two polls.
    pub interval: Duration,
    /// Give up with `ProvisionError::Timeout` after this long. `None` waits forever.
    pub max_wait: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_wait: None,
        }
    }
}

/// Drives one record at a time from unprovisioned (or identified) to confirmed running.
///
/// Records are mutated in place: every successful fetch merges the remote snapshot into the
/// record. Failures leave the record as it was after the last successful merge.
pub struct InstanceLifecycle {
    provider: Arc<dyn ComputeProvider>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn LifecycleObserver>,
    cancel: CancellationToken,
    wait: WaitOptions,
}

impl InstanceLifecycle {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        Self {
            provider,
            clock: Arc::new(TokioClock),
            observer: Arc::new(TracingObserver),
            cancel: CancellationToken::new(),
            wait: WaitOptions::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_wait_options(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    pub fn provider(&self) -> &dyn ComputeProvider {
        self.provider.as_ref()
    }

    pub fn observer(&self) -> &dyn LifecycleObserver {
        self.observer.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Create the record's instance when it has no identifier, otherwise adopt the existing
    /// one by loading it. Returns the last confirmed snapshot.
    pub async fn get(&self, record: &mut InstanceRecord) -> Result<RemoteSnapshot, RecordFailure> {
        let result = if record.identifier().is_none() {
            let mut tracker = self.tracker(record, LifecyclePhase::Unprovisioned);
            tracker.advance(LifecyclePhase::Provisioning);
            let result = self.create_inner(record, &mut tracker).await;
            self.finish(&mut tracker, &result);
            result
        } else {
            let mut tracker = self.tracker(record, LifecyclePhase::Identified);
            let result = self.load_inner(record).await;
            match &result {
                Ok(_) => {
                    tracker.advance(LifecyclePhase::Adopted);
                }
                Err(_) => self.finish(&mut tracker, &result),
            }
            result
        };
        result.map_err(|e| self.fail(record, e))
    }

    /// Refresh the record from the provider. The record must carry an identifier.
    pub async fn load(&self, record: &mut InstanceRecord) -> Result<RemoteSnapshot, RecordFailure> {
        self.load_inner(record)
            .await
            .map_err(|e| self.fail(record, e))
    }

    /// Create a new instance for the record, tag it with the record's name and wait until
    /// it is running.
    pub async fn create(
        &self,
        record: &mut InstanceRecord,
    ) -> Result<RemoteSnapshot, RecordFailure> {
        let mut tracker = self.tracker(record, LifecyclePhase::Unprovisioned);
        tracker.advance(LifecyclePhase::Provisioning);
        let result = self.create_inner(record, &mut tracker).await;
        self.finish(&mut tracker, &result);
        result.map_err(|e| self.fail(record, e))
    }

    /// Poll until the record's state equals `target`. Returns at once, without a remote
    /// call, when the record is already in `target`.
    pub async fn wait_until_state(
        &self,
        record: &mut InstanceRecord,
        target: &str,
    ) -> Result<(), RecordFailure> {
        let mut tracker = self.tracker(record, LifecyclePhase::Polling);
        let result = self.wait_inner(record, target, &mut tracker).await;
        self.finish(&mut tracker, &result);
        result.map_err(|e| self.fail(record, e))
    }

    pub async fn terminate(&self, record: &InstanceRecord) -> Result<(), RecordFailure> {
        let id = self.require_identifier(record)?;
        self.provider
            .terminate_instances(&record.region, &[id.clone()])
            .await
            .map_err(|e| self.fail(record, ProvisionError::provider("terminate_instances", e)))?;
        self.observer.notify(&LifecycleEvent::Terminated {
            name: record.name.clone(),
            id,
        });
        Ok(())
    }

    pub async fn reboot(&self, record: &InstanceRecord) -> Result<(), RecordFailure> {
        let id = self.require_identifier(record)?;
        self.provider
            .reboot_instances(&record.region, &[id.clone()])
            .await
            .map_err(|e| self.fail(record, ProvisionError::provider("reboot_instances", e)))?;
        self.observer.notify(&LifecycleEvent::Rebooted {
            name: record.name.clone(),
            id,
        });
        Ok(())
    }

    fn require_identifier(&self, record: &InstanceRecord) -> Result<String, RecordFailure> {
        record
            .identifier()
            .map(str::to_string)
            .ok_or_else(|| self.fail(record, ProvisionError::MissingIdentifier))
    }

    fn tracker(&self, record: &InstanceRecord, phase: LifecyclePhase) -> PhaseTracker<'_> {
        PhaseTracker::new(record.name.clone(), phase, self.observer.as_ref())
    }

    fn finish<T>(&self, tracker: &mut PhaseTracker<'_>, result: &Result<T, ProvisionError>) {
        match result {
            Ok(_) => {}
            Err(ProvisionError::Cancelled { .. }) => {
                tracker.advance(LifecyclePhase::Cancelled);
            }
            Err(_) => {
                tracker.advance(LifecyclePhase::Failed);
            }
        }
    }

    fn fail(&self, record: &InstanceRecord, error: ProvisionError) -> RecordFailure {
        let failure = record.fail(error);
        self.observer.notify(&LifecycleEvent::Failed {
            name: failure.name.clone(),
            error: failure.error.to_string(),
        });
        failure
    }

    async fn load_inner(
        &self,
        record: &mut InstanceRecord,
    ) -> Result<RemoteSnapshot, ProvisionError> {
        let id = record
            .identifier()
            .map(str::to_string)
            .ok_or(ProvisionError::MissingIdentifier)?;

        let mut found = self
            .provider
            .describe_instances(&record.region, &[id.clone()])
            .await
            .map_err(|e| ProvisionError::provider("describe_instances", e))?;

        let snapshot = match found.len() {
            0 => return Err(ProvisionError::NotFound { id }),
            1 => found.remove(0),
            n => {
                return Err(ProvisionError::ProviderInvariant(format!(
                    "{} instances returned for id <{}>",
                    n, id
                )))
            }
        };

        record.apply_snapshot(&snapshot);
        self.observer.notify(&LifecycleEvent::Loaded {
            name: record.name.clone(),
            id,
            state: snapshot.state.name.clone(),
        });
        Ok(snapshot)
    }

    async fn create_inner(
        &self,
        record: &mut InstanceRecord,
        tracker: &mut PhaseTracker<'_>,
    ) -> Result<RemoteSnapshot, ProvisionError> {
        let mut request = RunInstancesRequest::for_record(record);
        if let Some(path) = record.cloud_config.clone() {
            request.user_data = Some(cloud_config::render_file(&path, record).await?);
        }

        self.observer.notify(&LifecycleEvent::Creating {
            name: record.name.clone(),
            region: record.region.clone(),
        });
        let created = self
            .provider
            .run_instances(&record.region, &request)
            .await
            .map_err(|e| {
                if let Some(incomplete) = e.downcast_ref::<IncompleteCreate>() {
                    record.id = Some(incomplete.instance_id.clone());
                }
                ProvisionError::provider("run_instances", e)
            })?;
        let snapshot = created
            .into_iter()
            .next()
            .ok_or(ProvisionError::CreateFailed)?;

        // Merge before tagging so a tagging failure still reports the new identifier.
        let name = record.name.clone();
        record.apply_snapshot(&snapshot);
        let id = snapshot.instance_id.clone();
        self.observer.notify(&LifecycleEvent::Created {
            name: name.clone(),
            id: id.clone(),
        });

        self.provider
            .create_tags(&record.region, &[id.clone()], &[Tag::name(name.as_str())])
            .await
            .map_err(|source| ProvisionError::Tagging {
                id: id.clone(),
                source,
            })?;
        record.name = name.clone();
        self.observer.notify(&LifecycleEvent::Tagged { name, id });

        tracker.advance(LifecyclePhase::Polling);
        self.wait_inner(record, states::RUNNING, tracker).await?;

        record
            .snapshot
            .clone()
            .ok_or_else(|| ProvisionError::ProviderInvariant("no snapshot after create".into()))
    }

    async fn wait_inner(
        &self,
        record: &mut InstanceRecord,
        target: &str,
        tracker: &mut PhaseTracker<'_>,
    ) -> Result<(), ProvisionError> {
        let started = self.clock.now();
        let mut attempt = 0u32;

        loop {
            if record.state() == target {
                tracker.advance(LifecyclePhase::Confirmed);
                return Ok(());
            }

            let mut delay = self.wait.interval;
            if let Some(max_wait) = self.wait.max_wait {
                let waited = self.clock.now().saturating_duration_since(started);
                if waited >= max_wait {
                    return Err(ProvisionError::Timeout {
                        target: target.to_string(),
                        last: record.state().to_string(),
                        waited,
                    });
                }
                // The last poll lands on the deadline, not past it.
                delay = delay.min(max_wait - waited);
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(ProvisionError::Cancelled { target: target.to_string() });
                }
                _ = self.clock.sleep(delay) => {}
            }

            attempt += 1;
            self.load_inner(record).await?;
            self.observer.notify(&LifecycleEvent::PollTick {
                name: record.name.clone(),
                id: record.identifier().unwrap_or_default().to_string(),
                state: record.state().to_string(),
                target: target.to_string(),
                attempt,
            });
        }
    }
}
