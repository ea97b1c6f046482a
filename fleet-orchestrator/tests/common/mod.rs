// Common test fakes: a scripted provider, a virtual clock and a recording observer
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use fleet_common::{
    InstanceRecord, InstanceState, RemoteSnapshot, RunInstancesRequest, SecurityGroupRef, Tag,
};
use fleet_orchestrator::{
    Clock, InstanceLifecycle, LifecycleEvent, LifecycleObserver, LifecyclePhase, WaitOptions,
};
use fleet_providers::ComputeProvider;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub fn snapshot(id: &str, state: &str) -> RemoteSnapshot {
    RemoteSnapshot {
        instance_id: id.to_string(),
        instance_type: "t3.micro".to_string(),
        image_id: "ami-1".to_string(),
        subnet_id: "subnet-1".to_string(),
        key_name: "k1".to_string(),
        availability_zone: "us-east-1a".to_string(),
        security_groups: vec![SecurityGroupRef::new("sg-1")],
        state: InstanceState::named(state),
        private_ip_address: Some(format!("10.0.0.{}", id.trim_start_matches("i-"))),
        ..Default::default()
    }
}

pub fn record(name: &str) -> InstanceRecord {
    InstanceRecord {
        name: name.to_string(),
        instance_type: "t3.micro".to_string(),
        image_id: "ami-1".to_string(),
        region: "us-east-1".to_string(),
        ..Default::default()
    }
}

/// Provider whose answers are queued by the test. When a queue is empty it falls back to
/// creating `i-N` instances in `created_state` and describing whatever it created.
#[derive(Default)]
pub struct ScriptedProvider {
    state: Mutex<Script>,
}

#[derive(Default)]
struct Script {
    created_state: String,
    next_id: u32,
    instances: HashMap<String, RemoteSnapshot>,
    run_responses: VecDeque<Result<Vec<RemoteSnapshot>>>,
    describe_responses: VecDeque<Result<Vec<RemoteSnapshot>, String>>,
    tag_error: Option<String>,
    calls: Calls,
    run_requests: Vec<(String, RunInstancesRequest)>,
    tags: Vec<(String, Tag)>,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub describe: u32,
    pub run: u32,
    pub tag: u32,
    pub terminate: u32,
    pub reboot: u32,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default().created_state("running")
    }

    pub fn created_state(self, state: &str) -> Self {
        self.script().created_state = state.to_string();
        self
    }

    pub fn push_run(self, response: Result<Vec<RemoteSnapshot>, &str>) -> Self {
        self.script()
            .run_responses
            .push_back(response.map_err(|e| anyhow::anyhow!(e.to_string())));
        self
    }

    pub fn push_run_error(self, error: anyhow::Error) -> Self {
        self.script().run_responses.push_back(Err(error));
        self
    }

    pub fn push_describe(self, response: Result<Vec<RemoteSnapshot>, &str>) -> Self {
        self.script()
            .describe_responses
            .push_back(response.map_err(str::to_string));
        self
    }

    pub fn fail_tags(self, message: &str) -> Self {
        self.script().tag_error = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Calls {
        self.script().calls
    }

    pub fn run_requests(&self) -> Vec<(String, RunInstancesRequest)> {
        self.script().run_requests.clone()
    }

    pub fn tags(&self) -> Vec<(String, Tag)> {
        self.script().tags.clone()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl ComputeProvider for ScriptedProvider {
    async fn describe_instances(
        &self,
        _region: &str,
        instance_ids: &[String],
    ) -> Result<Vec<RemoteSnapshot>> {
        let mut script = self.script();
        script.calls.describe += 1;
        if let Some(response) = script.describe_responses.pop_front() {
            return response.map_err(|e| anyhow::anyhow!(e));
        }
        Ok(instance_ids
            .iter()
            .filter_map(|id| script.instances.get(id).cloned())
            .collect())
    }

    async fn run_instances(
        &self,
        region: &str,
        request: &RunInstancesRequest,
    ) -> Result<Vec<RemoteSnapshot>> {
        let mut script = self.script();
        script.calls.run += 1;
        script
            .run_requests
            .push((region.to_string(), request.clone()));
        if let Some(response) = script.run_responses.pop_front() {
            return response;
        }
        script.next_id += 1;
        let id = format!("i-{}", script.next_id);
        let created = snapshot(&id, &script.created_state.clone());
        script.instances.insert(id, created.clone());
        Ok(vec![created])
    }

    async fn create_tags(&self, _region: &str, instance_ids: &[String], tags: &[Tag]) -> Result<()> {
        let mut script = self.script();
        script.calls.tag += 1;
        if let Some(message) = &script.tag_error {
            return Err(anyhow::anyhow!(message.clone()));
        }
        for id in instance_ids {
            for tag in tags {
                script.tags.push((id.clone(), tag.clone()));
            }
        }
        Ok(())
    }

    async fn terminate_instances(&self, _region: &str, _instance_ids: &[String]) -> Result<()> {
        self.script().calls.terminate += 1;
        Ok(())
    }

    async fn reboot_instances(&self, _region: &str, _instance_ids: &[String]) -> Result<()> {
        self.script().calls.reboot += 1;
        Ok(())
    }
}

/// Virtual clock: `sleep` returns at once and advances `now` by the requested duration.
pub struct ManualClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<u32>,
    cancel_on_sleep: Mutex<Option<(u32, CancellationToken)>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(0),
            cancel_on_sleep: Mutex::new(None),
        }
    }

    /// Cancel `token` during the `nth` sleep (1-based).
    pub fn cancel_on_sleep(self, nth: u32, token: CancellationToken) -> Self {
        *self.cancel_on_sleep.lock().unwrap() = Some((nth, token));
        self
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }

    pub fn sleeps(&self) -> u32 {
        *self.sleeps.lock().unwrap()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
        let count = {
            let mut sleeps = self.sleeps.lock().unwrap();
            *sleeps += 1;
            *sleeps
        };
        if let Some((nth, token)) = self.cancel_on_sleep.lock().unwrap().as_ref() {
            if *nth == count {
                token.cancel();
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Phases entered by `name`, in order.
    pub fn phases(&self, name: &str) -> Vec<LifecyclePhase> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LifecycleEvent::Phase { name: n, to, .. } if n == name => Some(to),
                _ => None,
            })
            .collect()
    }
}

impl LifecycleObserver for RecordingObserver {
    fn notify(&self, event: &LifecycleEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub struct Harness<P> {
    pub provider: Arc<P>,
    pub clock: Arc<ManualClock>,
    pub observer: Arc<RecordingObserver>,
    pub cancel: CancellationToken,
}

impl<P: ComputeProvider + 'static> Harness<P> {
    pub fn new(provider: P) -> Self {
        Self::with_clock(provider, ManualClock::new(), CancellationToken::new())
    }

    pub fn with_clock(provider: P, clock: ManualClock, cancel: CancellationToken) -> Self {
        Self {
            provider: Arc::new(provider),
            clock: Arc::new(clock),
            observer: Arc::new(RecordingObserver::default()),
            cancel,
        }
    }

    pub fn lifecycle(&self) -> InstanceLifecycle {
        self.lifecycle_with(WaitOptions::default())
    }

    pub fn lifecycle_with(&self, wait: WaitOptions) -> InstanceLifecycle {
        InstanceLifecycle::new(self.provider.clone())
            .with_clock(self.clock.clone())
            .with_observer(self.observer.clone())
            .with_cancellation(self.cancel.clone())
            .with_wait_options(wait)
    }
}
