use std::fmt;
use std::str::FromStr;

use fleet_common::{ClusterDefaults, ClusterEntry, InstanceRecord, RecordFailure};
use tracing::{info, warn};

use crate::config::resolve;
use crate::expander::expand;
use crate::lifecycle::InstanceLifecycle;
use crate::machine::provision_machine;

/// What the orchestrator does after a record fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Stop at the first failure.
    #[default]
    Abort,
    /// Record the failure and move on to the next record.
    Continue,
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(ErrorPolicy::Abort),
            "continue" => Ok(ErrorPolicy::Continue),
            other => Err(format!(
                "unknown error policy '{}' (expected 'abort' or 'continue')",
                other
            )),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Abort => f.write_str("abort"),
            ErrorPolicy::Continue => f.write_str("continue"),
        }
    }
}

/// Outcome of one node.
#[derive(Debug)]
pub struct NodeReport {
    /// Position of the cluster entry in the cluster file.
    pub cluster: usize,
    pub name: String,
    pub outcome: Result<NodeSummary, RecordFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSummary {
    pub id: String,
    pub state: String,
    pub private_ip_address: Option<String>,
}

impl NodeSummary {
    fn from_record(record: &InstanceRecord) -> Self {
        Self {
            id: record.identifier().unwrap_or_default().to_string(),
            state: record.state().to_string(),
            private_ip_address: record.private_ip_address().map(str::to_string),
        }
    }
}

/// Per-node outcomes in provisioning order.
#[derive(Debug, Default)]
pub struct FleetReport {
    pub nodes: Vec<NodeReport>,
    /// True when the run stopped before every node was attempted.
    pub aborted: bool,
}

impl FleetReport {
    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &NodeSummary)> {
        self.nodes
            .iter()
            .filter_map(|node| node.outcome.as_ref().ok().map(|s| (node.name.as_str(), s)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecordFailure> {
        self.nodes
            .iter()
            .filter_map(|node| node.outcome.as_ref().err())
    }

    pub fn is_success(&self) -> bool {
        !self.aborted && self.failures().next().is_none()
    }
}

/// Progress notifications emitted while a fleet is provisioned.
pub enum FleetProgress<'a> {
    Starting { cluster: usize, name: &'a str },
    Finished(&'a NodeReport),
}

pub struct Orchestrator {
    lifecycle: InstanceLifecycle,
    policy: ErrorPolicy,
}

impl Orchestrator {
    pub fn new(lifecycle: InstanceLifecycle, policy: ErrorPolicy) -> Self {
        Self { lifecycle, policy }
    }

    /// Provision clusters in declaration order and nodes in index order, one at a time.
    pub async fn provision_fleet<F>(
        &self,
        defaults: &ClusterDefaults,
        clusters: &[ClusterEntry],
        mut progress: F,
    ) -> FleetReport
    where
        F: FnMut(FleetProgress<'_>),
    {
        let mut report = FleetReport::default();

        for (cluster, entry) in clusters.iter().enumerate() {
            let resolved = resolve(&entry.machine, defaults);
            let records = expand(&resolved, entry.nodes);
            info!(
                machine = %entry.machine.name,
                nodes = entry.nodes,
                "[orchestrator] provisioning cluster {}",
                cluster + 1
            );

            for mut record in records {
                if self.lifecycle.is_cancelled() {
                    warn!("[orchestrator] cancelled, skipping remaining nodes");
                    report.aborted = true;
                    return report;
                }

                progress(FleetProgress::Starting {
                    cluster,
                    name: &record.name,
                });
                let outcome = provision_machine(&self.lifecycle, &mut record)
                    .await
                    .map(|_| NodeSummary::from_record(&record));
                let failed = outcome.is_err();
                report.nodes.push(NodeReport {
                    cluster,
                    name: record.name.clone(),
                    outcome,
                });
                if let Some(node) = report.nodes.last() {
                    progress(FleetProgress::Finished(node));
                }

                if failed && self.policy == ErrorPolicy::Abort {
                    warn!("[orchestrator] aborting after first failure");
                    report.aborted = true;
                    return report;
                }
            }
        }

        report
    }
}
