// Integration tests for fleet provisioning (resolve, expand, provision in order)
mod common;

use common::{Harness, ManualClock, ScriptedProvider};
use fleet_common::{ClusterDefaults, ClusterEntry, MachineTemplate, ProvisionError, VolumeSpec};
use fleet_orchestrator::config::load_cluster_file;
use fleet_orchestrator::machine::provision_machine;
use fleet_orchestrator::services::FleetProgress;
use fleet_orchestrator::{ErrorPolicy, Orchestrator};
use fleet_providers::mock::MockProvider;
use std::fs;
use tokio_util::sync::CancellationToken;

fn web_cluster(nodes: u32) -> Vec<ClusterEntry> {
    vec![ClusterEntry {
        machine: MachineTemplate {
            name: "web".to_string(),
            instance_type: "t3.micro".to_string(),
            image_id: Some("ami-1".to_string()),
            security_groups: Some(vec![]),
            ..Default::default()
        },
        nodes,
    }]
}

fn defaults() -> ClusterDefaults {
    ClusterDefaults {
        region: Some("us-east-1".to_string()),
        key_name: Some("k1".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn provisions_every_node_in_order() {
    let harness = Harness::new(ScriptedProvider::new());
    let orchestrator = Orchestrator::new(harness.lifecycle(), ErrorPolicy::Abort);
    let mut started = Vec::new();

    let report = orchestrator
        .provision_fleet(&defaults(), &web_cluster(2), |event| {
            if let FleetProgress::Starting { name, .. } = event {
                started.push(name.to_string());
            }
        })
        .await;

    assert!(report.is_success());
    assert_eq!(started, vec!["web-1", "web-2"]);
    let done: Vec<_> = report
        .succeeded()
        .map(|(name, summary)| (name.to_string(), summary.id.clone()))
        .collect();
    assert_eq!(
        done,
        vec![
            ("web-1".to_string(), "i-1".to_string()),
            ("web-2".to_string(), "i-2".to_string())
        ]
    );

    // Defaults were applied before creation.
    for (region, request) in harness.provider.run_requests() {
        assert_eq!(region, "us-east-1");
        assert_eq!(request.key_name, "k1");
    }
    // Instances were running on creation: no polling delay.
    assert_eq!(harness.clock.sleeps(), 0);
    assert_eq!(harness.provider.calls().describe, 0);
}

#[tokio::test]
async fn abort_policy_stops_at_first_failure() {
    let provider = ScriptedProvider::new().push_run(Ok(vec![]));
    let harness = Harness::new(provider);
    let orchestrator = Orchestrator::new(harness.lifecycle(), ErrorPolicy::Abort);

    let report = orchestrator
        .provision_fleet(&defaults(), &web_cluster(3), |_| {})
        .await;

    assert!(report.aborted);
    assert_eq!(report.nodes.len(), 1);
    let failure = report.failures().next().unwrap();
    assert_eq!(failure.name, "web-1");
    assert!(matches!(failure.error, ProvisionError::CreateFailed));
    assert_eq!(harness.provider.calls().run, 1);
}

#[tokio::test]
async fn continue_policy_records_failure_and_moves_on() {
    let provider = ScriptedProvider::new().push_run(Err("quota exceeded"));
    let harness = Harness::new(provider);
    let orchestrator = Orchestrator::new(harness.lifecycle(), ErrorPolicy::Continue);

    let report = orchestrator
        .provision_fleet(&defaults(), &web_cluster(3), |_| {})
        .await;

    assert!(!report.aborted);
    assert!(!report.is_success());
    assert_eq!(report.nodes.len(), 3);
    assert_eq!(report.failures().count(), 1);
    let names: Vec<_> = report.succeeded().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["web-2", "web-3"]);
}

#[tokio::test]
async fn cancelled_run_skips_remaining_nodes() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let harness = Harness::with_clock(ScriptedProvider::new(), ManualClock::new(), cancel);
    let orchestrator = Orchestrator::new(harness.lifecycle(), ErrorPolicy::Continue);

    let report = orchestrator
        .provision_fleet(&defaults(), &web_cluster(2), |_| {})
        .await;

    assert!(report.aborted);
    assert!(report.nodes.is_empty());
    assert_eq!(harness.provider.calls().run, 0);
}

#[tokio::test]
async fn mock_provider_run_creates_and_attaches_volumes() {
    let harness = Harness::new(MockProvider::new().with_boot_polls(1));
    let orchestrator = Orchestrator::new(harness.lifecycle(), ErrorPolicy::Abort);
    let mut clusters = web_cluster(2);
    clusters[0].machine.volumes = vec![VolumeSpec {
        name: "data".to_string(),
        size_gb: 50,
        device: Some("/dev/xvdf".to_string()),
        ..Default::default()
    }];

    let report = orchestrator
        .provision_fleet(&defaults(), &clusters, |_| {})
        .await;

    assert!(report.is_success());
    let first = harness.provider.volume("vol-1").unwrap();
    assert_eq!(first.name, "data-1");
    assert_eq!(first.attached_to.as_deref(), Some("i-1"));
    assert_eq!(first.device.as_deref(), Some("/dev/xvdf"));
    let second = harness.provider.volume("vol-2").unwrap();
    assert_eq!(second.name, "data-2");
    assert_eq!(second.attached_to.as_deref(), Some("i-2"));
    // One poll per node while the mock boots.
    assert_eq!(harness.clock.sleeps(), 2);
}

#[tokio::test]
async fn adopted_instance_gets_no_new_volumes() {
    let harness = Harness::new(MockProvider::new().with_boot_polls(0));
    let lifecycle = harness.lifecycle();
    let mut web = common::record("web-1");
    web.volumes = vec![VolumeSpec {
        name: "data".to_string(),
        size_gb: 10,
        ..Default::default()
    }];

    provision_machine(&lifecycle, &mut web).await.unwrap();
    assert_eq!(web.identifier(), Some("i-1"));
    assert_eq!(harness.provider.volume_count(), 1);

    // Re-running from the same machine file adopts i-1 twice without touching its volumes.
    for _ in 0..2 {
        let mut again = common::record("web-1");
        again.id = Some("i-1".to_string());
        again.volumes = web.volumes.clone();
        again.volumes[0].id = None;
        provision_machine(&lifecycle, &mut again).await.unwrap();
    }

    assert_eq!(harness.provider.volume_count(), 1);
    assert_eq!(
        harness.provider.volume("vol-1").unwrap().attached_to.as_deref(),
        Some("i-1")
    );
}

#[tokio::test]
async fn cluster_file_drives_a_full_run() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("cloud.yml"), "#cloud-config\nhostname: {{ name }}\n").unwrap();
    fs::write(
        dir.path().join("web.toml"),
        "name = \"web\"\ninstance_type = \"t3.micro\"\nimage_id = \"ami-1\"\ncloud_config = \"cloud.yml\"\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("db.json"),
        r#"{ "name": "db", "instance_type": "m5.large", "image_id": "ami-2", "region": "eu-west-1" }"#,
    )
    .unwrap();
    let cluster_file = dir.path().join("cluster.toml");
    fs::write(
        &cluster_file,
        r#"
[defaults]
region = "us-east-1"
key_name = "k1"

[[clusters]]
machine = "web.toml"
nodes = 2

[[clusters]]
machine = "db.json"
nodes = 1
"#,
    )
    .unwrap();

    let fleet = load_cluster_file(&cluster_file).unwrap();
    let harness = Harness::new(ScriptedProvider::new());
    let orchestrator = Orchestrator::new(harness.lifecycle(), ErrorPolicy::Abort);
    let report = orchestrator
        .provision_fleet(&fleet.defaults, &fleet.clusters, |_| {})
        .await;

    assert!(report.is_success());
    let clusters: Vec<_> = report.nodes.iter().map(|n| (n.cluster, n.name.as_str())).collect();
    assert_eq!(clusters, vec![(0, "web-1"), (0, "web-2"), (1, "db-1")]);

    let requests = harness.provider.run_requests();
    assert_eq!(requests[2].0, "eu-west-1");
    assert_eq!(
        String::from_utf8(requests[1].1.user_data.clone().unwrap()).unwrap(),
        "#cloud-config\nhostname: web-2\n"
    );
    assert!(requests[2].1.user_data.is_none());
}
