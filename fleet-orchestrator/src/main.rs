use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleet_common::InstanceRecord;
use fleet_orchestrator::config::{load_cluster_file, load_machine_file};
use fleet_orchestrator::machine::provision_machine;
use fleet_orchestrator::provider_manager::ProviderManager;
use fleet_orchestrator::services::{ErrorPolicy, FleetProgress, FleetReport, Orchestrator};
use fleet_orchestrator::settings::Settings;
use fleet_orchestrator::{InstanceLifecycle, TracingObserver};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fleet", version, about = "Provision clusters of cloud instances")]
struct Cli {
    /// Compute provider (mock | scaleway). Overrides FLEET_PROVIDER.
    #[arg(long, global = true)]
    provider: Option<String>,

    /// What to do after a node fails (abort | continue). Overrides FLEET_ON_ERROR.
    #[arg(long, global = true)]
    on_error: Option<ErrorPolicy>,

    /// Give up waiting for an instance after this many seconds. Overrides FLEET_MAX_WAIT_SECS.
    #[arg(long, global = true)]
    max_wait: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision every cluster listed in a cluster file.
    Up { cluster_file: PathBuf },
    /// Provision a single machine, or adopt it when the file carries an `id`.
    Machine { machine_file: PathBuf },
    /// Terminate instances by id.
    Terminate {
        #[arg(long)]
        region: String,
        #[arg(long = "id", required = true)]
        ids: Vec<String>,
    },
    /// Reboot instances by id.
    Reboot {
        #[arg(long)]
        region: String,
        #[arg(long = "id", required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::from_env().context("invalid environment settings")?;
    if let Some(provider) = cli.provider {
        settings.provider = provider.to_ascii_lowercase();
    }
    if let Some(policy) = cli.on_error {
        settings.on_error = policy;
    }
    if let Some(secs) = cli.max_wait {
        settings.max_wait = Some(Duration::from_secs(secs));
    }

    let provider = ProviderManager::get_provider(&settings.provider).with_context(|| {
        format!(
            "provider '{}' is unknown or not configured",
            settings.provider
        )
    })?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current step");
            ctrl_c.cancel();
        }
    });

    let lifecycle = InstanceLifecycle::new(provider)
        .with_observer(Arc::new(TracingObserver))
        .with_cancellation(cancel)
        .with_wait_options(settings.wait_options());

    match cli.command {
        Command::Up { cluster_file } => {
            let fleet = load_cluster_file(&cluster_file)
                .with_context(|| format!("cannot load cluster file {}", cluster_file.display()))?;
            let orchestrator = Orchestrator::new(lifecycle, settings.on_error);
            let report = orchestrator
                .provision_fleet(&fleet.defaults, &fleet.clusters, print_progress(&fleet))
                .await;
            println!("================================================================");
            finish(report)
        }
        Command::Machine { machine_file } => {
            let template = load_machine_file(&machine_file)
                .with_context(|| format!("cannot load machine file {}", machine_file.display()))?;
            let mut record = InstanceRecord::from_template(&template);
            println!("Running machine: {}", record.name);
            provision_machine(&lifecycle, &mut record).await?;
            println!(
                "Machine id <{}>, ip address <{}>",
                record.identifier().unwrap_or_default(),
                record.private_ip_address().unwrap_or_default()
            );
            Ok(())
        }
        Command::Terminate { region, ids } => {
            for record in records_for(&region, ids) {
                lifecycle.terminate(&record).await?;
                println!("Instance <{}> termination requested", record.name);
            }
            Ok(())
        }
        Command::Reboot { region, ids } => {
            for record in records_for(&region, ids) {
                lifecycle.reboot(&record).await?;
                println!("Instance <{}> reboot requested", record.name);
            }
            Ok(())
        }
    }
}

fn records_for(region: &str, ids: Vec<String>) -> Vec<InstanceRecord> {
    ids.into_iter()
        .map(|id| InstanceRecord {
            name: id.clone(),
            id: Some(id),
            region: region.to_string(),
            ..Default::default()
        })
        .collect()
}

fn print_progress(
    fleet: &fleet_orchestrator::config::Fleet,
) -> impl FnMut(FleetProgress<'_>) + '_ {
    let mut current_cluster = None;
    let mut finished_in_cluster = 0u32;
    move |event: FleetProgress<'_>| match event {
        FleetProgress::Starting { cluster, name } => {
            if current_cluster != Some(cluster) {
                println!(
                    "================ Running machines of {}. cluster ================",
                    cluster + 1
                );
                current_cluster = Some(cluster);
                finished_in_cluster = 0;
            }
            println!("Running machine: {}", name);
        }
        FleetProgress::Finished(node) => {
            match &node.outcome {
                Ok(summary) => println!(
                    "Machine id <{}>, ip address <{}>",
                    summary.id,
                    summary.private_ip_address.as_deref().unwrap_or_default()
                ),
                Err(failure) => println!("Machine failed: {}", failure),
            }
            finished_in_cluster += 1;
            let nodes = fleet
                .clusters
                .get(node.cluster)
                .map(|entry| entry.nodes)
                .unwrap_or_default();
            if finished_in_cluster < nodes {
                println!("----------------------------------");
            }
        }
    }
}

fn finish(report: FleetReport) -> Result<()> {
    let failures: Vec<_> = report.failures().collect();
    if report.is_success() {
        tracing::info!(nodes = report.nodes.len(), "fleet provisioned");
        return Ok(());
    }
    for failure in &failures {
        tracing::error!("{}", failure);
    }
    anyhow::bail!(
        "{} of {} node(s) failed{}",
        failures.len(),
        report.nodes.len(),
        if report.aborted { ", run aborted" } else { "" }
    )
}
