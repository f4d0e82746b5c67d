//! replicadm -- MongoDB replica-set configuration reconciler and bootstrap
//! tool.
//!
//! One invocation runs one pass, start to finish, with no internal
//! parallelism.  Reruns are safe: both the reconciler and the
//! bootstrapper check live state before mutating anything.  Concurrent
//! invocations against the same node are not guarded against.

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use replicadm::admin::client::{AdminClient, ConnectTarget, ReplSetProbe};
use replicadm::admin::mongosh::MongoshClient;
use replicadm::bootstrap::{BootstrapOutcome, ClusterBootstrapper};
use replicadm::config::{load_config, Config};
use replicadm::errors::ReplicadmError;
use replicadm::reconcile::{ConfigReconciler, ReconcileResult};
use replicadm::service::manager::ServiceManager;
use replicadm::service::systemd::SystemdManager;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "replicadm",
    version,
    about = "MongoDB replica-set configuration reconciler and bootstrap tool"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "replicadm.yaml")]
    config: String,

    /// Override the managed mongod config path.
    #[arg(long)]
    mongod_conf: Option<std::path::PathBuf>,

    /// Override the replica-set name (takes precedence over the config file).
    #[arg(long)]
    replica_set: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile the mongod configuration file and restart the service.
    Reconcile,
    /// Bring the node to its correct replica-set membership state.
    Bootstrap,
    /// Reconcile, then bootstrap.
    Apply,
    /// Report service and replica-set state without mutating anything.
    Status,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("Loading configuration from {}", cli.config);
    let mut config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("cannot load {}: {e:#}", cli.config);
            std::process::exit(1);
        }
    };
    if let Some(path) = &cli.mongod_conf {
        config.service.config_path = path.clone();
    }
    let replica_set_name = config.effective_replica_set_name(cli.replica_set.as_deref());

    if let Err(e) = run(&cli.command, &config, &replica_set_name).await {
        error!(kind = e.kind(), "{e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(
    command: &Command,
    config: &Config,
    replica_set_name: &str,
) -> Result<(), ReplicadmError> {
    let systemd = SystemdManager::new();
    let mongosh = MongoshClient::from_config(config);

    match command {
        Command::Reconcile => {
            let reconciler = ConfigReconciler::new(&systemd, &config.service);
            let result = reconciler.reconcile(&config.mongod, replica_set_name).await?;
            report_reconcile(&result);
            Ok(())
        }
        Command::Bootstrap => {
            let bootstrapper =
                ClusterBootstrapper::new(&mongosh, config, replica_set_name.to_string());
            let outcome = bootstrapper.run().await?;
            report_bootstrap(&outcome);
            Ok(())
        }
        Command::Apply => {
            // The bootstrapper can only query a configured, running
            // service, so reconciliation always goes first.
            let reconciler = ConfigReconciler::new(&systemd, &config.service);
            let result = reconciler.reconcile(&config.mongod, replica_set_name).await?;
            report_reconcile(&result);
            if result.rolled_back {
                warn!("config was rolled back; skipping bootstrap until it applies cleanly");
                return Ok(());
            }
            let bootstrapper =
                ClusterBootstrapper::new(&mongosh, config, replica_set_name.to_string());
            let outcome = bootstrapper.run().await?;
            report_bootstrap(&outcome);
            Ok(())
        }
        Command::Status => status(&systemd, &mongosh, config).await,
    }
}

fn report_reconcile(result: &ReconcileResult) {
    if let Some(warning) = &result.warning {
        warn!(kind = warning.kind(), "{warning}");
    }
    match (result.changed, result.rolled_back) {
        (true, _) => info!("config updated"),
        (false, true) => warn!("config change rolled back; node is on its previous config"),
        (false, false) => info!("config unchanged"),
    }
}

fn report_bootstrap(outcome: &BootstrapOutcome) {
    match outcome {
        BootstrapOutcome::Initiated => info!("replica set initiated"),
        BootstrapOutcome::Reconfigured { replaced } => {
            info!(replaced, "membership rewritten to the canonical domain")
        }
        BootstrapOutcome::AlreadyInDesiredState => info!("membership already correct"),
        BootstrapOutcome::AwaitingEnrollment => {
            info!("waiting to be added from the primary")
        }
    }
}

/// Read-only report of service and replica-set state.
async fn status(
    systemd: &SystemdManager,
    mongosh: &MongoshClient,
    config: &Config,
) -> Result<(), ReplicadmError> {
    let active = systemd
        .is_active(&config.service.name)
        .await
        .unwrap_or(false);
    println!(
        "service {}: {}",
        config.service.name,
        if active { "active" } else { "inactive" }
    );
    if !active {
        return Ok(());
    }

    let target = ConnectTarget::new("127.0.0.1", config.mongod.listen_port);
    match mongosh.repl_set_status(&target).await {
        Ok(ReplSetProbe::Uninitialized) => println!("replica set: not initialized"),
        Ok(ReplSetProbe::Member {
            set_name,
            is_primary,
            members,
        }) => {
            println!(
                "replica set {set_name}: {}",
                if is_primary { "PRIMARY" } else { "SECONDARY" }
            );
            for member in members {
                println!(
                    "  [{}] {}{}",
                    member.id,
                    member.host,
                    if member.is_self { " (this node)" } else { "" }
                );
            }
        }
        Err(e) => println!("replica set: unknown ({e})"),
    }
    Ok(())
}
