use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use iter8_operator::controller::{
    self, ReconcilerConfig, DEFAULT_CRD_MANIFEST, DEFAULT_ROLE_MANIFEST, ITER8_FINALIZER,
};
use iter8_operator::crd::Iter8;
use iter8_operator::{telemetry, Error};
use kube::ResourceExt;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
    /// List the Iter8 instances in a namespace
    Info(InfoArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Manifest holding the experiments CustomResourceDefinition
    #[arg(long, env = "CRD_MANIFEST", default_value = DEFAULT_CRD_MANIFEST)]
    crd_manifest: PathBuf,

    /// Manifest holding the iter8 controller ClusterRole
    #[arg(long, env = "ROLE_MANIFEST", default_value = DEFAULT_ROLE_MANIFEST)]
    role_manifest: PathBuf,

    /// Namespace to watch for Iter8 instances; all namespaces when unset
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "default")]
    namespace: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Iter8 Operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            Ok(())
        }
        Commands::Info(info_args) => run_info(info_args).await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let api: kube::Api<Iter8> = kube::Api::namespaced(client, &args.namespace);
    let instances = api
        .list(&Default::default())
        .await
        .map_err(Error::KubeError)?;

    println!("Iter8 instances in {}: {}", args.namespace, instances.items.len());
    for instance in &instances.items {
        let state = if instance.metadata.deletion_timestamp.is_some() {
            "deleting"
        } else if instance.finalizers().iter().any(|f| f == ITER8_FINALIZER) {
            "installed"
        } else {
            "pending"
        };
        println!("  {} ({})", instance.name_any(), state);
    }
    Ok(())
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    telemetry::init_tracing(args.log_json);

    info!("Starting Iter8 Operator v{}", env!("CARGO_PKG_VERSION"));

    let config = ReconcilerConfig {
        crd_manifest: args.crd_manifest,
        role_manifest: args.role_manifest,
        ..Default::default()
    };
    for manifest in [&config.crd_manifest, &config.role_manifest] {
        if !manifest.exists() {
            return Err(Error::ConfigError(format!(
                "manifest {} does not exist",
                manifest.display()
            )));
        }
    }

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");
    match args.watch_namespace.as_deref() {
        Some(namespace) => info!("Watching Iter8 instances in namespace {}", namespace),
        None => info!("Watching Iter8 instances in all namespaces"),
    }

    let state = Arc::new(controller::ControllerState::new(
        client,
        config,
        args.watch_namespace,
    ));

    controller::run_controller(state).await
}
