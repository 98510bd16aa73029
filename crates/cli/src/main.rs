use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tern_core::{ActionKind, Cluster, Manifests, NamespaceWhitelist, ResourceMap, SyncDef};
use tern_kubehub::KubeCluster;
use tern_manifests::KubeManifests;
use tern_sync::SyncError;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ternctl", version, about = "Reconcile a cluster against a manifest tree")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Comma-separated namespaces to reconcile (default: all)
    #[arg(long = "namespace-whitelist", env = "TERN_NAMESPACE_WHITELIST", global = true)]
    namespace_whitelist: Option<NamespaceWhitelist>,

    /// Log filter directives, e.g. `info,tern_sync=debug`
    #[arg(long = "log", env = "TERN_LOG", global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Args, Debug, Clone)]
struct Source {
    /// Checked-out repository root
    #[arg(long = "repo", env = "TERN_REPO", default_value = ".")]
    repo: PathBuf,
    /// Manifest directory, relative to the repository root
    #[arg(long = "manifest-dir", env = "TERN_MANIFEST_DIR", default_value = ".")]
    manifest_dir: PathBuf,
    /// Namespace for namespaced documents that don't declare one
    #[arg(long = "default-namespace", default_value = "default")]
    default_namespace: String,
    /// Custom kinds that are cluster-scoped (comma-separated)
    #[arg(long = "cluster-scoped-kinds", env = "TERN_CLUSTER_SCOPED_KINDS", value_delimiter = ',')]
    cluster_scoped_kinds: Vec<String>,
    /// Delete live resources that are no longer in the repository
    #[arg(long = "gc", env = "TERN_SYNC_GC", action = ArgAction::SetTrue)]
    gc: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one reconciliation pass
    Sync {
        #[command(flatten)]
        source: Source,
        /// Give up on the pass after this many seconds
        #[arg(long = "timeout-secs")]
        timeout_secs: Option<u64>,
    },
    /// Show what a pass would do without touching the cluster
    Plan {
        #[command(flatten)]
        source: Source,
    },
    /// List live namespaces in scope
    Namespaces,
    /// Print the live, in-scope state as YAML
    Export,
}

fn init_tracing(directives: &str) {
    let filter = tracing_subscriber::EnvFilter::from_str(directives).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TERN_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid TERN_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_desired(source: &Source) -> Result<(KubeManifests, ResourceMap)> {
    let manifests = KubeManifests::with_default_namespace(&source.default_namespace)
        .with_cluster_scoped_kinds(source.cluster_scoped_kinds.iter().map(|k| k.trim()).filter(|k| !k.is_empty()));
    let desired = manifests.load(&source.repo, &source.manifest_dir)?;
    info!(repo = %source.repo.display(), resources = desired.len(), "loaded desired state");
    Ok((manifests, desired))
}

#[derive(serde::Serialize)]
struct Row<'a> { action: ActionKind, id: &'a str }

fn rows(def: &SyncDef) -> Vec<Row<'_>> {
    def.iter().map(|a| Row { action: a.kind(), id: a.resource().id().as_str() }).collect()
}

fn print_plan(def: &SyncDef, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            if def.is_empty() {
                println!("nothing to do");
            }
            for a in def {
                let mark = match a.kind() { ActionKind::Apply => '+', ActionKind::Delete => '-' };
                println!("{} {}", mark, a.resource().id());
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&rows(def))?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);
    init_metrics();
    let whitelist = cli.namespace_whitelist.clone().unwrap_or_default();

    match cli.command {
        Commands::Sync { source, timeout_secs } => {
            let (manifests, desired) = load_desired(&source)?;
            let cluster = KubeCluster::try_default(whitelist.clone()).await?;
            info!(gc = source.gc, whitelist = ?whitelist, "sync invoked");
            let pass = tern_sync::sync(&manifests, &desired, &cluster, source.gc, &whitelist);
            let res = match timeout_secs {
                Some(secs) => tokio::time::timeout(Duration::from_secs(secs), pass)
                    .await
                    .map_err(|_| anyhow!("sync timed out after {}s", secs))?,
                None => pass.await,
            };
            match res {
                Ok(()) => match cli.output {
                    Output::Human => println!("sync complete"),
                    Output::Json => println!("{}", serde_json::json!({ "ok": true })),
                },
                Err(SyncError::Apply(e)) => {
                    match cli.output {
                        Output::Human => {
                            for f in &e.failures {
                                eprintln!("{} {}: {}", f.action, f.id, f.error);
                            }
                        }
                        Output::Json => println!("{}", serde_json::to_string_pretty(&e)?),
                    }
                    return Err(e.into());
                }
                Err(e) => {
                    error!(error = ?e, "sync failed");
                    return Err(e.into());
                }
            }
        }
        Commands::Plan { source } => {
            let (manifests, desired) = load_desired(&source)?;
            let cluster = KubeCluster::try_default(whitelist.clone()).await?;
            let def = tern_sync::plan_pass(&manifests, &desired, &cluster, source.gc, &whitelist).await?;
            print_plan(&def, cli.output)?;
        }
        Commands::Namespaces => {
            let cluster = KubeCluster::try_default(whitelist).await?;
            let names = cluster.list_namespaces().await?;
            match cli.output {
                Output::Human => names.iter().for_each(|n| println!("{}", n)),
                Output::Json => println!("{}", serde_json::to_string_pretty(&names)?),
            }
        }
        Commands::Export => {
            let cluster = KubeCluster::try_default(whitelist).await?;
            let blob = cluster.export().await?;
            print!("{}", String::from_utf8_lossy(&blob));
        }
    }

    Ok(())
}
