use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kvault_core::{selector::parse_selector, Backup, Restore, RestoreResult, RestoreSpec};
use kvault_kubehub::{DiscoveryHelper, KubeDynamicFactory, KubeNamespaceClient};
use kvault_restore::{KubernetesRestorer, RestoreConfig, Restorer};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "kvaultctl", version, about = "kvault CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace the restore and backup records live in
    #[arg(long = "ns", global = true, default_value = "kvault")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover served resources (all versions, incl. CRDs)
    Discover,
    /// Restore a local backup archive (.tar.gz) into the current cluster
    Restore {
        /// Path to the gzip tar archive
        archive: PathBuf,
        /// Restore name, stamped on every restored object
        #[arg(long = "name", default_value = "kvaultctl-restore")]
        name: String,
        /// Backup name (defaults to the archive file stem)
        #[arg(long = "backup")]
        backup: Option<String>,
        #[arg(long = "include-namespaces", value_delimiter = ',')]
        include_namespaces: Vec<String>,
        #[arg(long = "exclude-namespaces", value_delimiter = ',')]
        exclude_namespaces: Vec<String>,
        #[arg(long = "include-resources", value_delimiter = ',')]
        include_resources: Vec<String>,
        #[arg(long = "exclude-resources", value_delimiter = ',')]
        exclude_resources: Vec<String>,
        /// Namespace remapping, e.g. "prod=staging"
        #[arg(long = "namespace-mapping", value_delimiter = ',', value_parser = parse_mapping)]
        namespace_mapping: Vec<(String, String)>,
        /// Label selector, e.g. "app=web,tier!=cache"
        #[arg(long = "selector")]
        selector: Option<String>,
        /// Resource types restored first, in order
        #[arg(long = "priorities", env = "KVAULT_RESOURCE_PRIORITIES", value_delimiter = ',')]
        priorities: Vec<String>,
        /// Write the gzip-compressed restore log here
        #[arg(long = "log-file")]
        log_file: Option<PathBuf>,
        /// Readiness wait bound per resource batch
        #[arg(long = "wait-secs")]
        wait_secs: Option<u64>,
    },
}

fn init_tracing() {
    let env = std::env::var("KVAULT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KVAULT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KVAULT_METRICS_ADDR; expected host:port");
        }
    }
}

fn parse_mapping(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((from, to)) if !from.trim().is_empty() && !to.trim().is_empty() => {
            Ok((from.trim().to_string(), to.trim().to_string()))
        }
        _ => Err(format!("expected old=new, got {:?}", s)),
    }
}

fn print_result(title: &str, r: &RestoreResult) {
    if r.is_empty() {
        return;
    }
    println!("{}:", title);
    for m in &r.global {
        println!("  kvault:    {}", m);
    }
    for m in &r.cluster {
        println!("  cluster:   {}", m);
    }
    for (ns, msgs) in &r.namespaces {
        for m in msgs {
            println!("  {}: {}", ns, m);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Discover => {
            info!("discover invoked");
            let client = kube::Client::try_default().await.context("building kube client")?;
            match kvault_kubehub::discover(client).await {
                Ok(catalog) => match cli.output {
                    Output::Human => {
                        for list in catalog.resources() {
                            for r in &list.resources {
                                let scope = if r.namespaced { "namespaced" } else { "cluster" };
                                println!("{} • {} • {} • {}", list.group_version, r.kind, r.name, scope);
                            }
                        }
                    }
                    Output::Json => println!("{}", serde_json::to_string_pretty(catalog.resources())?),
                },
                Err(e) => {
                    error!(error = ?e, "discover failed");
                    eprintln!("discover error: {}", e);
                }
            }
        }
        Commands::Restore {
            archive,
            name,
            backup,
            include_namespaces,
            exclude_namespaces,
            include_resources,
            exclude_resources,
            namespace_mapping,
            selector,
            priorities,
            log_file,
            wait_secs,
        } => {
            let t0 = Instant::now();
            let label_selector = match selector.as_deref() {
                Some(s) => Some(parse_selector(s).with_context(|| format!("parsing selector {:?}", s))?),
                None => None,
            };
            let backup_name = backup.unwrap_or_else(|| {
                let file = archive.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
                file.trim_end_matches(".tar.gz").trim_end_matches(".tgz").to_string()
            });
            let restore = Restore {
                name,
                namespace: cli.namespace.clone(),
                spec: RestoreSpec {
                    backup_name: backup_name.clone(),
                    included_namespaces: include_namespaces,
                    excluded_namespaces: exclude_namespaces,
                    included_resources: include_resources,
                    excluded_resources: exclude_resources,
                    namespace_mapping: namespace_mapping.into_iter().collect(),
                    label_selector,
                },
            };
            let backup = Backup { name: backup_name, namespace: cli.namespace.clone(), storage_location: None };

            let mut config = RestoreConfig::from_env();
            if !priorities.is_empty() {
                config.resource_priorities = priorities;
            }
            if let Some(secs) = wait_secs {
                config.wait_timeout = Duration::from_secs(secs);
            }
            info!(restore = %restore.name, backup = %backup.name, archive = %archive.display(), "restore invoked");

            let client = kube::Client::try_default().await.context("building kube client")?;
            let catalog = kvault_kubehub::discover(client.clone()).await?;
            let restorer = KubernetesRestorer::new(
                Arc::new(catalog),
                Arc::new(KubeDynamicFactory::new(client.clone())),
                Arc::new(KubeNamespaceClient::new(client)),
                config,
                vec![],
            )?;

            let mut reader = std::fs::File::open(&archive).with_context(|| format!("opening {}", archive.display()))?;
            let mut sink: Box<dyn Write + Send> = match &log_file {
                Some(path) => Box::new(std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?),
                None => Box::new(std::io::sink()),
            };
            let (warnings, errors) = restorer.restore(&restore, &backup, &mut reader, &mut *sink).await;
            sink.flush()?;

            match cli.output {
                Output::Human => {
                    print_result("Warnings", &warnings);
                    print_result("Errors", &errors);
                    println!(
                        "restore {} finished: {} warnings, {} errors ({} ms)",
                        restore.name,
                        warnings.len(),
                        errors.len(),
                        t0.elapsed().as_millis()
                    );
                }
                Output::Json => {
                    let out = serde_json::json!({"restore": restore.name, "warnings": warnings, "errors": errors});
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
            if !errors.is_empty() {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
