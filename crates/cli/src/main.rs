use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use glint_core::{EngineSettings, GatewaySettings, GlintConfig, KubeSettings};

mod k8sapi;
mod output;
mod server;

use output::{DiscoverFormat, ListFormat};

#[derive(Parser, Debug)]
#[command(name = "glintctl", version, about = "Glint: in-memory cluster mirror with a read-only query gateway")]
struct Cli {
    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[arg(long = "log-level", env = "GLINT_LOG", global = true, default_value = "info")]
    log_level: String,

    #[command(flatten)]
    kube: KubeArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct KubeArgs {
    /// Path to a kubeconfig file (default: KUBECONFIG, ~/.kube/config, in-cluster)
    #[arg(long, env = "GLINT_KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long, global = true)]
    context: Option<String>,

    /// Use the in-cluster service account
    #[arg(long = "in-cluster", env = "GLINT_IN_CLUSTER", global = true, action = ArgAction::SetTrue)]
    in_cluster: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch resources into memory and serve them over HTTP
    Server(ServerArgs),
    /// Print the resources the cluster serves
    Discover {
        #[arg(short = 'o', long = "output", value_enum, default_value_t = DiscoverFormat::Human)]
        output: DiscoverFormat,
    },
    /// Talk to the API server directly
    K8sapi {
        #[command(subcommand)]
        command: K8sApiCommand,
    },
}

#[derive(Args, Debug, Clone)]
struct ServerArgs {
    /// Port for the query gateway
    #[arg(long, env = "GLINT_PORT", default_value_t = 8080)]
    port: u16,

    /// Watch a single namespace (default: all)
    #[arg(short = 'n', long, env = "GLINT_NAMESPACE")]
    namespace: Option<String>,

    /// Resources to watch, comma separated (`deploy`, `deployments.v1.apps`, ...)
    #[arg(long, env = "GLINT_RESOURCES", value_delimiter = ',', default_value = "deployments")]
    resources: Vec<String>,

    /// Handler resync period in seconds (0 disables)
    #[arg(long = "resync-secs", env = "GLINT_RESYNC_SECS", default_value_t = 30)]
    resync_secs: u64,

    /// How often live events are published to readers, in milliseconds
    #[arg(long = "flush-ms", env = "GLINT_FLUSH_MS", default_value_t = 8)]
    flush_ms: u64,

    /// Discovery refresh period in seconds
    #[arg(long = "discovery-refresh-secs", env = "GLINT_DISCOVERY_REFRESH_SECS", default_value_t = 300)]
    discovery_refresh_secs: u64,

    /// Routing prefix for cache queries
    #[arg(long, env = "GLINT_PREFIX", default_value = "/api")]
    prefix: String,
}

#[derive(Subcommand, Debug)]
enum K8sApiCommand {
    /// List objects of one kind straight from the API server
    List {
        /// Resource token: `deploy`, `deployments.apps`, `deployments.v1.apps`
        token: String,
        #[arg(short = 'o', long = "output", value_enum, default_value_t = ListFormat::Name)]
        output: ListFormat,
        #[arg(short = 'n', long)]
        namespace: Option<String>,
    },
    /// Server-side apply manifests (create or replace)
    Apply {
        /// Manifest paths; `-` reads stdin
        #[arg(short = 'f', long = "filename", required = true)]
        filenames: Vec<PathBuf>,
        /// Validate on the server without persisting
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
        /// Override the namespace of namespaced objects
        #[arg(short = 'n', long)]
        namespace: Option<String>,
    },
    /// Delete by `<token> <name>...` and/or from manifests
    Delete {
        /// Resource token followed by object names
        args: Vec<String>,
        #[arg(short = 'f', long = "filename")]
        filenames: Vec<PathBuf>,
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
        #[arg(short = 'n', long)]
        namespace: Option<String>,
    },
}

impl KubeArgs {
    fn settings(&self) -> KubeSettings {
        KubeSettings {
            kubeconfig: self.kubeconfig.clone(),
            context: self.context.clone(),
            in_cluster: self.in_cluster,
            ..KubeSettings::default()
        }
    }
}

impl ServerArgs {
    fn config(&self, kube: &KubeArgs) -> GlintConfig {
        GlintConfig {
            kube: KubeSettings { discovery_refresh: Duration::from_secs(self.discovery_refresh_secs), ..kube.settings() },
            engine: EngineSettings {
                namespace: self.namespace.clone().filter(|ns| !ns.is_empty()),
                flush_interval: Duration::from_millis(self.flush_ms.max(1)),
                resync: (self.resync_secs > 0).then(|| Duration::from_secs(self.resync_secs)),
            },
            gateway: GatewaySettings { listen: SocketAddr::from(([0, 0, 0, 0], self.port)), prefix: self.prefix.clone() },
            resources: self.resources.iter().map(|r| r.trim().to_string()).filter(|r| !r.is_empty()).collect(),
        }
    }
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::from_str(level).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("GLINT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid GLINT_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    init_metrics();

    match cli.command {
        Commands::Server(args) => server::run(args.config(&cli.kube)).await,
        Commands::Discover { output } => k8sapi::discover(&cli.kube.settings(), output).await,
        Commands::K8sapi { command } => {
            let kube = cli.kube.settings();
            match command {
                K8sApiCommand::List { token, output, namespace } => k8sapi::list(&kube, &token, namespace.as_deref(), output).await,
                K8sApiCommand::Apply { filenames, dry_run, namespace } => k8sapi::apply(&kube, &filenames, dry_run, namespace).await,
                K8sApiCommand::Delete { args, filenames, dry_run, namespace } => {
                    k8sapi::delete(&kube, &args, &filenames, dry_run, namespace).await
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_flags_build_the_config() {
        let cli = Cli::try_parse_from([
            "glintctl",
            "--context",
            "kind-dev",
            "server",
            "--port",
            "9090",
            "--resources",
            "deploy, pods.v1.",
            "--namespace",
            "team-a",
            "--resync-secs",
            "0",
            "--prefix",
            "/cache",
        ])
        .unwrap();
        let Commands::Server(args) = cli.command else { panic!("expected server") };
        let cfg = args.config(&cli.kube);
        assert_eq!(cfg.resources, vec!["deploy", "pods.v1."]);
        assert_eq!(cfg.gateway.listen.port(), 9090);
        assert_eq!(cfg.gateway.prefix, "/cache");
        assert_eq!(cfg.engine.namespace.as_deref(), Some("team-a"));
        assert_eq!(cfg.engine.resync, None);
        assert_eq!(cfg.kube.context.as_deref(), Some("kind-dev"));
        assert_eq!(cfg.kube.discovery_refresh, Duration::from_secs(300));
    }

    #[test]
    fn server_defaults() {
        let cli = Cli::try_parse_from(["glintctl", "server"]).unwrap();
        let Commands::Server(args) = cli.command else { panic!("expected server") };
        let cfg = args.config(&cli.kube);
        assert_eq!(cfg.resources, vec!["deployments"]);
        assert_eq!(cfg.gateway.listen.port(), 8080);
        assert_eq!(cfg.engine.resync, Some(Duration::from_secs(30)));
        assert_eq!(cfg.engine.flush_interval, Duration::from_millis(8));
        assert!(!cfg.kube.in_cluster);
    }

    #[test]
    fn k8sapi_subcommands_parse() {
        let cli = Cli::try_parse_from(["glintctl", "k8sapi", "list", "deploy", "-o", "table", "-n", "default"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::K8sapi { command: K8sApiCommand::List { output: ListFormat::Table, .. } }
        ));

        let cli = Cli::try_parse_from(["glintctl", "k8sapi", "delete", "deploy", "a", "b", "--dry-run"]).unwrap();
        let Commands::K8sapi { command: K8sApiCommand::Delete { args, dry_run, .. } } = cli.command else { panic!("expected delete") };
        assert_eq!(args, vec!["deploy", "a", "b"]);
        assert!(dry_run);

        assert!(Cli::try_parse_from(["glintctl", "k8sapi", "apply"]).is_err());
    }
}
