use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use speedtest_exporter::exporter::{self, ServeConfig};
use speedtest_exporter::provision::{self, ProvisionConfig};
use speedtest_exporter::runtime::RealRuntime;

/// speedtest-exporter - Prometheus exporter for the Ookla Speedtest CLI
///
/// `provision` installs the vendor binary at container build time;
/// `serve` is the container entry point exposing /metrics.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Download and install the Speedtest CLI for this host
    Provision(ProvisionArgs),

    /// Run the exporter HTTP server
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
struct ProvisionArgs {
    /// Speedtest CLI release to install
    #[arg(
        long = "cli-version",
        env = "SPEEDTEST_VERSION",
        value_name = "VERSION",
        default_value = "1.2.0"
    )]
    cli_version: String,

    /// Artifact repository base URL
    #[arg(
        long,
        env = "SPEEDTEST_BASE_URL",
        value_name = "URL",
        default_value = provision::config::DEFAULT_BASE_URL
    )]
    base_url: String,

    /// Directory on the search path where the executable lands
    #[arg(long, value_name = "PATH", default_value = provision::config::DEFAULT_INSTALL_DIR)]
    install_dir: PathBuf,

    /// Application working directory handed to the service account
    #[arg(long, value_name = "PATH", default_value = provision::config::DEFAULT_APP_DIR)]
    app_dir: PathBuf,

    /// Unprivileged account that owns the installed files (skipped if unset)
    #[arg(long, env = "SPEEDTEST_USER", value_name = "ACCOUNT")]
    owner: Option<String>,
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Bind address
    #[arg(long, env = "SPEEDTEST_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Listen port
    #[arg(long, env = "SPEEDTEST_PORT", default_value_t = 8000)]
    port: u16,

    /// Seconds a speed test result stays fresh between scrapes
    #[arg(
        long,
        env = "SPEEDTEST_CACHE_TIMEOUT",
        value_name = "SECONDS",
        default_value_t = 900
    )]
    cache_timeout: u64,

    /// Seconds before a speed test run is killed
    #[arg(
        long,
        env = "SPEEDTEST_RUN_TIMEOUT",
        value_name = "SECONDS",
        default_value_t = 90
    )]
    run_timeout: u64,

    /// Upstream server id forwarded to the CLI
    #[arg(long, env = "SPEEDTEST_SERVER", value_name = "ID")]
    server_id: Option<u32>,

    /// Path of the speedtest executable
    #[arg(
        long,
        env = "SPEEDTEST_BINARY",
        value_name = "PATH",
        default_value = "/usr/local/bin/speedtest"
    )]
    binary: PathBuf,

    /// Account to drop to when started privileged
    #[arg(
        long,
        env = "SPEEDTEST_USER",
        value_name = "ACCOUNT",
        default_value = exporter::config::DEFAULT_USER
    )]
    user: String,
}

impl From<ProvisionArgs> for ProvisionConfig {
    fn from(args: ProvisionArgs) -> Self {
        let mut config = ProvisionConfig::new(args.cli_version);
        config.base_url = args.base_url;
        config.install_dir = args.install_dir;
        config.app_dir = args.app_dir;
        config.owner = args.owner;
        config
    }
}

impl From<ServeArgs> for ServeConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            cache_timeout: Duration::from_secs(args.cache_timeout),
            run_timeout: Duration::from_secs(args.run_timeout),
            server_id: args.server_id,
            binary: args.binary,
            user: args.user,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let runtime = RealRuntime;

    match cli.command {
        Commands::Provision(args) => provision::provision(&runtime, &args.into()).await?,
        Commands::Serve(args) => exporter::serve(&runtime, args.into()).await?,
    }
    Ok(())
}
