mod discover_commands;
mod session_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "nexus", about = "Nexus: LAN game launcher core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Only look for `nexus.{toml,yaml,yml,json}` in this directory.
    #[arg(long, global = true, env = "NEXUS_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the LAN once and print every server that answered.
    Discover {
        /// Print the preferred server only.
        #[arg(long)]
        preferred: bool,
    },
    /// Keep scanning and report servers as they appear and disappear.
    Watch,
    /// Check a server's update service.
    Health {
        /// Server base URL, e.g. http://192.168.1.10:3000.
        url: String,
    },
    /// List running process names as the watchdog sees them.
    Processes,
    /// Connect to a server and track game sessions until interrupted.
    Run {
        /// Server base URL. Discovered on the LAN when omitted.
        #[arg(long, env = "NEXUS_SERVER")]
        server: Option<String>,
        /// Game catalog as a JSON array.
        #[arg(long)]
        catalog: PathBuf,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(dir) = cli.config_dir.clone() {
        nexus_config::set_config_dir(dir);
    }
    let config = nexus_config::discover_and_load();

    info!(version = env!("CARGO_PKG_VERSION"), "nexus starting");

    match cli.command {
        Commands::Discover { preferred } => discover_commands::discover(&config, preferred).await,
        Commands::Watch => discover_commands::watch(&config).await,
        Commands::Health { url } => discover_commands::health(&config, &url).await,
        Commands::Processes => session_commands::processes(&config).await,
        Commands::Run { server, catalog } => {
            session_commands::run(&config, server.as_deref(), &catalog).await
        },
    }
}
