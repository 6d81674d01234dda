//! bridge CLI - drive a language/analysis server from the command line.
//!
//! ```text
//! main() -> resolve target (flags > config) -> Connection
//!             |
//!             +-- analyze: initialize -> settings -> didOpen -> wait -> print -> shutdown
//!             +-- stop:    initialize -> shutdown/exit
//! ```
//!
//! Logs go to stderr (filtered by `RUST_LOG`); stdout carries only results.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use bridge_config::BridgeConfig;
use bridge_types::{LaunchSpec, SocketEndpoint, TransportTarget};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "bridge", version)]
#[command(about = "Talk to a language/analysis server over JSON-RPC")]
struct Cli {
    /// Config file (default: $BRIDGE_CONFIG, then ~/.bridge/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(flatten)]
    target: TargetArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the `[server]` section.
#[derive(Args, Debug, Default)]
struct TargetArgs {
    /// Spawn this program and talk over its stdin/stdout
    #[arg(long, global = true, value_name = "PROGRAM", conflicts_with = "connect")]
    launch: Option<String>,

    /// Argument for the launched program (repeatable)
    #[arg(
        long = "launch-arg",
        global = true,
        value_name = "ARG",
        allow_hyphen_values = true,
        requires = "launch"
    )]
    launch_args: Vec<String>,

    /// Connect to a server already listening on HOST:PORT
    #[arg(long, global = true, value_name = "HOST:PORT")]
    connect: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a file and print the diagnostics the server publishes for it
    Analyze(commands::AnalyzeArgs),
    /// Complete the handshake, then ask the server to shut down and exit
    Stop {
        /// Workspace root (default: config, then current directory)
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

/// Command-line flags win over the config file.
fn resolve_target(args: &TargetArgs, configured: Option<TransportTarget>) -> Result<TransportTarget> {
    if let Some(program) = &args.launch {
        let spec = LaunchSpec::new(program.clone(), args.launch_args.clone())
            .context("invalid --launch")?;
        return Ok(TransportTarget::Launch(spec));
    }
    if let Some(address) = &args.connect {
        let endpoint = SocketEndpoint::parse(address).context("invalid --connect")?;
        return Ok(TransportTarget::Socket(endpoint));
    }
    configured.context(
        "no server configured: pass --launch or --connect, or add a [server] section to the config file",
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = BridgeConfig::load(cli.config.as_deref())
        .context("failed to load config")?
        .unwrap_or_default();
    let target = resolve_target(&cli.target, config.server.clone())?;
    let settings = config.session.to_settings();
    tracing::debug!(%target, ?settings, "Resolved server target");

    match cli.command {
        Commands::Analyze(args) => commands::analyze(target, settings, &config.workspace, args).await,
        Commands::Stop { root } => commands::stop(target, settings, &config.workspace, root).await,
    }
}
