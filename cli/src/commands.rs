//! `analyze` and `stop`.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bridge_config::WorkspaceConfig;
use bridge_lsp::{Connection, ServerEvent, WorkspaceInfo};
use bridge_types::{SessionSettings, TransportTarget};
use bridge_utils::{path_to_file_uri, read_document};
use clap::Args;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Servers announce the end of a pass with a `window/showMessage` like this.
const FINISHED_MARKER: &str = "finished analyzing";

const DEFAULT_WAIT_SECS: u64 = 30;

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// File to analyze
    pub file: PathBuf,

    /// Workspace root (default: config, then current directory)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Language id sent with didOpen (default: from the file extension)
    #[arg(long)]
    pub language: Option<String>,

    /// Give up waiting for diagnostics after this many seconds
    #[arg(long, default_value_t = DEFAULT_WAIT_SECS)]
    pub wait_secs: u64,

    /// Also print the analyzer's source name
    #[arg(long)]
    pub source_name: bool,
}

/// Why waiting for analysis stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    Diagnostics,
    Finished,
    Deadline,
    Closed,
    Interrupted,
}

fn language_for(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "plaintext".to_string())
}

/// `--root` beats the configured root, which beats the current directory.
fn resolve_workspace(config: &WorkspaceConfig, root: Option<PathBuf>) -> Result<WorkspaceInfo> {
    let mut config = config.clone();
    if let Some(root) = root {
        config.root = Some(root);
    }
    let cwd = env::current_dir().context("failed to read current directory")?;
    config
        .workspace_info(&cwd)
        .context("invalid workspace root")
}

pub async fn analyze(
    target: TransportTarget,
    settings: SessionSettings,
    config: &WorkspaceConfig,
    args: AnalyzeArgs,
) -> Result<()> {
    let text = read_document(&args.file)?;
    let uri = path_to_file_uri(&args.file)?.to_string();
    let language = args
        .language
        .clone()
        .unwrap_or_else(|| language_for(&args.file));
    let workspace = resolve_workspace(config, args.root.clone())?;

    let mut connection = Connection::new(target, settings);
    let mut events = connection.subscribe();
    connection
        .initialize(&workspace)
        .await
        .context("handshake with server failed")?;

    let outcome =
        run_analysis(&connection, &mut events, config, &args, &uri, &text, &language).await;
    connection.shutdown().await;
    outcome
}

async fn run_analysis(
    connection: &Connection,
    events: &mut broadcast::Receiver<ServerEvent>,
    config: &WorkspaceConfig,
    args: &AnalyzeArgs,
    uri: &str,
    text: &str,
    language: &str,
) -> Result<()> {
    if let Some(settings) = &config.settings {
        connection
            .did_change_configuration(settings.clone())
            .await
            .context("failed to send settings")?;
    }

    let uri = connection
        .open_document(uri, text, language)
        .await
        .context("failed to open document")?;

    let outcome = wait_for_analysis(events, &uri, Duration::from_secs(args.wait_secs)).await;
    tracing::debug!(?outcome, "Stopped waiting for analysis");
    if outcome == WaitOutcome::Deadline {
        tracing::warn!(wait_secs = args.wait_secs, "No diagnostics before the deadline");
    }

    let diagnostics = connection.diagnostics(&uri);
    if diagnostics.is_empty() {
        println!("No diagnostics for {uri}");
    }
    for diagnostic in &diagnostics {
        println!("{}", diagnostic.display_with_uri(&uri));
    }
    let snapshot = connection.diagnostics_snapshot();
    if !snapshot.is_empty() {
        println!("{}", snapshot.status_string());
    }

    if args.source_name {
        match connection.source_name().await {
            Ok(Some(name)) => println!("Source: {name}"),
            Ok(None) => println!("Source: unknown"),
            Err(e) => tracing::warn!("Failed to query source name: {e}"),
        }
    }

    if outcome == WaitOutcome::Closed {
        anyhow::bail!("server closed the connection during analysis");
    }
    Ok(())
}

async fn wait_for_analysis(
    events: &mut broadcast::Receiver<ServerEvent>,
    uri: &str,
    wait: Duration,
) -> WaitOutcome {
    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => return WaitOutcome::Deadline,
            _ = tokio::signal::ctrl_c() => return WaitOutcome::Interrupted,
            event = events.recv() => match event {
                // An empty publish on open is not a finished analysis.
                Ok(ServerEvent::Diagnostics { uri: published, count })
                    if published == uri && count > 0 =>
                {
                    return WaitOutcome::Diagnostics;
                }
                Ok(ServerEvent::ShowMessage { message, .. })
                    if message.to_ascii_lowercase().contains(FINISHED_MARKER) =>
                {
                    return WaitOutcome::Finished;
                }
                Ok(ServerEvent::StreamClosed) | Err(RecvError::Closed) => {
                    return WaitOutcome::Closed;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Missed server events");
                }
            },
        }
    }
}

pub async fn stop(
    target: TransportTarget,
    settings: SessionSettings,
    config: &WorkspaceConfig,
    root: Option<PathBuf>,
) -> Result<()> {
    let workspace = resolve_workspace(config, root)?;
    let description = target.to_string();

    let mut connection = Connection::new(target, settings);
    connection
        .initialize(&workspace)
        .await
        .with_context(|| format!("handshake with {description} failed"))?;
    connection.shutdown().await;
    println!("Stopped server ({description})");
    Ok(())
}
