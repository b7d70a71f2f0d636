//! Subcommand implementations and the runtime they share.

pub mod ask;
pub mod chat;
pub mod config_cmd;
pub mod status;

use conclave_config::OrchestratorConfig;
use conclave_core::daemon::UpdateKind;
use conclave_core::event::Event;
use conclave_core::provider::Provider;
use conclave_core::text::truncate;
use conclave_memory::InMemoryStores;
use conclave_orchestrator::Orchestrator;
use conclave_providers::OpenAiCompatProvider;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// The single local user every CLI request runs as.
pub const LOCAL_USER: &str = "local";

/// Per-command timeout for the built-in bash tool.
const COMMAND_TIMEOUT_SECS: u64 = 30;

/// Load config and assemble an orchestrator over fresh in-memory stores.
pub async fn build_runtime(ollama: bool) -> anyhow::Result<Orchestrator> {
    let config = OrchestratorConfig::load()?;

    let provider: Arc<dyn Provider> = if ollama {
        Arc::new(OpenAiCompatProvider::ollama(None)?)
    } else {
        if !config.has_api_key() {
            eprintln!();
            eprintln!("  ERROR: No API key configured!");
            eprintln!();
            eprintln!("  Set CONCLAVE_API_KEY (or OPENAI_API_KEY), or add api_key to:");
            eprintln!("    {}", OrchestratorConfig::config_dir().join("config.toml").display());
            eprintln!();
            eprintln!("  Or run against a local Ollama server with --ollama.");
            eprintln!();
            anyhow::bail!("no API key found");
        }
        Arc::new(OpenAiCompatProvider::from_config(&config)?)
    };

    let stores = InMemoryStores::new();
    let stale = stores.stores().daemons.cleanup_stale().await?;
    if stale > 0 {
        tracing::info!(stale, "Marked interrupted daemons as failed");
    }

    let registry = Arc::new(conclave_tools::default_registry(Duration::from_secs(
        COMMAND_TIMEOUT_SECS,
    )));
    Ok(Orchestrator::new(config, provider, registry, stores.stores()))
}

/// One progress line for `event`, or `None` for events not worth showing.
/// Replies are printed separately.
pub fn render(event: &Event) -> Option<String> {
    match event {
        Event::OrchestratorThinking { content } => Some(format!("  ... {content}")),
        Event::OrchestratorClassified {
            mode,
            daemons_planned,
            ..
        } if *daemons_planned > 0 => Some(format!("  mode: {mode} ({daemons_planned} planned)")),
        Event::DaemonDeployed {
            role_label,
            task_summary,
            ..
        } => Some(format!("  > {role_label}: {}", truncate(task_summary, 80))),
        Event::DaemonUpdate { update } => match &update.kind {
            UpdateKind::ToolCall { tool_name, .. } => Some(format!("    {} -> {tool_name}", update.role)),
            UpdateKind::Status {
                status,
                current_action,
                ..
            } if status == "retrying" => Some(format!("    {}: {current_action}", update.role)),
            UpdateKind::Completed { .. } => Some(format!("  + {} finished", update.role)),
            UpdateKind::Failed { error, .. } => Some(format!("  x {} failed: {error}", update.role)),
            _ => None,
        },
        Event::DaemonFailed { role, error, .. } => Some(format!("  x {role} skipped: {error}")),
        Event::TaskFailed { error, .. } => Some(format!("  task failed: {error}")),
        Event::Error { message } => Some(format!("  error: {message}")),
        _ => None,
    }
}

/// Run `work` while echoing the local user's events: progress to stderr,
/// replies to stdout.
pub async fn drive<T>(orchestrator: &Orchestrator, work: impl Future<Output = T>) -> T {
    let mut rx = orchestrator.events().subscribe(LOCAL_USER);
    tokio::pin!(work);

    let result = loop {
        tokio::select! {
            biased;
            event = rx.recv() => match event {
                Ok(event) => show(&event),
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "Progress output lagged"),
                Err(RecvError::Closed) => break (&mut work).await,
            },
            result = &mut work => break result,
        }
    };

    loop {
        match rx.try_recv() {
            Ok(event) => show(&event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    result
}

fn show(event: &Event) {
    if let Event::OrchestratorResponse { content, .. } = event {
        println!();
        println!("{content}");
        println!();
    } else if let Some(line) = render(event) {
        eprintln!("{line}");
    }
}
