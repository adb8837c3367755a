use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use cryptodesk_agents::claude_cli::check_cli_available;
use cryptodesk_models::{AnalystKind, ResearchDepth, RiskKind, RunEvent, RunEventKind};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cryptodesk", about = "Multi-stage crypto research and trading desk")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/cryptodesk.toml")]
    config: String,

    /// Symbol to analyze. Repeat for a batch.
    #[arg(short, long = "symbol", required = true)]
    symbols: Vec<String>,

    /// Analysis date (YYYY-MM-DD). Defaults to today (UTC).
    #[arg(short, long)]
    date: Option<NaiveDate>,

    /// Debate and risk depth preset: shallow, medium or deep
    #[arg(long)]
    depth: Option<ResearchDepth>,

    /// Comma-separated analysts to enable
    #[arg(long, value_delimiter = ',')]
    analysts: Option<Vec<AnalystKind>>,

    /// Comma-separated risk perspectives to enable
    #[arg(long, value_delimiter = ',')]
    risk: Option<Vec<RiskKind>>,

    /// Pretty-print the output JSON
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = cryptodesk::load_config(&cli.config)?;
    if let Some(depth) = cli.depth {
        config.orchestration.apply_depth(depth);
    }
    if let Some(analysts) = cli.analysts {
        config.orchestration.enabled_analysts = analysts;
    }
    if let Some(risk) = cli.risk {
        config.orchestration.enabled_risk_perspectives = risk;
    }

    let orchestrator =
        cryptodesk::build_orchestrator(&config).context("Failed to build orchestrator")?;

    if !check_cli_available().await {
        anyhow::bail!("`claude` CLI not found on PATH");
    }

    let observer = tokio::spawn(log_events(orchestrator.subscribe()));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let as_of = cli.date.unwrap_or_else(|| Utc::now().date_naive());
    let entries = orchestrator.run_batch(&cli.symbols, as_of, &cancel).await;

    drop(orchestrator);
    if let Err(e) = observer.await {
        debug!(error = %e, "Event observer ended abnormally");
    }

    let output = if cli.pretty {
        serde_json::to_string_pretty(&entries)?
    } else {
        serde_json::to_string(&entries)?
    };
    println!("{output}");

    let failed = entries.iter().filter(|e| !e.succeeded()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} subjects did not reach a decision", entries.len());
    }
    Ok(())
}

/// Mirror run events into the log until the bus closes.
async fn log_events(mut rx: broadcast::Receiver<RunEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match &event.kind {
                RunEventKind::Stage {
                    phase,
                    stage_id,
                    status,
                    detail,
                } => debug!(
                    run_id = %event.run_id,
                    seq = event.sequence,
                    %phase,
                    stage = %stage_id,
                    ?status,
                    detail = detail.as_deref().unwrap_or(""),
                    "Stage"
                ),
                RunEventKind::PhaseCommitted { phase } => {
                    info!(run_id = %event.run_id, seq = event.sequence, %phase, "Phase committed")
                }
                RunEventKind::RunCompleted { final_decision } => info!(
                    run_id = %event.run_id,
                    symbol = %final_decision.trading_params.symbol,
                    action = %final_decision.action,
                    "Decision"
                ),
                RunEventKind::RunAborted { failure } => {
                    warn!(run_id = %event.run_id, %failure, "Run aborted")
                }
            },
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event observer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
