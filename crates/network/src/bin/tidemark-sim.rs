//! tidemark-sim: run a scenario against an in-memory expression network.
//!
//! The scenario file lists roots, expressions, symbol metadata, executor
//! outcomes per node and the root watermark pushes to apply. After the
//! network settles, node states and metrics are printed as JSON.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tidemark_core::config::load_dotenv;
use tidemark_core::{Config, DataId, Expression, FuncId, Pointer, Symbol};
use tidemark_network::sim::{EchoDataInfo, Outcome, RecordingPerformance, SimulatedExecutor, StaticSymbolLibrary};
use tidemark_network::{
    BroadcastQueue, ExpressionNetwork, ExpressionState, GraphView, InMemoryNodeRepository, InMemoryTaskRepository,
    NetworkMetrics,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Drive an expression network through a JSON scenario.
#[derive(Parser, Debug)]
#[command(name = "tidemark-sim", version, about)]
struct Cli {
    /// Path to the scenario JSON file.
    #[arg(long, env = "TIDEMARK_SCENARIO")]
    scenario: String,

    /// Simulated executor latency in milliseconds.
    #[arg(long, default_value_t = 10)]
    delay_ms: u64,

    /// Seconds to wait for the network to settle after each phase.
    #[arg(long, default_value_t = 30)]
    settle_timeout: u64,

    /// Include the debug graph of all nodes in the report.
    #[arg(long)]
    graph: bool,
}

// ── Scenario ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Scenario {
    roots: Vec<DataId>,
    #[serde(default)]
    expressions: Vec<Expression>,
    #[serde(default)]
    symbols: Vec<Symbol>,
    /// Executor behavior per output id; unlisted nodes succeed.
    #[serde(default)]
    outcomes: HashMap<DataId, Outcome>,
    #[serde(default)]
    pushes: Vec<Push>,
    /// Operators reported as changed once the pushes have settled.
    #[serde(default)]
    func_updates: Vec<FuncId>,
}

#[derive(Debug, Deserialize)]
struct Push {
    id: DataId,
    ptr: Pointer,
}

#[derive(Serialize)]
struct Report {
    settled: bool,
    nodes: Vec<ExpressionState>,
    metrics: NetworkMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    graph: Option<GraphView>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let raw = std::fs::read_to_string(&cli.scenario)
        .with_context(|| format!("reading scenario {}", cli.scenario))?;
    let scenario: Scenario = serde_json::from_str(&raw).with_context(|| format!("parsing scenario {}", cli.scenario))?;
    info!(
        path = %cli.scenario,
        roots = scenario.roots.len(),
        expressions = scenario.expressions.len(),
        pushes = scenario.pushes.len(),
        "Scenario loaded"
    );

    let symbols = Arc::new(StaticSymbolLibrary::new());
    for symbol in scenario.symbols {
        symbols.insert(symbol);
    }
    let executor = Arc::new(SimulatedExecutor::new(Duration::from_millis(cli.delay_ms)));
    for (id, outcome) in scenario.outcomes {
        executor.set_outcome(id, outcome);
    }
    let queue = Arc::new(BroadcastQueue::new(config.scheduler.broadcast_capacity));

    let network = ExpressionNetwork::builder()
        .node_repository(Arc::new(InMemoryNodeRepository::new()))
        .task_repository(Arc::new(InMemoryTaskRepository::new()))
        .executor(executor.clone())
        .symbols(symbols)
        .message_queue(queue.clone())
        .performance(Arc::new(RecordingPerformance::new()))
        .data_info(Arc::new(EchoDataInfo::new()))
        .config(config.scheduler.clone())
        .build()?;
    executor.attach(&network);

    let mut subscription = queue.subscribe(Vec::<DataId>::new());
    tokio::spawn(async move {
        while let Some(n) = subscription.recv().await {
            info!(node = %n.id, status = %n.status, reason = ?n.reason, "Notification");
        }
    });

    let mut ids = Vec::new();
    for root in scenario.roots {
        ids.extend(network.add(Expression::make_root(root)).await?);
    }
    for expression in scenario.expressions {
        ids.extend(network.add(expression).await?);
    }

    let timeout = Duration::from_secs(cli.settle_timeout);
    let mut settled = network.wait_settled(timeout).await;
    for push in scenario.pushes {
        if let Err(e) = network.update_root(&push.id, push.ptr).await {
            warn!(node = %push.id, error = %e, "Root push rejected");
        }
        settled = network.wait_settled(timeout).await;
    }
    if !scenario.func_updates.is_empty() {
        for func in &scenario.func_updates {
            network.update_func(func).await?;
        }
        settled = network.wait_settled(timeout).await;
    }

    let graph = if cli.graph { Some(network.build_debug_graph(&ids).await?) } else { None };
    let report = Report {
        settled,
        nodes: network.query_expressions_state(&ids).await?,
        metrics: network.metrics(),
        graph,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
