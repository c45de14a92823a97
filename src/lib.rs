// src/lib.rs

pub mod cache;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fingerprint;
pub mod fs;
pub mod history;
pub mod housekeeping;
pub mod logging;
pub mod sync;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{config_root_dir, load_and_validate};
use crate::dag::FinalizedGraph;
use crate::engine::{CacheOptions, Engine};
use crate::history::MemoryHistoryStore;
use crate::types::RunOutcome;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - graph construction and validation
/// - the engine
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<RunOutcome> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let root = config_root_dir(&config_path);

    if let Some(age) = args.prune_cache {
        let report = housekeeping::prune_state(&cfg, &root, housekeeping::days(age))?;
        println!("{report}");
        return Ok(RunOutcome::Succeeded);
    }

    let mut graph = cfg.to_graph()?;
    for task in &args.tasks {
        graph.request(task.as_str());
    }
    let graph = graph.finalize()?;

    if args.dry_run {
        print_dry_run(&graph);
        return Ok(RunOutcome::Succeeded);
    }

    let mut options = cfg.engine_options(&root);
    if let Some(workers) = args.workers {
        options = options.workers(workers);
    }
    if let Some(policy) = args.failure_policy() {
        options = options.failure_policy(policy);
    }
    if args.no_cache {
        options = options.cache(CacheOptions::disabled());
    }
    if args.no_history {
        options = options.history(Arc::new(MemoryHistoryStore::new()));
    }

    let engine = Engine::new(options);

    // Ctrl-C → cancel the run; running tasks are signalled, nothing new starts.
    {
        let token = engine.cancellation_token();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; cancelling build");
            token.cancel();
        });
    }

    let report = engine.run(graph).await?;
    println!("{report}");
    Ok(report.outcome)
}

/// Print the nodes of the run in the order they would start with one worker.
fn print_dry_run(graph: &FinalizedGraph) {
    println!("cachedag dry-run");
    for (from, to) in graph.dropped_edges() {
        println!("  (dropped should_run_after edge {from} -> {to})");
    }
    let plan = graph.planned_order();
    println!("tasks ({}):", plan.len());
    for id in plan {
        let Some(node) = graph.index_of(id).map(|i| graph.node(i)) else {
            continue;
        };
        println!("  - {id}");
        println!("      action: {}", node.action.identity());
        if node.cacheable {
            println!("      cacheable: true");
        }
        if !node.parallel {
            println!("      parallel: false");
        }
        for spec in &node.inputs {
            println!("      input {} ({})", spec.name, spec.kind_tag());
        }
        for spec in &node.outputs {
            println!("      output {} ({})", spec.name, spec.kind_tag());
        }
    }

    debug!("dry-run complete (no execution)");
}
