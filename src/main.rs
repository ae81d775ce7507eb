//! repocontext CLI entry point

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use repocontext::benchmark::{run_benchmark, write_report, BenchmarkDataset};
use repocontext::builder::GraphBuilder;
use repocontext::cli::{Cli, OperationMode, OutputFormat};
use repocontext::manager::GraphManager;
use repocontext::pipeline::{Pipeline, PipelineConfig, PipelineRequest};
use repocontext::store::open_store;
use repocontext::RetrievalError;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn run() -> repocontext::Result<String> {
    let cli = Cli::parse();
    let mode = cli.operation_mode()?;
    let mut manager = build_manager(&cli)?;

    match mode {
        OperationMode::Index => run_index(&cli, &mut manager),
        OperationMode::Resolve { query } => run_resolve(&cli, &mut manager, &query),
        OperationMode::Retrieve { query } => run_retrieve(&cli, &mut manager, &query),
        OperationMode::Bench { dataset } => run_bench(&cli, &mut manager, &dataset),
    }
}

fn build_manager(cli: &Cli) -> repocontext::Result<GraphManager> {
    if !cli.dir.is_dir() {
        return Err(RetrievalError::config(format!(
            "not a directory: {}",
            cli.dir.display()
        )));
    }
    let store = open_store(&cli.store, cli.store_path.clone())?;
    Ok(GraphManager::new(GraphBuilder::new(&cli.dir), store))
}

fn pipeline_config(cli: &Cli) -> PipelineConfig {
    PipelineConfig {
        force_rebuild: cli.force_rebuild,
        candidate_limit: cli.limit,
        ..PipelineConfig::default()
    }
}

fn run_index(cli: &Cli, manager: &mut GraphManager) -> repocontext::Result<String> {
    manager.initialize(cli.force_rebuild)?;
    let graph = manager.graph()?;
    let summary = serde_json::json!({
        "nodes": graph.node_count(),
        "edges": graph.edge_count(),
    });
    Ok(match cli.format {
        OutputFormat::Json => format!("{}\n", summary),
        OutputFormat::Text => format!(
            "Indexed {}: {} nodes, {} edges\n",
            cli.dir.display(),
            graph.node_count(),
            graph.edge_count()
        ),
    })
}

fn run_resolve(cli: &Cli, manager: &mut GraphManager, query: &str) -> repocontext::Result<String> {
    let mut pipeline = Pipeline::new(manager, pipeline_config(cli));
    let result = pipeline.run(&PipelineRequest {
        query: query.to_string(),
        target_file: cli.target.clone(),
        token_budget: cli.budget,
        ..PipelineRequest::default()
    });
    if let Some(error) = result.error {
        return Err(RetrievalError::config(error));
    }
    let resolution = result
        .resolution
        .ok_or_else(|| RetrievalError::config("resolution produced no result"))?;

    Ok(match cli.format {
        OutputFormat::Json => format!(
            "{}\n",
            serde_json::to_string_pretty(&resolution).unwrap_or_default()
        ),
        OutputFormat::Text => {
            let mut out = String::new();
            for (rank, candidate) in resolution.candidates.iter().enumerate() {
                out.push_str(&format!(
                    "{:>2}. {:<40} score {:.3}\n",
                    rank + 1,
                    candidate.path,
                    candidate.score
                ));
                if cli.verbose {
                    for reason in &candidate.reasons {
                        out.push_str(&format!("      - {}\n", reason));
                    }
                }
            }
            out
        }
    })
}

fn run_retrieve(cli: &Cli, manager: &mut GraphManager, query: &str) -> repocontext::Result<String> {
    let mut pipeline = Pipeline::new(manager, pipeline_config(cli));
    let result = pipeline.run(&PipelineRequest {
        query: query.to_string(),
        target_file: cli.target.clone(),
        token_budget: cli.budget,
        ..PipelineRequest::default()
    });
    if let Some(error) = result.error {
        return Err(RetrievalError::config(error));
    }
    let context = result
        .context
        .ok_or_else(|| RetrievalError::config("retrieval produced no context"))?;

    Ok(match cli.format {
        OutputFormat::Json => format!(
            "{}\n",
            serde_json::to_string_pretty(&context).unwrap_or_default()
        ),
        OutputFormat::Text => {
            let mut out = context.formatted.clone();
            out.push_str(&format!(
                "\n---\ntokens: {} used / {} budget ({} saved)\n",
                context.tokens_used, context.telemetry.token_budget, context.tokens_saved
            ));
            out
        }
    })
}

fn run_bench(
    cli: &Cli,
    manager: &mut GraphManager,
    dataset_path: &std::path::Path,
) -> repocontext::Result<String> {
    let dataset = BenchmarkDataset::load(dataset_path)?;
    let report = run_benchmark(manager, &dataset, &pipeline_config(cli))?;
    let report_path = write_report(&report, &cli.dir)?;
    Ok(match cli.format {
        OutputFormat::Json => format!(
            "{}\n",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        ),
        OutputFormat::Text => format!(
            "Ran {} tasks: {:.1}% passed (report: {})\n",
            report.results.len(),
            report.pass_rate * 100.0,
            report_path.display()
        ),
    })
}
