use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chunklab::chunk_test::{BenchmarkTestRequest, ChunkTestResult, ChunkTestStatus};
use chunklab::config::{self, Config};
use chunklab::datasets::{BenchmarkRegistry, build_dataset_source};
use chunklab::embedding::build_embedding_client;
use chunklab::index::InMemoryIndex;
use chunklab::logging;
use chunklab::metrics::ServiceMetrics;
use chunklab::service::{AppService, AppSettings};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "chunk-bench",
    about = "Compare chunking methods on benchmark datasets from the command line"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the benchmark catalog.
    List,
    /// Run one chunk test in-process against the in-memory index.
    Run {
        #[arg(long)]
        dataset: String,
        /// Chunking method to compare; repeat for several. Defaults to every method.
        #[arg(long = "mode")]
        modes: Vec<String>,
        /// Query to run; repeat for several. Defaults to the dataset's canned queries.
        #[arg(long = "query")]
        queries: Vec<String>,
        /// Write the result JSON here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Directory for the job record and result. Defaults to a fresh temporary directory.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing();
    let config = config::get_config();

    match cli.command {
        Command::List => list(config).await,
        Command::Run {
            dataset,
            modes,
            queries,
            output,
            data_dir,
        } => {
            let request = BenchmarkTestRequest {
                dataset_name: dataset,
                queries: (!queries.is_empty()).then_some(queries),
                modes: (!modes.is_empty()).then_some(modes),
            };
            let data_dir = data_dir.unwrap_or_else(|| {
                std::env::temp_dir().join(format!("chunk-bench-{}", uuid::Uuid::new_v4()))
            });
            run_test(config, request, data_dir, output).await
        }
    }
}

async fn list(config: &Config) -> Result<()> {
    let registry = BenchmarkRegistry::new(build_dataset_source(config)?);
    let benchmarks = registry
        .refresh()
        .await
        .context("Failed to load benchmark catalog")?;
    for benchmark in benchmarks {
        let version = benchmark.version.as_deref().unwrap_or("-");
        println!("{:<16} {:<8} {}", benchmark.name, version, benchmark.description);
    }
    Ok(())
}

async fn run_test(
    config: &Config,
    request: BenchmarkTestRequest,
    data_dir: PathBuf,
    output: Option<PathBuf>,
) -> Result<()> {
    let metrics = Arc::new(ServiceMetrics::new());
    let embedder = build_embedding_client(config, metrics.clone())?;
    let settings = AppSettings {
        data_dir,
        ..AppSettings::from_config(config)
    };
    let service = AppService::assemble(
        embedder,
        Arc::new(InMemoryIndex::new()),
        build_dataset_source(config)?,
        settings,
        metrics,
    )
    .await?;

    let accepted = service.chunk_tests().submit_benchmark(request).await?;
    eprintln!("chunk test {} accepted", accepted.test_id);
    let result = service.chunk_tests().wait_for_result(accepted.test_id).await?;
    eprint!("{}", render_summary(&result));

    let json = serde_json::to_string_pretty(result.as_ref())?;
    match output {
        Some(path) => std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{json}"),
    }

    if result.status == ChunkTestStatus::Failed {
        bail!(
            "chunk test failed: {}",
            result.error_message.as_deref().unwrap_or("unknown cause")
        );
    }
    Ok(())
}

fn render_summary(result: &ChunkTestResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<12} {:>7} {:>10} {:>9}",
        "method", "chunks", "mean_chars", "composite"
    );
    for (method, stats) in &result.chunking_comparison {
        let composite = result
            .summary
            .composite_scores
            .get(method)
            .copied()
            .unwrap_or(0.0);
        let _ = writeln!(
            out,
            "{:<12} {:>7} {:>10.1} {:>9.3}",
            method.as_str(),
            stats.chunk_count,
            stats.mean_characters,
            composite
        );
    }
    for (method, cause) in &result.method_failures {
        let _ = writeln!(out, "{:<12} failed: {cause}", method.as_str());
    }
    if let Some(winner) = result.summary.retrieval_winner {
        let _ = writeln!(out, "winner: {winner}");
    }
    out
}
