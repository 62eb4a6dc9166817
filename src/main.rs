use clap::{ArgAction, Args, Parser, Subcommand};
use eyre::{Result, WrapErr, bail};
use reelindex::config::{self, Backend, ConfigOverrides};
use reelindex::{ingest, pipeline};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser)]
#[command(name = "reelindex", version, about = "Load movie descriptions into a vector index")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to ./reelindex.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse, vectorize, index, query and tear down.
    Run(RunArgs),
    /// Parse a record file and print what would be loaded.
    Parse { input: PathBuf },
    /// Print the task graph in execution order.
    Graph,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long)]
    index_name: Option<String>,
    #[arg(long)]
    top_k: Option<usize>,
    #[arg(long, value_enum)]
    backend: Option<Backend>,
    /// Write the JSON run report here.
    #[arg(long)]
    report: Option<PathBuf>,
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    // Also routes `log` records through the subscriber.
    if tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_err()
    {
        log::warn!("Logger already initialized; keeping the existing one.");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run(args) => run(cli.config, args).await,
        Command::Parse { input } => parse(input).await,
        Command::Graph => graph(),
    }
}

async fn run(config_file: Option<PathBuf>, args: RunArgs) -> Result<()> {
    let overrides = ConfigOverrides {
        input_path: args.input,
        index_name: args.index_name,
        top_k: args.top_k,
        backend: args.backend,
    };
    let cfg = config::load(config_file.as_deref(), &overrides)?;
    let store = pipeline::open_store(&cfg).await?;
    let report = pipeline::run(cfg.pipeline, store).await?;

    if let Some(path) = args.report {
        let json = serde_json::to_string_pretty(&report).wrap_err("Failed to serialize report")?;
        tokio::fs::write(&path, json)
            .await
            .wrap_err_with(|| format!("Failed to write report to {}", path.display()))?;
    }

    println!(
        "index `{}`: parsed {}, skipped {}, ingested {}, dropped {}, matches {}",
        report.index_name,
        report.parsed,
        report.skipped.len(),
        report.ingested,
        report.dropped.len(),
        report.matches.len()
    );
    for task in &report.tasks {
        println!("  {:<24} {:?}", task.id, task.state);
    }

    if !report.succeeded() {
        bail!("Pipeline run for index `{}` failed", report.index_name);
    }
    Ok(())
}

async fn parse(input: PathBuf) -> Result<()> {
    let report = ingest::parse_file(&input).await?;
    let summary = serde_json::json!({
        "source": report.source,
        "parsed": report.records.len(),
        "skipped": report.skipped,
        "records": report.records,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn graph() -> Result<()> {
    let graph = pipeline::build_graph()?;
    for node in graph.describe()? {
        let mut line = node.id.clone();
        if !node.upstream.is_empty() {
            line.push_str(&format!(" <- {}", node.upstream.join(", ")));
        }
        if !node.teardown_of.is_empty() {
            line.push_str(&format!(" [teardown of {}]", node.teardown_of.join(", ")));
        }
        println!("{line}");
    }
    Ok(())
}
