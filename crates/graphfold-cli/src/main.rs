//! `graphfold` command-line driver.
//!
//! ```bash
//! # Fold constants, writing the rewritten graph and parameter table
//! graphfold fold --graph model.gf --params params.json --out folded.gf --params-out folded.json
//!
//! # Run a graph on the reference executor
//! graphfold run --graph folded.gf --params folded.json --inputs inputs.json
//! ```
//!
//! Set `RUST_LOG=graphfold=debug` to see each folded node.

mod io;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use graphfold::executor::collect_inputs;
use graphfold::fold::{ConstantFoldPass, FoldConfig};
use graphfold::ir::Graph;
use graphfold::ExecutorRegistry;
use io::TensorTable;

#[derive(Parser, Debug)]
#[command(name = "graphfold")]
#[command(about = "Constant folding and reference execution for exported operator graphs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fold constant subgraphs into parameter-bound inputs
    Fold(FoldArgs),
    /// Execute a graph and print its outputs as a tensor table
    Run(RunArgs),
    /// List registered executors
    Executors,
}

#[derive(Args, Debug)]
struct FoldArgs {
    /// Graph in the textual format
    #[arg(short, long)]
    graph: PathBuf,

    /// Parameter table (JSON) bound to root inputs by name
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// Operator-set version; defaults to the one in the graph header, then 9
    #[arg(long)]
    opset: Option<i64>,

    /// Destination for the folded graph (stdout when omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Destination for the rewritten parameter table (stdout when omitted)
    #[arg(long)]
    params_out: Option<PathBuf>,

    /// Lint the graph after folding
    #[arg(long)]
    verify: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Graph in the textual format
    #[arg(short, long)]
    graph: PathBuf,

    /// Parameter table (JSON) bound to root inputs by name
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// Remaining root inputs (JSON tensor table)
    #[arg(short, long)]
    inputs: Option<PathBuf>,

    /// Executor name; defaults to GRAPHFOLD_EXECUTOR, then the default executor
    #[arg(short, long)]
    executor: Option<String>,

    /// Fold constants before executing
    #[arg(long)]
    fold: bool,

    /// Destination for the output table (stdout when omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Fold(args) => fold(args),
        Command::Run(args) => run(args),
        Command::Executors => {
            let registry = registry();
            let listing: Vec<String> = registry.names().iter().map(ToString::to_string).collect();
            io::write_text(None, &format!("{}\n", listing.join("\n")))
        }
    }
}

fn registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    graphfold_backend_ref::register_ref_executor(&mut registry);
    registry
}

fn fold_graph(
    graph: &mut Graph,
    params: &mut TensorTable,
    opset: Option<i64>,
    verify: bool,
) -> Result<()> {
    let mut config = FoldConfig::for_graph(graph);
    if let Some(opset) = opset {
        config.opset_version = opset;
    }
    config.verify |= verify;
    let stats = ConstantFoldPass::with_config(config)
        .run(graph, params)
        .context("constant folding failed")?;
    tracing::info!(
        folded = stats.folded,
        erased_inputs = stats.erased_inputs,
        rejected = stats.rejected,
        "fold finished"
    );
    Ok(())
}

fn fold(args: FoldArgs) -> Result<()> {
    let mut graph = io::read_graph(&args.graph)?;
    let mut params = io::read_table(args.params.as_deref())?;
    fold_graph(&mut graph, &mut params, args.opset, args.verify)?;

    io::write_text(args.out.as_deref(), &graph.to_string())?;
    io::write_table(args.params_out.as_deref(), &params)
}

fn run(args: RunArgs) -> Result<()> {
    let mut graph = io::read_graph(&args.graph)?;
    let mut params = io::read_table(args.params.as_deref())?;
    let runtime = io::read_table(args.inputs.as_deref())?;
    if args.fold {
        fold_graph(&mut graph, &mut params, None, false)?;
    }

    let mut registry = registry();
    match args.executor {
        Some(name) => registry.set_active(name),
        None => {
            registry.select_from_env();
        }
    }
    tracing::info!(executor = %registry.active_name(), "executing graph");

    let inputs = collect_inputs(&graph, &params, &runtime)?;
    let output_names: Vec<String> = graph
        .block_outputs(graph.root())
        .iter()
        .map(|&id| graph.value(id).unique_name())
        .collect();
    let engine = registry.create(graph)?;
    let outputs = engine.run(&inputs)?;

    let table: BTreeMap<String, _> = output_names.into_iter().zip(outputs).collect();
    io::write_table(args.out.as_deref(), &table)
}
