#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

//! Thin command-line entry point: parses arguments, loads the TSV shims,
//! invokes the core pipeline, and prints results. No numerical logic
//! lives here.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;

use netprior::data::load_dataset_tsv;
use netprior::estimate::train_model;
use netprior::graph::{InteractionGraph, LaplacianKind, load_edges_tsv};
use netprior::infer::{self, EngineConfig};
use netprior::model::ModelConfig;
use netprior::report::summarize;

#[derive(Clone, Copy, ValueEnum)]
enum LaplacianCli {
    Unnormalized,
    Normalized,
}

impl From<LaplacianCli> for LaplacianKind {
    fn from(value: LaplacianCli) -> Self {
        match value {
            LaplacianCli::Unnormalized => LaplacianKind::Unnormalized,
            LaplacianCli::Normalized => LaplacianKind::SymmetricNormalized,
        }
    }
}

#[derive(Args)]
struct CommonArgs {
    /// Dataset TSV with gene,label and feature columns
    dataset: PathBuf,

    /// Edge-list TSV with gene_a,gene_b and an optional weight column
    graph: PathBuf,

    /// Regularization strength (>= 0)
    #[arg(long, default_value_t = 1.0)]
    lambda: f64,

    /// Optimizer iteration budget
    #[arg(long, default_value_t = 500)]
    max_iters: usize,

    /// Convergence tolerance on the objective improvement
    #[arg(long, default_value_t = 1e-8)]
    tol: f64,

    /// Laplacian form used by the smoothness penalty
    #[arg(long, value_enum, default_value = "normalized")]
    laplacian: LaplacianCli,

    /// Seed for random weight initialization (zero init when omitted)
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Let held-out predictions use graph neighbors' fitted outputs
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    neighbor_imputation: bool,

    /// Mask the held-out gene's features at inference
    #[arg(long)]
    mask_features: bool,

    /// Reuse a single shared fit across folds instead of refitting per
    /// fold (leaks held-out labels; records are marked accordingly)
    #[arg(long)]
    shared_fit: bool,

    /// Run folds on rayon workers
    #[arg(long)]
    parallel: bool,
}

#[derive(Args)]
struct FitArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Where to write the trained model (TOML)
    #[arg(long)]
    output: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Leave-one-gene-out evaluation; prints one TSV row per fold
    Run(RunArgs),
    /// Fit once on the full dataset and save the model
    Fit(FitArgs),
}

/// Evaluates a gene interaction graph as a structured prior for
/// supervised gene classification.
#[derive(Parser)]
#[command(name = "netprior", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

fn model_config(common: &CommonArgs) -> ModelConfig {
    ModelConfig {
        lambda: common.lambda,
        max_iters: common.max_iters,
        tol: common.tol,
        seed: common.seed,
        ..ModelConfig::default()
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(message) = dispatch(cli) {
        eprintln!("Error: {message}");
        process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Run(args) => run_command(args),
        Command::Fit(args) => fit_command(args),
    }
}

fn load_inputs(
    common: &CommonArgs,
) -> Result<(netprior::data::GeneDataset, InteractionGraph), String> {
    let dataset = load_dataset_tsv(&common.dataset).map_err(|e| e.to_string())?;
    let edges = load_edges_tsv(&common.graph).map_err(|e| e.to_string())?;
    let graph = InteractionGraph::from_edges(dataset.vocabulary().clone(), &edges)
        .map_err(|e| e.to_string())?;
    Ok((dataset, graph))
}

fn run_command(args: RunArgs) -> Result<(), String> {
    let (dataset, graph) = load_inputs(&args.common)?;
    let config = EngineConfig {
        model: model_config(&args.common),
        laplacian: args.common.laplacian.into(),
        neighbor_imputation: args.neighbor_imputation,
        mask_features: args.mask_features,
        refit_per_fold: !args.shared_fit,
        parallel: args.parallel,
    };

    let records = infer::run(&dataset, &graph, &config).map_err(|e| e.to_string())?;

    println!("gene\tpredicted\tactual\tsource\tdegraded\tconverged\titerations");
    for r in &records {
        println!(
            "{}\t{:.6}\t{}\t{:?}\t{}\t{}\t{}",
            r.gene,
            r.predicted,
            r.actual,
            r.metadata.source,
            r.metadata.degraded,
            r.metadata.converged,
            r.metadata.iterations
        );
    }

    let summary = summarize(&records);
    eprintln!(
        "{} folds | accuracy {:.4} | mean log-loss {:.4} | degraded {} | unconverged {}",
        summary.folds,
        summary.accuracy,
        summary.mean_log_loss,
        summary.degraded_folds,
        summary.unconverged_folds
    );
    Ok(())
}

fn fit_command(args: FitArgs) -> Result<(), String> {
    let (dataset, graph) = load_inputs(&args.common)?;
    let laplacian = graph.laplacian(args.common.laplacian.into());
    let config = model_config(&args.common);
    let model = train_model(
        dataset.features().view(),
        dataset.labels().view(),
        laplacian.view(),
        &config,
    )
    .map_err(|e| e.to_string())?;

    if !model.summary.converged {
        log::warn!(
            "Model did not converge in {} iterations; saving the partial fit anyway.",
            config.max_iters
        );
    }
    model.save(&args.output).map_err(|e| e.to_string())?;
    eprintln!(
        "Saved model to {} ({} iterations, objective {:.6e}).",
        args.output.display(),
        model.summary.iterations,
        model.summary.final_objective
    );
    Ok(())
}
