//! Microgrid site planner - Command Line Interface
//!
//! Selects solar microgrid sites inside a region under a budget.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use microgrid_qubo::benchmark::{Benchmark, BenchmarkConfig};
use microgrid_qubo::config::PlannerConfig;
use microgrid_qubo::error::Result;
use microgrid_qubo::geo::BoundingBox;
use microgrid_qubo::heuristics::GreedyRatioHeuristic;
use microgrid_qubo::instance::SiteDataset;
use microgrid_qubo::orchestrator::SolveOrchestrator;
use microgrid_qubo::request::{Algorithm, SolveRequest, SolveResponse};

use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "microgrid-qubo")]
#[command(version = "1.0")]
#[command(about = "Budget-constrained microgrid site selection with QUBO solvers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a site selection request
    Solve {
        /// Request JSON file
        #[arg(short, long)]
        request: PathBuf,

        /// Site dataset (.csv or .json); without it a mesh is generated
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Override the request's algorithm
        #[arg(short, long, value_enum)]
        algorithm: Option<Algorithm>,

        /// Planner configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the random seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Timeout for external solvers in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Write the response to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit the full result with analysis instead of the site list
        #[arg(long)]
        full: bool,

        /// Print a summary to stderr
        #[arg(short, long)]
        verbose: bool,
    },

    /// Build the QUBO for a request and write it out without solving
    ExportQubo {
        #[arg(short, long)]
        request: PathBuf,

        #[arg(short, long)]
        dataset: Option<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a synthetic site dataset
    Generate {
        /// Number of sites
        #[arg(short, long, default_value = "50")]
        num_sites: usize,

        /// Random seed
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Output CSV file
        #[arg(short, long, default_value = "sites.csv")]
        output: PathBuf,
    },

    /// Analyze a dataset, optionally clipped to a request's region
    Analyze {
        #[arg(short, long)]
        dataset: PathBuf,

        #[arg(short, long)]
        request: Option<PathBuf>,
    },

    /// Compare algorithms on one request
    Compare {
        #[arg(short, long)]
        request: PathBuf,

        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Number of runs per stochastic algorithm
        #[arg(long, default_value = "10")]
        runs: usize,

        /// Algorithms to compare
        #[arg(short, long, value_enum, value_delimiter = ',', default_value = "greedy,annealing,tabu")]
        algorithms: Vec<Algorithm>,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory for CSV files and the report
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Run seeds one after another
        #[arg(long)]
        sequential: bool,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Solve { request, dataset, algorithm, config, seed, timeout_ms, output, full, verbose } => {
            solve(&request, dataset.as_deref(), algorithm, config.as_deref(), seed, timeout_ms, output, full, verbose)
        }

        Commands::ExportQubo { request, dataset, output } => export_qubo(&request, dataset.as_deref(), output),

        Commands::Generate { num_sites, seed, output } => generate(num_sites, seed, &output),

        Commands::Analyze { dataset, request } => analyze(&dataset, request.as_deref()),

        Commands::Compare { request, dataset, runs, algorithms, config, output, sequential } => {
            compare(&request, dataset.as_deref(), runs, algorithms, config.as_deref(), output, sequential)
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<PlannerConfig> {
    match path {
        Some(p) => PlannerConfig::from_file(p),
        None => Ok(PlannerConfig::default()),
    }
}

fn load_dataset(path: Option<&Path>) -> Result<Option<SiteDataset>> {
    path.map(SiteDataset::from_file).transpose()
}

fn write_json<T: serde::Serialize>(value: &T, output: Option<PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            eprintln!("Saved to {:?}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn solve(
    request_path: &Path,
    dataset_path: Option<&Path>,
    algorithm: Option<Algorithm>,
    config_path: Option<&Path>,
    seed: Option<u64>,
    timeout_ms: Option<u64>,
    output: Option<PathBuf>,
    full: bool,
    verbose: bool,
) -> Result<()> {
    let mut request = SolveRequest::from_file(request_path)?;
    if let Some(algorithm) = algorithm {
        request.algorithm = algorithm;
    }
    if seed.is_some() {
        request.seed = seed;
    }

    let mut config = load_config(config_path)?;
    if let Some(ms) = timeout_ms {
        config.exact.timeout_ms = ms;
        config.quantum.timeout_ms = ms;
    }

    let dataset = load_dataset(dataset_path)?;
    let orchestrator = SolveOrchestrator::new(config);
    let result = orchestrator.solve(&request, dataset.as_ref())?;

    if verbose {
        eprintln!("{}", result);
    }

    if full {
        write_json(&result, output)
    } else {
        write_json(&SolveResponse::from(result), output)
    }
}

fn export_qubo(request_path: &Path, dataset_path: Option<&Path>, output: Option<PathBuf>) -> Result<()> {
    let request = SolveRequest::from_file(request_path)?;
    let dataset = load_dataset(dataset_path)?;
    let export = SolveOrchestrator::default().export_qubo(&request, dataset.as_ref())?;
    write_json(&export, output)
}

fn generate(num_sites: usize, seed: u64, output: &Path) -> Result<()> {
    let dataset = SiteDataset::generate(num_sites, seed, BoundingBox::ethiopia());
    dataset.to_csv(output)?;
    println!("Generated {} sites (seed {}) into {:?}", num_sites, seed, output);
    println!("{}", dataset.statistics());
    Ok(())
}

fn analyze(dataset_path: &Path, request_path: Option<&Path>) -> Result<()> {
    let dataset = SiteDataset::from_file(dataset_path)?;

    println!("========== Dataset Analysis ==========\n");
    println!("{}", dataset.statistics());

    let Some(request_path) = request_path else {
        return Ok(());
    };

    let request = SolveRequest::from_file(request_path)?;
    let problem = SolveOrchestrator::default().prepare(&request, Some(&dataset))?;
    let candidates = &problem.candidates;

    println!("Region candidates: {} of {}", candidates.len(), dataset.sites.len());
    if candidates.is_empty() {
        return Ok(());
    }

    let cost: f64 = candidates.iter().map(|c| c.cost).sum();
    let avg_distance = candidates.iter().map(|c| c.distance_km).sum::<f64>() / candidates.len() as f64;
    let max_distance = candidates.iter().map(|c| c.distance_km).fold(0.0, f64::max);
    println!("  Total cost of all candidates: ${:.0} (budget ${:.0})", cost, request.budget);
    println!("  Distance to population center: avg {:.1} km, max {:.1} km", avg_distance, max_distance);

    let greedy = GreedyRatioHeuristic::new().solve(candidates, request.budget);
    let analysis = greedy.selection.analyze(candidates, request.budget);
    println!("\nQuick Greedy Estimate:");
    println!("  Sites: {}", analysis.num_sites);
    println!("  Cost: ${:.0}", analysis.total_cost);
    println!("  Energy: {:.2} kWh/day", analysis.total_energy);
    println!("  Population: {:.0}", analysis.total_population);
    Ok(())
}

fn compare(
    request_path: &Path,
    dataset_path: Option<&Path>,
    runs: usize,
    algorithms: Vec<Algorithm>,
    config_path: Option<&Path>,
    output: Option<PathBuf>,
    sequential: bool,
) -> Result<()> {
    let request = SolveRequest::from_file(request_path)?;
    let dataset = load_dataset(dataset_path)?;
    let planner = load_config(config_path)?;

    let config = BenchmarkConfig {
        num_runs: runs,
        base_seed: request.seed.unwrap_or(planner.seed),
        algorithms,
        parallel: !sequential,
    };

    let pb = ProgressBar::new(config.total_runs() as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} runs [{elapsed_precise}]") {
        pb.set_style(style);
    }

    let mut benchmark = Benchmark::new(config, SolveOrchestrator::new(planner));
    benchmark.run(&request, dataset.as_ref(), Some(&pb));
    pb.finish_and_clear();

    let report = benchmark.generate_report();
    println!("{}", report);

    if let Some(dir) = output {
        std::fs::create_dir_all(&dir)?;

        let results_path = dir.join("results.csv");
        benchmark.export_to_csv(&results_path)?;
        println!("Results exported to {:?}", results_path);

        let stats_path = dir.join("statistics.csv");
        benchmark.export_statistics_csv(&stats_path)?;
        println!("Statistics exported to {:?}", stats_path);

        let report_path = dir.join("report.txt");
        std::fs::write(&report_path, &report)?;
        println!("Report saved to {:?}", report_path);
    }
    Ok(())
}
