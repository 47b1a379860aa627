use sandpile::{
	png,
	read_grid,
	run,
	EngineConfig,
	ParallelEngine,
	Split,
	DEFAULT_THRESHOLD,
};

use std::{
	path::PathBuf,
	process::ExitCode,
	time::Instant,
};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Topples a sandpile until it is stable and draws the result as a PNG.
#[derive(Parser, Debug)]
#[command(name = "sandpile", version, about)]
struct Cli {
	/// Input file: 'width,height' on the first line, then one comma-separated row per line
	input: PathBuf,

	/// Output PNG file
	output: PathBuf,

	/// Regions of at most this many cells are updated by a single task
	#[arg(long, default_value_t = DEFAULT_THRESHOLD)]
	threshold: usize,

	/// Worker threads (0: one per hardware thread)
	#[arg(short, long, default_value_t = 0)]
	workers: usize,

	/// How large regions are partitioned: 'quadrants' or 'longest-axis'
	#[arg(long, default_value_t = Split::Quadrants)]
	split: Split,

	/// Also print the stable grid as text
	#[arg(long)]
	ascii: bool,

	/// Debug logging (set RUST_LOG=trace to log every pass)
	#[arg(short, long)]
	verbose: bool,

	/// Only log errors
	#[arg(short, long, conflicts_with = "verbose")]
	quiet: bool,
}

fn setup_logging(verbose: bool, quiet: bool) {
	let filter = if quiet {
		EnvFilter::new("error")
	} else if verbose {
		EnvFilter::new("debug")
	} else {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
	};

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	setup_logging(cli.verbose, cli.quiet);
	match simulate(&cli) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("{:#}", e);
			ExitCode::FAILURE
		}
	}
}

fn simulate(cli: &Cli) -> anyhow::Result<()> {
	let mut grid = read_grid(&cli.input)
		.with_context(|| format!("Can't read {}", cli.input.display()))?;
	println!("Width: {}, Height: {}", grid.width(), grid.height());

	let engine = ParallelEngine::new(EngineConfig {
		threshold: cli.threshold,
		workers: cli.workers,
		split: cli.split,
	})?;
	info!(workers = engine.workers(), threshold = cli.threshold, split = %cli.split, "simulating");

	let start = Instant::now();
	let steps = run(&mut grid, &engine).context("Simulation aborted")?;
	let elapsed = start.elapsed();
	drop(engine);

	println!("Simulation complete, writing image...");
	png(&grid.snapshot(), &cli.output)
		.with_context(|| format!("Can't write to file {}", cli.output.display()))?;
	if cli.ascii {
		print!("{}", grid);
	}
	println!("Number of steps to stable state: {}", steps);
	println!("Time: {} ms", elapsed.as_millis());
	Ok(())
}
