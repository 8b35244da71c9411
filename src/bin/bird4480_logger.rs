// Logs forward/reflected power, VSWR, return loss and meter temperature to a time-stamped CSV file
// for a fixed duration.  The meter is reset and put in the requested band first.

use std::process;

use clap::Parser;
use log::error;

use bird4480::app;
use bird4480::config::{LoggerConfig, RunArgs};
use bird4480::sample::Band;

const DEFAULT_DURATION_SEC: f64 = 1800.0;

#[derive(Debug, Parser)]
#[command(name = "bird4480_logger", version, about = "Log a Bird 4480A wattmeter to CSV for a fixed time")]
struct Cli {
	#[command(flatten)]
	run: RunArgs,
}

fn main() {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	let cli = Cli::parse();
	let base = LoggerConfig {
		duration_s: Some(DEFAULT_DURATION_SEC),
		band: Some(Band::Low),
		reset: true,
		..LoggerConfig::default()
	};

	let config = match cli.run.resolve(base) {
		Ok(c) => c,
		Err(e) => {
			error!("{}", e);
			process::exit(2);
		}
	};

	println!("Press Enter to stop early");
	match app::run(&config) {
		Ok(summary) => println!("Testing ended: {} samples, {} skipped ({})", summary.samples, summary.skipped, summary.reason),
		Err(e) => {
			eprintln!("{}", e);
			process::exit(1);
		}
	}
}
