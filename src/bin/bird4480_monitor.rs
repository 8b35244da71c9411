// Live readout of a Bird 4480A, once a second, with every reading also logged to CSV.  Runs until
// Enter is pressed.

use std::process;

use clap::Parser;
use log::error;

use bird4480::app;
use bird4480::config::{LoggerConfig, RunArgs};
use bird4480::devices::bird4480a::Bird4480A;
use bird4480::sinks::Layout;

#[derive(Debug, Parser)]
#[command(name = "bird4480_monitor", version, about = "Live Bird 4480A readout with CSV logging")]
struct Cli {
	#[command(flatten)]
	run: RunArgs,

	/// Print the meter's identity as JSON and exit
	#[arg(long)]
	identify: bool,
}

fn main() {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

	let cli = Cli::parse();
	let base = LoggerConfig {
		file_prefix: "data_log".to_owned(),
		layout: Layout::Extended,
		display: true,
		..LoggerConfig::default()
	};

	let config = match cli.run.resolve(base) {
		Ok(c) => c,
		Err(e) => {
			error!("{}", e);
			process::exit(2);
		}
	};

	if cli.identify {
		let identity = app::open_meter(&config).and_then(|mut dev: Bird4480A<_>| dev.identify());
		match identity {
			Ok(id) => println!("{}", serde_json::to_string_pretty(&id).unwrap_or_default()),
			Err(e) => {
				eprintln!("{}", e);
				process::exit(1);
			}
		}
		return;
	}

	match app::run(&config) {
		Ok(summary) => println!("{} samples logged ({})", summary.samples, summary.reason),
		Err(e) => {
			eprintln!("{}", e);
			process::exit(1);
		}
	}
}
