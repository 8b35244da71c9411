
// Wiring shared by the binaries: open the meter, build the sinks, run.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;

use chrono::Local;
use log::{debug, info};

use crate::config::LoggerConfig;
use crate::devices::bird4480a::Bird4480A;
use crate::error::{Error, Result};
use crate::instrument::{self, Transport};
use crate::session::{Logger, RunSummary, StopHandle};
use crate::sinks::{timestamped_path, CsvSink, Layout, ProgressReporter, Sink, TerminalDisplay};

// Anything that goes wrong before the first tick means the run never started
fn at_startup(resource:&str, e:Error) -> Error {
	match e {
		Error::Communication { source, .. } => Error::Connection { resource: resource.to_owned(), source },
		other => other,
	}
}

pub fn open_meter(config:&LoggerConfig) -> Result<Bird4480A<Box<dyn Transport>>> {
	let resource = config.resource.as_str();
	let transport = instrument::open(resource, config.timeout())
		.map_err(|source| Error::Connection { resource: resource.to_owned(), source })?;

	let mut dev = Bird4480A::connect(transport, resource, config.expected_model.as_deref())?
		.with_settle_time(config.settle_time())
		.with_extended(config.layout == Layout::Extended);

	if config.reset {
		info!("Resetting meter");
		dev.reset().map_err(|e| at_startup(resource, e))?;
	}
	if let Some(band) = config.band {
		info!("Selecting {}", band);
		dev.set_band(band).map_err(|e| at_startup(resource, e))?;
	}
	Ok(dev)
}

// The data file path and the sinks for one run, in dispatch order
pub fn build_sinks(config:&LoggerConfig) -> (PathBuf, Vec<Box<dyn Sink>>) {
	let path = timestamped_path(&config.output_dir, &config.file_prefix, &Local::now());
	let mut sinks: Vec<Box<dyn Sink>> = vec![];

	if config.display {
		sinks.push(Box::new(TerminalDisplay::stdout()));
	} else if config.progress_interval_s > 0 {
		sinks.push(Box::new(ProgressReporter::stdout(std::time::Duration::from_secs(config.progress_interval_s))));
	}
	sinks.push(Box::new(CsvSink::create(&path, config.layout)));
	(path, sinks)
}

// A line on stdin stops the run.  End of input doesn't, so detached runs keep going.
pub fn stop_on_enter(handle:StopHandle) {
	thread::spawn(move || {
		let mut line = String::new();
		match io::stdin().lock().read_line(&mut line) {
			Ok(n) if n > 0 => {
				info!("Stop requested");
				handle.request_stop();
			}
			Ok(_) => debug!("stdin closed; run continues until its own limit"),
			Err(e) => debug!("stdin unavailable: {}", e),
		}
	});
}

pub fn run(config:&LoggerConfig) -> Result<RunSummary> {
	let mut logger = Logger::new(config.schedule());
	let (path, mut sinks) = build_sinks(config);
	info!("Logging {} to {}", config.resource, path.display());

	stop_on_enter(logger.stop_handle());
	logger.run(|| open_meter(config), &mut sinks)
}
