
// Run configuration: an optional JSON file, then command-line overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::devices::bird4480a::DEFAULT_MODEL;
use crate::error::{Error, Result};
use crate::session::Schedule;
use crate::sample::Band;
use crate::sinks::Layout;

pub const DEFAULT_RESOURCE: &str = "USB0::0x1422::0x4480::152256401::INSTR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggerConfig {
	// VISA-style resource string, or SIM
	pub resource: String,
	pub timeout_ms: u64,
	pub interval_ms: u64,
	pub duration_s: Option<f64>,
	pub max_samples: Option<u64>,
	pub output_dir: PathBuf,
	pub file_prefix: String,
	pub layout: Layout,
	// None keeps whatever band the meter is in
	pub band: Option<Band>,
	pub reset: bool,
	pub settle_ms: u64,
	// Substring the *IDN? model must contain
	pub expected_model: Option<String>,
	// 0 turns progress lines off
	pub progress_interval_s: u64,
	pub display: bool,
}

impl Default for LoggerConfig {
	fn default() -> Self {
		LoggerConfig {
			resource: DEFAULT_RESOURCE.to_owned(),
			timeout_ms: 2000,
			interval_ms: 1000,
			duration_s: None,
			max_samples: None,
			output_dir: PathBuf::from("."),
			file_prefix: "rf_power_data".to_owned(),
			layout: Layout::Basic,
			band: None,
			reset: false,
			settle_ms: 1500,
			expected_model: Some(DEFAULT_MODEL.to_owned()),
			progress_interval_s: 60,
			display: false,
		}
	}
}

impl LoggerConfig {
	pub fn load<P: AsRef<Path>>(path:P) -> Result<Self> {
		let path = path.as_ref();
		let text = fs::read_to_string(path)
			.map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
		let config: LoggerConfig = serde_json::from_str(&text)
			.map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		if self.resource.trim().is_empty() {
			return Err(Error::Config("resource must not be empty".into()));
		}
		if self.timeout_ms == 0 {
			return Err(Error::Config("timeout_ms must be positive".into()));
		}
		if self.interval_ms == 0 {
			return Err(Error::Config("interval_ms must be positive".into()));
		}
		if let Some(d) = self.duration_s {
			if !d.is_finite() || d < 0.0 {
				return Err(Error::Config(format!("duration_s must be a non-negative number, got {}", d)));
			}
		}
		if self.file_prefix.is_empty() || self.file_prefix.contains(|c: char| c == '/' || c == '\\') {
			return Err(Error::Config(format!("file_prefix '{}' is not a plain file name", self.file_prefix)));
		}
		Ok(())
	}

	pub fn timeout(&self) -> Duration {
		Duration::from_millis(self.timeout_ms)
	}

	pub fn settle_time(&self) -> Duration {
		Duration::from_millis(self.settle_ms)
	}

	pub fn schedule(&self) -> Schedule {
		Schedule {
			interval: Duration::from_millis(self.interval_ms),
			duration: self.duration_s.map(Duration::from_secs_f64),
			max_ticks: self.max_samples,
		}
	}
}

// Flags shared by the binaries.  Anything given here wins over the config file.
#[derive(Debug, Default, Args)]
pub struct RunArgs {
	/// JSON configuration file
	#[arg(short, long)]
	pub config: Option<PathBuf>,

	/// Instrument resource, e.g. USB0::0x1422::0x4480::152256401::INSTR or TCPIP0::10.0.0.5::INSTR
	#[arg(short, long)]
	pub resource: Option<String>,

	/// Use the built-in simulated meter
	#[arg(long, conflicts_with = "resource")]
	pub simulate: bool,

	/// Run for this many seconds
	#[arg(short, long)]
	pub duration: Option<f64>,

	/// Stop after this many ticks
	#[arg(short = 'n', long)]
	pub count: Option<u64>,

	/// Milliseconds between ticks
	#[arg(long)]
	pub interval_ms: Option<u64>,

	/// I/O timeout in milliseconds
	#[arg(long)]
	pub timeout_ms: Option<u64>,

	/// Directory for the data file
	#[arg(short, long)]
	pub output_dir: Option<PathBuf>,

	/// Measurement band to select before logging (low or high)
	#[arg(short, long)]
	pub band: Option<Band>,
}

impl RunArgs {
	pub fn resolve(&self, base:LoggerConfig) -> Result<LoggerConfig> {
		let mut config = match &self.config {
			Some(path) => LoggerConfig::load(path)?,
			None => base,
		};

		if self.simulate {
			config.resource = "SIM".to_owned();
		} else if let Some(r) = &self.resource {
			config.resource = r.clone();
		}
		if let Some(d) = self.duration {
			config.duration_s = Some(d);
		}
		if let Some(n) = self.count {
			config.max_samples = Some(n);
		}
		if let Some(i) = self.interval_ms {
			config.interval_ms = i;
		}
		if let Some(t) = self.timeout_ms {
			config.timeout_ms = t;
		}
		if let Some(dir) = &self.output_dir {
			config.output_dir = dir.clone();
		}
		if let Some(b) = self.band {
			config.band = Some(b);
		}

		config.validate()?;
		Ok(config)
	}
}
