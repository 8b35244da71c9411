
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local, Timelike};
use serde::{Deserialize, Serialize};

use crate::metrics::{self, Metric};

// The two measurement bands, as selected with `MEAS:BAND`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
	Low,
	High,
}

impl Band {

	pub fn from_code(code:u8) -> Option<Band> {
		match code {
			0 => Some(Band::Low),
			1 => Some(Band::High),
			_ => None,
		}
	}

	pub fn code(self) -> u8 {
		match self {
			Band::Low  => 0,
			Band::High => 1,
		}
	}

	pub fn label(self) -> &'static str {
		match self {
			Band::Low  => "Low Band 2 to 30 MHz",
			Band::High => "High Band 25 to 1000 MHz",
		}
	}

}

impl fmt::Display for Band {
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.label()) }
}

impl FromStr for Band {
	type Err = String;

	fn from_str(s:&str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"low"  | "0" => Ok(Band::Low),
			"high" | "1" => Ok(Band::High),
			other => Err(format!("unknown band '{}', expected low or high", other)),
		}
	}
}

// What one acquisition pass read off the meter.  The optional fields are only read in extended mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
	pub forward_w: f64,
	pub reflected_w: f64,
	pub temperature_c: f64,
	pub meter_vswr: Option<Metric>,
	pub band: Option<Band>,
	pub uptime_ms: Option<u64>,
	pub test_time_ms: Option<u64>,
}

impl Reading {
	pub fn new(forward_w:f64, reflected_w:f64, temperature_c:f64) -> Self {
		Reading { forward_w, reflected_w, temperature_c, meter_vswr: None, band: None, uptime_ms: None, test_time_ms: None }
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
	pub timestamp: DateTime<Local>,
	pub elapsed: Duration,
	pub count: u64,
	pub forward_w: f64,
	pub reflected_w: f64,
	pub temperature_c: f64,
	pub vswr: Metric,
	pub return_loss_db: Metric,
	pub forward_dbm: Metric,
	pub reflected_dbm: Metric,
	pub meter_vswr: Option<Metric>,
	pub meter_return_loss_db: Option<Metric>,
	pub band: Option<Band>,
	pub uptime_ms: Option<u64>,
	pub test_time_ms: Option<u64>,
}

impl Sample {

	// Timestamps are kept to whole seconds
	pub fn compute(reading:&Reading, count:u64, timestamp:DateTime<Local>, elapsed:Duration) -> Sample {
		let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
		let meter_return_loss_db = reading.meter_vswr.map(|v| match v {
			Metric::Value(x) => metrics::vswr_to_return_loss(x),
			Metric::Undefined => Metric::Undefined,
		});

		Sample {
			timestamp,
			elapsed,
			count,
			forward_w: reading.forward_w,
			reflected_w: reading.reflected_w,
			temperature_c: reading.temperature_c,
			vswr: metrics::vswr(reading.forward_w, reading.reflected_w),
			return_loss_db: metrics::return_loss(reading.forward_w, reading.reflected_w),
			forward_dbm: metrics::watts_to_dbm(reading.forward_w),
			reflected_dbm: metrics::watts_to_dbm(reading.reflected_w),
			meter_vswr: reading.meter_vswr,
			meter_return_loss_db,
			band: reading.band,
			uptime_ms: reading.uptime_ms,
			test_time_ms: reading.test_time_ms,
		}
	}

	pub fn uptime(&self) -> Option<String> { self.uptime_ms.map(metrics::ms_to_hhmmss) }

}
