
// Quantities derived from the raw wattmeter readings.  Inputs with no physical answer give
// `Metric::Undefined`, never an infinity or NaN.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
	Value(f64),
	Undefined,
}

pub const UNDEFINED:&str = "undefined";

impl Metric {
	fn checked(x:f64) -> Metric {
		if x.is_finite() { Metric::Value(x) } else { Metric::Undefined }
	}

	pub fn value(self) -> Option<f64> {
		match self {
			Metric::Value(x) => Some(x),
			Metric::Undefined => None,
		}
	}

	// Reads back what Display wrote
	pub fn parse(s:&str) -> Option<Metric> {
		let s = s.trim();
		if s == UNDEFINED {
			Some(Metric::Undefined)
		} else {
			s.parse::<f64>().ok().map(Metric::checked)
		}
	}
}

impl fmt::Display for Metric {
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Metric::Value(x) => write!(f, "{:.2}", x),
			Metric::Undefined => f.write_str(UNDEFINED),
		}
	}
}

// Via the reflection coefficient, rho = sqrt(Pr / Pf)
pub fn vswr(forward_w:f64, reflected_w:f64) -> Metric {
	if !(forward_w > 0.0) || reflected_w < 0.0 {
		return Metric::Undefined;
	}
	let ratio = reflected_w / forward_w;
	if ratio >= 1.0 {
		return Metric::Undefined;
	}
	let rho = ratio.sqrt();
	Metric::checked((1.0 + rho) / (1.0 - rho))
}

pub fn return_loss(forward_w:f64, reflected_w:f64) -> Metric {
	if !(forward_w > 0.0) || !(reflected_w > 0.0) {
		return Metric::Undefined;
	}
	Metric::checked(10.0 * (forward_w / reflected_w).log10())
}

pub fn vswr_to_return_loss(vswr:f64) -> Metric {
	if !(vswr > 1.0) {
		return Metric::Undefined;
	}
	Metric::checked(-20.0 * ((vswr - 1.0) / (vswr + 1.0)).log10())
}

pub fn watts_to_dbm(watts:f64) -> Metric {
	if !(watts > 0.0) {
		return Metric::Undefined;
	}
	Metric::checked(10.0 * (watts * 1000.0).log10())
}

// HH:MM:SS, hours not wrapped
pub fn ms_to_hhmmss(ms:u64) -> String {
	let secs = ms / 1000;
	format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

pub fn round2(x:f64) -> f64 {
	(x * 100.0).round() / 100.0
}
