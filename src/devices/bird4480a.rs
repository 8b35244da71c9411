
use std::io;
use std::thread;
use std::time::Duration;

use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use serde::{Serialize, Deserialize};

use crate::devices::Meter;
use crate::error::{Error, Result};
use crate::instrument::Transport;
use crate::metrics::{round2, Metric};
use crate::sample::{Band, Reading};

lazy_static! {
	static ref IDN_RE: Regex = Regex::new("([^,]+),([^,]+),([^,]+),([^,\\s]+)").unwrap();
}

pub const IDN:&str          = "*IDN?";
pub const RST:&str          = "*RST";
pub const CLS:&str          = "*CLS";
pub const FETCH_FORWARD:&str = "FETC:FORW?";
pub const FETCH_REFLECTED:&str = "FETC:REFL?";
pub const FETCH_TEMP:&str   = "FETC:TEMP?";
pub const FETCH_VSWR:&str   = "FETC:VSWR?";
pub const SYSTEM_TIME:&str  = "SYST:TIM?";
pub const BAND_QUERY:&str   = "MEAS:BAND?";
pub const BAND_LOW:&str     = "MEAS:BAND 0";
pub const BAND_HIGH:&str    = "MEAS:BAND 1";

pub const DEFAULT_MODEL:&str = "4480";
pub const DEFAULT_SETTLE_SEC:f32 = 1.5;

// SCPI encodes "not a number" as 9.91E37; the meter uses it for overrange
pub const SCPI_NAN_THRESHOLD:f64 = 9.9e37;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
	pub manufacturer: String,
	pub model: String,
	pub serial_num: String,
	pub fw_version: String,
}

pub struct Bird4480A<T: Transport> {
	transport: T,
	extended: bool,
	settle: Duration,
	released: bool,
}

fn parse_number(command:&'static str, response:&str) -> Result<f64> {
	let bad = || Error::Parse { command, response: response.to_owned() };
	let x = response.trim().parse::<f64>().map_err(|_| bad())?;
	if !x.is_finite() || x.abs() >= SCPI_NAN_THRESHOLD { return Err(bad()); }
	Ok(x)
}

// Powers can't be negative; a "-0.00" at zero drive is fine
fn parse_power(command:&'static str, response:&str) -> Result<f64> {
	let x = parse_number(command, response)?;
	if x < 0.0 { return Err(Error::Parse { command, response: response.to_owned() }); }
	Ok(round2(x))
}

fn parse_u64(command:&'static str, response:&str) -> Result<u64> {
	response.trim().parse::<u64>().map_err(|_| Error::Parse { command, response: response.to_owned() })
}

pub fn parse_identity(response:&str) -> Option<Identity> {
	let caps = IDN_RE.captures(response.trim())?;
	Some(Identity {
		manufacturer: caps.get(1)?.as_str().trim().to_owned(),
		model:        caps.get(2)?.as_str().trim().to_owned(),
		serial_num:   caps.get(3)?.as_str().trim().to_owned(),
		fw_version:   caps.get(4)?.as_str().trim().to_owned(),
	})
}

impl<T: Transport> Bird4480A<T> {

	pub fn new(transport:T) -> Self {
		Bird4480A {
			transport,
			extended: false,
			settle: Duration::from_secs_f32(DEFAULT_SETTLE_SEC),
			released: false,
		}
	}

	// Wraps an open link and checks via `*IDN?` that a 4480 is on the other end.  Anything that goes
	// wrong here is a connection failure, including an answer that isn't an identity string.
	pub fn connect(transport:T, resource:&str, expected_model:Option<&str>) -> Result<Self> {
		let mut dev = Bird4480A::new(transport);

		let identity = dev.identify().map_err(|e| match e {
			Error::Communication { source, .. } => Error::Connection { resource: resource.to_owned(), source },
			Error::Parse { response, .. } => Error::Connection {
				resource: resource.to_owned(),
				source: io::Error::new(io::ErrorKind::InvalidData, format!("Unrecognised *IDN? response {:?}", response.trim_end())),
			},
			other => other,
		})?;

		if let Some(model) = expected_model {
			if !identity.model.contains(model) {
				return Err(Error::WrongModel {
					resource: resource.to_owned(),
					expected: model.to_owned(),
					identity: format!("{},{}", identity.manufacturer, identity.model),
				});
			}
		}

		info!("Connected to {} {} (serial {}, firmware {})", identity.manufacturer, identity.model, identity.serial_num, identity.fw_version);
		Ok(dev)
	}

	// Also read band, meter VSWR, uptime and test time on every acquisition
	pub fn with_extended(mut self, extended:bool) -> Self {
		self.extended = extended;
		self
	}

	// Pause after commands that make the meter re-range
	pub fn with_settle_time(mut self, settle:Duration) -> Self {
		self.settle = settle;
		self
	}

	pub fn transport(&self) -> &T { &self.transport }

	// A failed exchange may leave a late reply in flight; clear the link so it can't be read as the
	// answer to the next query
	fn resync(&mut self, command:&'static str, source:io::Error) -> Error {
		if let Err(e) = self.transport.clear() {
			warn!("Unable to clear the link after {} failed: {}", command, e);
		}
		Error::Communication { command, source }
	}

	fn send(&mut self, command:&'static str) -> Result<()> {
		match self.transport.write(command) {
			Ok(()) => Ok(()),
			Err(source) => Err(self.resync(command, source)),
		}
	}

	fn ask(&mut self, command:&'static str) -> Result<String> {
		match self.transport.query(command) {
			Ok(resp) => Ok(resp),
			Err(source) => Err(self.resync(command, source)),
		}
	}

	pub fn identify(&mut self) -> Result<Identity> {
		let resp = self.ask(IDN)?;
		parse_identity(&resp).ok_or(Error::Parse { command: IDN, response: resp })
	}

	// `*RST` then `*CLS`, then waits for the meter to settle.
	pub fn reset(&mut self) -> Result<()> {
		self.send(RST)?;
		self.send(CLS)?;
		thread::sleep(self.settle);
		Ok(())
	}

	pub fn set_band(&mut self, band:Band) -> Result<()> {
		let command = match band {
			Band::Low => BAND_LOW,
			Band::High => BAND_HIGH,
		};
		self.send(command)?;
		debug!("Band set to {}", band);
		thread::sleep(self.settle);
		Ok(())
	}

	pub fn band(&mut self) -> Result<Band> {
		let resp = self.ask(BAND_QUERY)?;
		let code = parse_u64(BAND_QUERY, &resp)?;
		if code > u8::MAX as u64 { return Err(Error::Parse { command: BAND_QUERY, response: resp }); }
		Band::from_code(code as u8).ok_or(Error::Parse { command: BAND_QUERY, response: resp })
	}

	// Milliseconds since the meter powered up.
	pub fn system_time_ms(&mut self) -> Result<u64> {
		let resp = self.ask(SYSTEM_TIME)?;
		parse_u64(SYSTEM_TIME, &resp)
	}

	pub fn forward_power(&mut self) -> Result<f64> {
		let resp = self.ask(FETCH_FORWARD)?;
		parse_power(FETCH_FORWARD, &resp)
	}

	pub fn reflected_power(&mut self) -> Result<f64> {
		let resp = self.ask(FETCH_REFLECTED)?;
		parse_power(FETCH_REFLECTED, &resp)
	}

	pub fn temperature(&mut self) -> Result<f64> {
		let resp = self.ask(FETCH_TEMP)?;
		parse_number(FETCH_TEMP, &resp).map(round2)
	}

	// The meter's own VSWR.  With nothing to measure it answers with the SCPI not-a-number value,
	// which is Undefined rather than a bad reply.
	pub fn meter_vswr(&mut self) -> Result<Metric> {
		let resp = self.ask(FETCH_VSWR)?;
		let x = resp.trim().parse::<f64>().map_err(|_| Error::Parse { command: FETCH_VSWR, response: resp.clone() })?;
		if x.abs() >= SCPI_NAN_THRESHOLD || x.is_nan() { return Ok(Metric::Undefined); }
		if !x.is_finite() || x < 1.0 { return Err(Error::Parse { command: FETCH_VSWR, response: resp }); }
		Ok(Metric::Value(round2(x)))
	}

}

impl<T: Transport> Meter for Bird4480A<T> {

	fn acquire(&mut self) -> Result<Reading> {
		let start_ms = if self.extended { Some(self.system_time_ms()?) } else { None };

		let forward_w = self.forward_power()?;
		let reflected_w = self.reflected_power()?;
		let meter_vswr = if self.extended { Some(self.meter_vswr()?) } else { None };
		let temperature_c = self.temperature()?;

		let mut reading = Reading::new(forward_w, reflected_w, temperature_c);
		reading.meter_vswr = meter_vswr;

		if let Some(start_ms) = start_ms {
			let end_ms = self.system_time_ms()?;
			reading.uptime_ms = Some(start_ms);
			reading.test_time_ms = Some(end_ms.saturating_sub(start_ms));
			reading.band = Some(self.band()?);
		}

		Ok(reading)
	}

	fn release(&mut self) -> io::Result<()> {
		if self.released { return Ok(()); }
		self.released = true;
		debug!("Releasing instrument link");
		self.transport.close()
	}

}

impl<T: Transport> Drop for Bird4480A<T> {

	fn drop(&mut self) {
		if let Err(e) = self.release() {
			warn!("Unable to release instrument link: {}", e);
		}
	}

}
