
// A stand-in 4480A that answers the same SCPI the real meter does.  Used by the `SIM` resource
// string and by the tests, which script faults into particular acquisition cycles.

use std::collections::HashMap;
use std::io::{self, Error, ErrorKind};
use std::time::Instant;

use log::{debug, trace};
use rand::distributions::{IndependentSample, Range};

use crate::instrument::Transport;
use crate::sample::Band;

pub const SIM_IDN:&str = "Bird Technologies,4480A,152256401,1.0.4";

// Misbehaviour to inject into one acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
	// `FETC:REFL?` never answers
	Timeout,
	// `FETC:REFL?` answers with something that isn't a number
	Garbage,
}

pub struct SimulatedMeter {
	forward_w: f64,
	reflected_w: f64,
	temperature_c: f64,
	noise: f64,
	band: Band,
	booted: Instant,
	boot_uptime_ms: u64,
	cycle: u64,
	faults: HashMap<u64, Fault>,
	pending: Option<String>,
	history: Vec<String>,
	clears: usize,
	closed: bool,
}

impl Default for SimulatedMeter {
	// A 100 W transmitter into a slightly mismatched load, with a little jitter on every reading
	fn default() -> Self {
		let mut sim = SimulatedMeter::steady(100.0, 4.0, 32.5);
		sim.noise = 0.05;
		sim
	}
}

fn err(kind:ErrorKind, msg:&str) -> io::Error { Error::new(kind, msg) }

impl SimulatedMeter {

	// Noise-free meter that always reports the given values.
	pub fn steady(forward_w:f64, reflected_w:f64, temperature_c:f64) -> Self {
		SimulatedMeter {
			forward_w,
			reflected_w,
			temperature_c,
			noise: 0.0,
			band: Band::Low,
			booted: Instant::now(),
			boot_uptime_ms: 3_600_000,
			cycle: 0,
			faults: HashMap::new(),
			pending: None,
			history: vec![],
			clears: 0,
			closed: false,
		}
	}

	// Injects `fault` into the `cycle`th acquisition (counting from 1).
	pub fn with_fault(mut self, cycle:u64, fault:Fault) -> Self {
		self.faults.insert(cycle, fault);
		self
	}

	pub fn history(&self) -> &[String] { &self.history }

	pub fn clears(&self) -> usize { self.clears }

	pub fn band(&self) -> Band { self.band }

	pub fn is_closed(&self) -> bool { self.closed }

	fn jitter(&self, x:f64) -> f64 {
		if self.noise <= 0.0 { return x; }
		let between = Range::new(-self.noise, self.noise);
		let mut rng = rand::thread_rng();
		(x * (1.0 + between.ind_sample(&mut rng))).max(0.0)
	}

	fn uptime_ms(&self) -> u64 {
		self.boot_uptime_ms + self.booted.elapsed().as_millis() as u64
	}

	// Returns the response for a query, or None if the meter stays silent
	fn respond(&mut self, cmd:&str) -> Option<String> {
		let fault = self.faults.get(&self.cycle).copied();
		match cmd {
			"*IDN?" => Some(SIM_IDN.to_owned()),
			"FETC:FORW?" => Some(format!("{:.4}", self.jitter(self.forward_w))),
			"FETC:REFL?" => match fault {
				Some(Fault::Timeout) => None,
				Some(Fault::Garbage) => Some("-ERR,OVERRANGE".to_owned()),
				None => Some(format!("{:.4}", self.jitter(self.reflected_w))),
			},
			"FETC:TEMP?" => Some(format!("{:.2}", self.temperature_c)),
			"FETC:VSWR?" => {
				// The meter answers 9.91E37, SCPI's not-a-number, when there is nothing to measure
				if self.forward_w <= 0.0 || self.reflected_w >= self.forward_w {
					return Some("9.91E+37".to_owned());
				}
				let rho = (self.reflected_w / self.forward_w).sqrt();
				Some(format!("{:.3}", (1.0 + rho) / (1.0 - rho)))
			},
			"SYST:TIM?" => Some(self.uptime_ms().to_string()),
			"MEAS:BAND?" => Some(self.band.code().to_string()),
			_ => None,
		}
	}

	fn execute(&mut self, cmd:&str) {
		match cmd {
			"*RST" => {
				self.band = Band::Low;
				self.pending = None;
			},
			"*CLS" => { },
			"MEAS:BAND 0" => self.band = Band::Low,
			"MEAS:BAND 1" => self.band = Band::High,
			other => debug!("Simulated meter ignoring '{}'", other),
		}
	}

}

impl Transport for SimulatedMeter {

	fn write(&mut self, cmd:&str) -> io::Result<()> {
		if self.closed {
			return Err(err(ErrorKind::NotConnected, "Simulated meter is closed"));
		}
		let cmd = cmd.trim().to_ascii_uppercase();
		trace!("sim >> {}", cmd);
		self.history.push(cmd.clone());

		if cmd == "FETC:FORW?" { self.cycle += 1; }

		if cmd.ends_with('?') {
			self.pending = self.respond(&cmd).map(|r| r + "\n");
		} else {
			self.execute(&cmd);
		}
		Ok(())
	}

	fn read(&mut self) -> io::Result<String> {
		if self.closed {
			return Err(err(ErrorKind::NotConnected, "Simulated meter is closed"));
		}
		self.pending.take().ok_or_else(|| err(ErrorKind::TimedOut, "I/O timeout"))
	}

	fn clear(&mut self) -> io::Result<()> {
		self.clears += 1;
		self.pending = None;
		Ok(())
	}

	fn close(&mut self) -> io::Result<()> {
		self.closed = true;
		Ok(())
	}

}
