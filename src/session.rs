
// The sampling loop: acquire, compute, dispatch, wait for the next tick.  One `Logger` runs one
// session; the meter is released and every opened sink finished on every way out.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use log::{debug, error, info, warn};

use crate::devices::Meter;
use crate::error::{Error, Result};
use crate::sample::Sample;
use crate::sinks::Sink;

// Longest uninterrupted sleep while waiting for the next tick
const STOP_POLL:Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	Idle,
	Connecting,
	Running,
	Stopping,
	Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
	Cancelled,
	DurationElapsed,
	SampleLimit,
}

impl fmt::Display for StopReason {
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			StopReason::Cancelled       => "stopped by user",
			StopReason::DurationElapsed => "duration reached",
			StopReason::SampleLimit     => "tick limit reached",
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
	pub ticks: u64,
	pub samples: u64,
	pub skipped: u64,
	pub reason: StopReason,
}

// Set from any thread; the loop notices between ticks
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
	pub fn new() -> Self { Self::default() }

	pub fn request_stop(&self) { self.0.store(true, Ordering::SeqCst); }

	pub fn is_stop_requested(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
	pub interval: Duration,
	pub duration: Option<Duration>,
	pub max_ticks: Option<u64>,
}

impl Default for Schedule {
	fn default() -> Self {
		Schedule { interval: Duration::from_secs(1), duration: None, max_ticks: None }
	}
}

impl Schedule {
	// First interval boundary strictly after `elapsed`, counted from the start of the run
	fn next_boundary(&self, elapsed:Duration) -> Duration {
		if self.interval.is_zero() {
			return elapsed;
		}
		let n = elapsed.as_nanos() / self.interval.as_nanos() + 1;
		Duration::from_nanos((self.interval.as_nanos() * n).min(u64::MAX as u128) as u64)
	}
}

pub struct Logger {
	schedule: Schedule,
	state: State,
	stop: StopHandle,
}

impl Logger {

	pub fn new(schedule:Schedule) -> Self {
		Logger { schedule, state: State::Idle, stop: StopHandle::new() }
	}

	pub fn state(&self) -> State { self.state }

	pub fn stop_handle(&self) -> StopHandle { self.stop.clone() }

	fn transition(&mut self, next:State) {
		debug!("session {:?} -> {:?}", self.state, next);
		self.state = next;
	}

	pub fn run<M, F>(&mut self, connect:F, sinks:&mut [Box<dyn Sink>]) -> Result<RunSummary>
		where M: Meter, F: FnOnce() -> Result<M>
	{
		if self.state != State::Idle {
			return Err(Error::AlreadyRun);
		}

		self.transition(State::Connecting);
		let mut meter = match connect() {
			Ok(m) => m,
			Err(e) => {
				error!("{}", e);
				self.transition(State::Stopped);
				return Err(e);
			},
		};

		let mut started = 0;
		let mut outcome = Ok(());
		for sink in sinks.iter_mut() {
			match sink.start() {
				Ok(()) => started += 1,
				Err(e) if sink.critical() => {
					outcome = Err(file_error(&**sink, e));
					break;
				},
				Err(e) => {
					warn!("{} unavailable: {}", sink.name(), e);
					started += 1;
				},
			}
		}

		let outcome = match outcome {
			Ok(()) => {
				self.transition(State::Running);
				self.poll(&mut meter, sinks)
			},
			Err(e) => Err(e),
		};

		self.transition(State::Stopping);
		let outcome = self.teardown(&mut meter, &mut sinks[..started], outcome);
		self.transition(State::Stopped);

		match &outcome {
			Ok(summary) => info!("{} samples written, {} ticks skipped ({})", summary.samples, summary.skipped, summary.reason),
			Err(e) => error!("{}", e),
		}
		outcome
	}

	fn stop_reason(&self, ticks:u64, started:Instant) -> Option<StopReason> {
		if self.stop.is_stop_requested() {
			Some(StopReason::Cancelled)
		} else if self.schedule.max_ticks.map_or(false, |max| ticks >= max) {
			Some(StopReason::SampleLimit)
		} else if self.schedule.duration.map_or(false, |d| started.elapsed() >= d) {
			Some(StopReason::DurationElapsed)
		} else {
			None
		}
	}

	fn poll<M: Meter>(&mut self, meter:&mut M, sinks:&mut [Box<dyn Sink>]) -> Result<RunSummary> {
		let started = Instant::now();
		let mut ticks = 0u64;
		let mut samples = 0u64;
		let mut skipped = 0u64;

		let reason = loop {
			if let Some(reason) = self.stop_reason(ticks, started) {
				break reason;
			}

			ticks += 1;
			match meter.acquire() {
				Ok(reading) => {
					let sample = Sample::compute(&reading, ticks, Local::now(), started.elapsed());
					dispatch(&sample, sinks)?;
					samples += 1;
				},
				Err(e) if e.is_recoverable() => {
					warn!("tick {} skipped: {}", ticks, e);
					skipped += 1;
				},
				Err(e) => return Err(e),
			}

			// No point waiting out an interval that will never be used
			if let Some(reason) = self.stop_reason(ticks, started) {
				break reason;
			}
			self.wait_for_next_tick(started);
		};

		Ok(RunSummary { ticks, samples, skipped, reason })
	}

	fn wait_for_next_tick(&self, started:Instant) {
		let deadline = started + self.schedule.next_boundary(started.elapsed());
		loop {
			if self.stop.is_stop_requested() {
				return;
			}
			let now = Instant::now();
			if now >= deadline {
				return;
			}
			thread::sleep((deadline - now).min(STOP_POLL));
		}
	}

	fn teardown<M: Meter>(&mut self, meter:&mut M, sinks:&mut [Box<dyn Sink>], mut outcome:Result<RunSummary>) -> Result<RunSummary> {
		for sink in sinks.iter_mut() {
			if let Err(e) = sink.finish() {
				if sink.critical() && outcome.is_ok() {
					outcome = Err(file_error(&**sink, e));
				} else {
					warn!("{} did not close cleanly: {}", sink.name(), e);
				}
			}
		}
		if let Err(e) = meter.release() {
			warn!("instrument release failed: {}", e);
		}
		outcome
	}

}

fn file_error(sink:&dyn Sink, source:io::Error) -> Error {
	Error::File { path: PathBuf::from(sink.name()), source }
}

// Only a critical sink's failure comes back; the rest are logged
pub fn dispatch(sample:&Sample, sinks:&mut [Box<dyn Sink>]) -> Result<()> {
	for sink in sinks.iter_mut() {
		if let Err(e) = sink.accept(sample) {
			if sink.critical() {
				return Err(file_error(&**sink, e));
			}
			warn!("{} failed on sample {}: {}", sink.name(), sample.count, e);
		}
	}
	Ok(())
}
