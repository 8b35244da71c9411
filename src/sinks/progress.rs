
use std::io::{self, Write};
use std::time::Duration;

use super::Sink;
use crate::sample::Sample;

// Prints the elapsed run time every `every`, for long unattended logs
pub struct ProgressReporter<W: Write> {
	out: W,
	every: Duration,
	next: Duration,
	samples: u64,
}

impl ProgressReporter<io::Stdout> {
	pub fn stdout(every:Duration) -> Self { ProgressReporter::new(io::stdout(), every) }
}

impl<W: Write> ProgressReporter<W> {

	pub fn new(out:W, every:Duration) -> Self {
		ProgressReporter { out, every, next: every, samples: 0 }
	}

	pub fn get_ref(&self) -> &W { &self.out }

}

impl<W: Write> Sink for ProgressReporter<W> {

	fn name(&self) -> &str { "progress" }

	fn start(&mut self) -> io::Result<()> {
		writeln!(self.out, "Logging started")?;
		self.out.flush()
	}

	fn accept(&mut self, sample:&Sample) -> io::Result<()> {
		self.samples += 1;
		if self.every.is_zero() || sample.elapsed < self.next {
			return Ok(());
		}
		while self.next <= sample.elapsed {
			self.next += self.every;
		}
		writeln!(self.out, "Elapsed time: {:.3} s", sample.elapsed.as_secs_f64())?;
		self.out.flush()
	}

	fn finish(&mut self) -> io::Result<()> {
		writeln!(self.out, "Logging ended after {} samples", self.samples)?;
		self.out.flush()
	}

}
