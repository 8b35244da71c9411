
use std::io::{self, IsTerminal, Write};

use super::{Sink, TIMESTAMP_FORMAT};
use crate::sample::Sample;

const TITLE:&str = "4480 Wattmeter";
const CLEAR_SCREEN:&str = "\x1b[2J\x1b[H";

// Live readout of the latest sample, one right-aligned label per line
pub struct TerminalDisplay<W: Write> {
	out: W,
	redraw: bool,
}

impl TerminalDisplay<io::Stdout> {
	// Redraws in place on a terminal, scrolls otherwise
	pub fn stdout() -> Self {
		let redraw = io::stdout().is_terminal();
		TerminalDisplay { out: io::stdout(), redraw }
	}
}

impl<W: Write> TerminalDisplay<W> {

	pub fn new(out:W, redraw:bool) -> Self { TerminalDisplay { out, redraw } }

	pub fn get_ref(&self) -> &W { &self.out }

	fn lines(sample:&Sample) -> Vec<(&'static str, String)> {
		let mut lines = Vec::with_capacity(14);
		lines.push(("Time:", sample.timestamp.format(TIMESTAMP_FORMAT).to_string()));
		if let Some(band) = sample.band {
			lines.push(("Measurement Band:", band.label().to_owned()));
		}
		lines.push(("Forward Average Power (W):", format!("{:.2}", sample.forward_w)));
		lines.push(("Reflected Average Power (W):", format!("{:.2}", sample.reflected_w)));
		lines.push(("Forward Average Power (dBm):", sample.forward_dbm.to_string()));
		lines.push(("Reflected Average Power (dBm):", sample.reflected_dbm.to_string()));
		lines.push(("VSWR:", sample.vswr.to_string()));
		lines.push(("Return Loss (dB):", sample.return_loss_db.to_string()));
		if let Some(v) = sample.meter_vswr {
			lines.push(("Meter VSWR:", v.to_string()));
		}
		if let Some(rl) = sample.meter_return_loss_db {
			lines.push(("Meter Return Loss (dB):", rl.to_string()));
		}
		lines.push(("Temp (C):", format!("{:.2}", sample.temperature_c)));
		lines.push(("Measurement Count:", sample.count.to_string()));
		if let Some(t) = sample.test_time_ms {
			lines.push(("Test Time (ms):", t.to_string()));
		}
		if let Some(up) = sample.uptime() {
			lines.push(("System Up Time:", up));
		}
		lines
	}

}

impl<W: Write> Sink for TerminalDisplay<W> {

	fn name(&self) -> &str { "display" }

	fn accept(&mut self, sample:&Sample) -> io::Result<()> {
		let lines = Self::lines(sample);
		let width = lines.iter().map(|(label, _)| label.len()).max().unwrap_or(0);

		let mut frame = String::new();
		if self.redraw {
			frame.push_str(CLEAR_SCREEN);
		}
		frame.push_str(TITLE);
		frame.push('\n');
		for (label, value) in lines {
			frame.push_str(&format!("{:>width$}  {}\n", label, value, width = width));
		}
		if !self.redraw {
			frame.push('\n');
		}

		self.out.write_all(frame.as_bytes())?;
		self.out.flush()
	}

}
