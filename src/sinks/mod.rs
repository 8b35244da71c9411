
// Where finished samples go.  A critical sink ends the run when it fails; any other sink's failure
// is logged and the loop carries on.

use std::io;

use crate::sample::Sample;

mod csv_file;
mod display;
mod progress;

pub use self::csv_file::{timestamped_path, CsvSink, Layout, TIMESTAMP_FORMAT};
pub use self::display::TerminalDisplay;
pub use self::progress::ProgressReporter;

pub trait Sink {
	// Used in log lines and error reports
	fn name(&self) -> &str;

	fn critical(&self) -> bool { false }

	fn start(&mut self) -> io::Result<()> { Ok(()) }

	fn accept(&mut self, sample:&Sample) -> io::Result<()>;

	// Called once when the run stops, whatever the reason
	fn finish(&mut self) -> io::Result<()> { Ok(()) }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
	fn name(&self) -> &str { (**self).name() }
	fn critical(&self) -> bool { (**self).critical() }
	fn start(&mut self) -> io::Result<()> { (**self).start() }
	fn accept(&mut self, sample:&Sample) -> io::Result<()> { (**self).accept(sample) }
	fn finish(&mut self) -> io::Result<()> { (**self).finish() }
}
