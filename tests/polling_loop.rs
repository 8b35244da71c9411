use std::cell::{Cell, RefCell};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use bird4480::devices::bird4480a::Bird4480A;
use bird4480::devices::Meter;
use bird4480::sample::{Reading, Sample};
use bird4480::session::{Logger, Schedule, State, StopHandle, StopReason};
use bird4480::sim::{Fault, SimulatedMeter};
use bird4480::sinks::{CsvSink, Layout, Sink};
use bird4480::Error;

fn ticks(n:u64) -> Schedule {
	Schedule { interval: Duration::ZERO, duration: None, max_ticks: Some(n) }
}

fn meter(sim:SimulatedMeter) -> Bird4480A<SimulatedMeter> {
	Bird4480A::new(sim).with_settle_time(Duration::ZERO)
}

fn data_rows(path:&Path) -> Vec<String> {
	let text = fs::read_to_string(path).unwrap();
	text.lines().skip(1).map(|l| l.to_owned()).collect()
}

// Wraps a meter and remembers whether it was handed back.
struct Tracked<M> {
	inner: M,
	released: Rc<Cell<bool>>,
}

impl<M: Meter> Meter for Tracked<M> {
	fn acquire(&mut self) -> bird4480::Result<Reading> {
		self.inner.acquire()
	}

	fn release(&mut self) -> io::Result<()> {
		self.released.set(true);
		self.inner.release()
	}
}

// Accepts writes until it has seen `lines` newlines, then reports a full disk.
struct FillingDisk {
	data: Rc<RefCell<Vec<u8>>>,
	lines: usize,
}

impl Write for FillingDisk {
	fn write(&mut self, buf:&[u8]) -> io::Result<usize> {
		let mut data = self.data.borrow_mut();
		if data.iter().filter(|b| **b == b'\n').count() >= self.lines {
			return Err(io::Error::new(io::ErrorKind::Other, "No space left on device"));
		}
		data.extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

struct Broken;

impl Sink for Broken {
	fn name(&self) -> &str {
		"broken display"
	}

	fn accept(&mut self, _:&Sample) -> io::Result<()> {
		Err(io::Error::new(io::ErrorKind::BrokenPipe, "display gone"))
	}
}

// Presses "stop" once it has seen `after` samples.
struct StopAfter {
	after: u64,
	seen: u64,
	handle: StopHandle,
}

impl Sink for StopAfter {
	fn name(&self) -> &str {
		"stop button"
	}

	fn accept(&mut self, _:&Sample) -> io::Result<()> {
		self.seen += 1;
		if self.seen == self.after {
			self.handle.request_stop();
		}
		Ok(())
	}
}

#[test]
fn timeout_on_one_tick_skips_only_that_row() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("run.csv");

	let mut logger = Logger::new(ticks(5));
	let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(CsvSink::create(&path, Layout::Extended))];
	let sim = SimulatedMeter::steady(100.0, 4.0, 30.0).with_fault(3, Fault::Timeout);

	let summary = logger.run(|| Ok(meter(sim).with_extended(true)), &mut sinks).unwrap();
	assert_eq!(summary.ticks, 5);
	assert_eq!(summary.samples, 4);
	assert_eq!(summary.skipped, 1);
	assert_eq!(summary.reason, StopReason::SampleLimit);

	let text = fs::read_to_string(&path).unwrap();
	assert_eq!(text.lines().count(), 5);
	let counts: Vec<String> = data_rows(&path)
		.iter()
		.map(|row| row.split(',').nth(7).unwrap().to_owned())
		.collect();
	assert_eq!(counts, vec!["1", "2", "4", "5"]);
}

#[test]
fn malformed_response_skips_the_tick() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("run.csv");

	let mut logger = Logger::new(ticks(3));
	let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(CsvSink::create(&path, Layout::Basic))];
	let sim = SimulatedMeter::steady(10.0, 1.0, 30.0).with_fault(2, Fault::Garbage);

	let summary = logger.run(|| Ok(meter(sim)), &mut sinks).unwrap();
	assert_eq!((summary.samples, summary.skipped), (2, 1));
	assert_eq!(data_rows(&path).len(), 2);
}

#[test]
fn file_error_stops_the_run_and_releases_the_meter() {
	let data = Rc::new(RefCell::new(Vec::new()));
	let disk = FillingDisk { data: data.clone(), lines: 2 };
	let released = Rc::new(Cell::new(false));

	let mut logger = Logger::new(ticks(5));
	let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(CsvSink::from_writer("disk.csv", disk, Layout::Basic))];
	let tracked = Tracked { inner: meter(SimulatedMeter::steady(100.0, 4.0, 30.0)), released: released.clone() };

	let err = logger.run(|| Ok(tracked), &mut sinks).unwrap_err();
	assert!(matches!(err, Error::File { .. }), "{:?}", err);
	assert_eq!(logger.state(), State::Stopped);
	assert!(released.get());

	let text = String::from_utf8(data.borrow().clone()).unwrap();
	// Header plus the first tick; the second tick hit the full disk
	assert_eq!(text.lines().count(), 2);
}

#[test]
fn connection_failure_never_opens_the_file() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("run.csv");

	let mut logger = Logger::new(ticks(5));
	let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(CsvSink::create(&path, Layout::Basic))];

	let result = logger.run(
		|| -> bird4480::Result<Bird4480A<SimulatedMeter>> {
			Err(Error::Connection {
				resource: "USB0::0x1422::0x4480::152256401::INSTR".into(),
				source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
			})
		},
		&mut sinks,
	);
	assert!(matches!(result, Err(Error::Connection { .. })));
	assert_eq!(logger.state(), State::Stopped);
	assert!(!path.exists());
}

#[test]
fn unopenable_file_releases_the_meter() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("missing").join("run.csv");
	let released = Rc::new(Cell::new(false));

	let mut logger = Logger::new(ticks(5));
	let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(CsvSink::create(&path, Layout::Basic))];
	let tracked = Tracked { inner: meter(SimulatedMeter::steady(1.0, 0.0, 20.0)), released: released.clone() };

	assert!(matches!(logger.run(|| Ok(tracked), &mut sinks), Err(Error::File { .. })));
	assert!(released.get());
	assert_eq!(logger.state(), State::Stopped);
}

#[test]
fn a_session_runs_once() {
	let mut logger = Logger::new(ticks(1));
	let mut sinks: Vec<Box<dyn Sink>> = vec![];
	logger.run(|| Ok(meter(SimulatedMeter::steady(1.0, 0.0, 20.0))), &mut sinks).unwrap();

	let again = logger.run(|| Ok(meter(SimulatedMeter::steady(1.0, 0.0, 20.0))), &mut sinks);
	assert!(matches!(again, Err(Error::AlreadyRun)));
}

#[test]
fn display_failure_is_not_fatal() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("run.csv");

	let mut logger = Logger::new(ticks(3));
	let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(Broken), Box::new(CsvSink::create(&path, Layout::Basic))];

	let summary = logger.run(|| Ok(meter(SimulatedMeter::steady(5.0, 0.5, 20.0))), &mut sinks).unwrap();
	assert_eq!(summary.samples, 3);
	assert_eq!(data_rows(&path).len(), 3);
}

#[test]
fn stop_request_ends_the_run_between_ticks() {
	let mut logger = Logger::new(Schedule { max_ticks: None, ..ticks(0) });
	let stop = StopAfter { after: 2, seen: 0, handle: logger.stop_handle() };
	let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(stop)];

	let summary = logger.run(|| Ok(meter(SimulatedMeter::steady(5.0, 0.5, 20.0))), &mut sinks).unwrap();
	assert_eq!(summary.reason, StopReason::Cancelled);
	assert_eq!(summary.samples, 2);
}

#[test]
fn duration_bound_ends_the_run() {
	let schedule = Schedule {
		interval: Duration::from_millis(10),
		duration: Some(Duration::from_millis(45)),
		max_ticks: None,
	};
	let mut logger = Logger::new(schedule);
	let mut sinks: Vec<Box<dyn Sink>> = vec![];

	let summary = logger.run(|| Ok(meter(SimulatedMeter::steady(5.0, 0.5, 20.0))), &mut sinks).unwrap();
	assert_eq!(summary.reason, StopReason::DurationElapsed);
	assert!(summary.samples >= 1 && summary.samples <= 6, "{:?}", summary);
}

#[test]
fn degenerate_powers_reach_the_file_as_sentinels() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("run.csv");

	let mut logger = Logger::new(ticks(1));
	let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(CsvSink::create(&path, Layout::Basic))];
	logger.run(|| Ok(meter(SimulatedMeter::steady(50.0, 0.0, 21.5))), &mut sinks).unwrap();

	let rows = data_rows(&path);
	let fields: Vec<&str> = rows[0].split(',').collect();
	assert_eq!(&fields[1..], &["50", "0", "21.5", "1.00", "undefined"]);
}

#[test]
fn typical_mismatch_in_the_file() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("run.csv");

	let mut logger = Logger::new(ticks(1));
	let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(CsvSink::create(&path, Layout::Basic))];
	logger.run(|| Ok(meter(SimulatedMeter::steady(100.0, 4.0, 30.0))), &mut sinks).unwrap();

	let rows = data_rows(&path);
	assert!(rows[0].ends_with(",1.50,13.98"), "{}", rows[0]);
}

#[test]
fn last_tick_does_not_wait_out_its_interval() {
	let schedule = Schedule { interval: Duration::from_millis(300), duration: None, max_ticks: Some(2) };
	let mut logger = Logger::new(schedule);
	let mut sinks: Vec<Box<dyn Sink>> = vec![];

	let t0 = std::time::Instant::now();
	let summary = logger.run(|| Ok(meter(SimulatedMeter::steady(5.0, 0.5, 20.0))), &mut sinks).unwrap();
	// Ticks at 0 and 300 ms; a third wait would push this past 600 ms
	assert_eq!(summary.samples, 2);
	assert!(t0.elapsed() < Duration::from_millis(550), "{:?}", t0.elapsed());
}
