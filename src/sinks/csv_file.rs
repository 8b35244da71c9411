
use std::fs::{File, OpenOptions};
use std::io::{self, Error, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::debug;
use serde::{Deserialize, Serialize};

use super::Sink;
use crate::metrics::Metric;
use crate::sample::Sample;

pub const TIMESTAMP_FORMAT:&str = "%Y-%m-%d %H:%M:%S";

const BASIC_COLUMNS:[&str; 6] = [
	"timestamp",
	"forward_power_W",
	"reflected_power_W",
	"temperature",
	"vswr",
	"return_loss_dB",
];

const EXTENDED_COLUMNS:[&str; 9] = [
	"elapsed_s",
	"count",
	"band",
	"forward_power_dBm",
	"reflected_power_dBm",
	"test_time_ms",
	"uptime",
	"meter_vswr",
	"meter_return_loss_dB",
];

// Extended rows start with the basic columns so both layouts read the same way up front
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
	Basic,
	Extended,
}

fn opt_metric(m:Option<Metric>) -> String {
	m.map(|m| m.to_string()).unwrap_or_default()
}

impl Layout {

	pub fn header(self) -> Vec<&'static str> {
		let mut cols = BASIC_COLUMNS.to_vec();
		if self == Layout::Extended {
			cols.extend_from_slice(&EXTENDED_COLUMNS);
		}
		cols
	}

	// Powers and temperature go out at full precision so they read back exactly
	pub fn row(self, s:&Sample) -> Vec<String> {
		let mut row = vec![
			s.timestamp.format(TIMESTAMP_FORMAT).to_string(),
			s.forward_w.to_string(),
			s.reflected_w.to_string(),
			s.temperature_c.to_string(),
			s.vswr.to_string(),
			s.return_loss_db.to_string(),
		];
		if self == Layout::Extended {
			row.push(format!("{:.3}", s.elapsed.as_secs_f64()));
			row.push(s.count.to_string());
			row.push(s.band.map(|b| b.label().to_owned()).unwrap_or_default());
			row.push(s.forward_dbm.to_string());
			row.push(s.reflected_dbm.to_string());
			row.push(s.test_time_ms.map(|t| t.to_string()).unwrap_or_default());
			row.push(s.uptime().unwrap_or_default());
			row.push(opt_metric(s.meter_vswr));
			row.push(opt_metric(s.meter_return_loss_db));
		}
		row
	}

}

// <dir>/<prefix>_<YYYY-mm-dd_HH-MM-SS>.csv
pub fn timestamped_path(dir:&Path, prefix:&str, started:&DateTime<Local>) -> PathBuf {
	dir.join(format!("{}_{}.csv", prefix, started.format("%Y-%m-%d_%H-%M-%S")))
}

type Opener<W> = Box<dyn FnOnce() -> io::Result<W>>;

// The header goes out when the sink starts and every row is flushed before `accept` returns, so a
// failure loses at most the row being written
pub struct CsvSink<W: Write> {
	name: String,
	layout: Layout,
	opener: Option<Opener<W>>,
	writer: Option<csv::Writer<W>>,
	rows: u64,
}

impl CsvSink<File> {
	// Created on start, never over an existing file
	pub fn create<P: AsRef<Path>>(path:P, layout:Layout) -> Self {
		let path = path.as_ref().to_path_buf();
		let name = path.display().to_string();
		CsvSink::with_opener(name, layout, Box::new(move || OpenOptions::new().write(true).create_new(true).open(&path)))
	}
}

impl<W: Write + 'static> CsvSink<W> {
	pub fn from_writer(name:&str, writer:W, layout:Layout) -> Self {
		CsvSink::with_opener(name.to_owned(), layout, Box::new(move || Ok(writer)))
	}
}

impl<W: Write> CsvSink<W> {

	fn with_opener(name:String, layout:Layout, opener:Opener<W>) -> Self {
		CsvSink { name, layout, opener: Some(opener), writer: None, rows: 0 }
	}

	pub fn rows_written(&self) -> u64 { self.rows }

	fn writer(&mut self) -> io::Result<&mut csv::Writer<W>> {
		self.writer.as_mut().ok_or_else(|| Error::new(ErrorKind::NotConnected, "data file is not open"))
	}

}

impl<W: Write> Sink for CsvSink<W> {

	fn name(&self) -> &str { &self.name }

	fn critical(&self) -> bool { true }

	fn start(&mut self) -> io::Result<()> {
		let opener = self.opener.take().ok_or_else(|| Error::new(ErrorKind::Other, "data file already opened"))?;
		let mut wtr = csv::Writer::from_writer(opener()?);
		wtr.write_record(self.layout.header())?;
		wtr.flush()?;
		self.writer = Some(wtr);
		debug!("Opened data file {}", self.name);
		Ok(())
	}

	fn accept(&mut self, sample:&Sample) -> io::Result<()> {
		let row = self.layout.row(sample);
		let wtr = self.writer()?;
		wtr.write_record(&row)?;
		wtr.flush()?;
		self.rows += 1;
		Ok(())
	}

	fn finish(&mut self) -> io::Result<()> {
		match self.writer.take() {
			Some(mut wtr) => {
				debug!("Closing data file {} after {} rows", self.name, self.rows);
				wtr.flush()
			},
			None => Ok(()),
		}
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sample::{Band, Reading};
	use chrono::TimeZone;
	use std::cell::RefCell;
	use std::rc::Rc;
	use std::time::Duration;

	#[derive(Clone, Default)]
	struct Shared(Rc<RefCell<Vec<u8>>>);

	impl Write for Shared {
		fn write(&mut self, buf:&[u8]) -> io::Result<usize> {
			self.0.borrow_mut().extend_from_slice(buf);
			Ok(buf.len())
		}

		fn flush(&mut self) -> io::Result<()> { Ok(()) }
	}

	fn sample(fwd:f64, refl:f64) -> Sample {
		let ts = Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
		let mut r = Reading::new(fwd, refl, 30.25);
		r.band = Some(Band::High);
		r.uptime_ms = Some(3_723_000);
		r.test_time_ms = Some(41);
		r.meter_vswr = Some(Metric::Value(1.5));
		Sample::compute(&r, 7, ts, Duration::from_millis(6_500))
	}

	#[test]
	fn header_is_written_on_start() {
		let buf = Shared::default();
		let mut sink = CsvSink::from_writer("mem", buf.clone(), Layout::Basic);
		sink.start().unwrap();
		assert_eq!(
			String::from_utf8(buf.0.borrow().clone()).unwrap(),
			"timestamp,forward_power_W,reflected_power_W,temperature,vswr,return_loss_dB\n"
		);
	}

	#[test]
	fn basic_row() {
		let buf = Shared::default();
		let mut sink = CsvSink::from_writer("mem", buf.clone(), Layout::Basic);
		sink.start().unwrap();
		sink.accept(&sample(50.0, 0.0)).unwrap();
		sink.finish().unwrap();

		let text = String::from_utf8(buf.0.borrow().clone()).unwrap();
		let last = text.lines().last().unwrap();
		assert_eq!(last, "2025-01-02 03:04:05,50,0,30.25,1.00,undefined");
		assert_eq!(sink.rows_written(), 1);
	}

	#[test]
	fn extended_row() {
		let row = Layout::Extended.row(&sample(100.0, 4.0));
		assert_eq!(row.len(), Layout::Extended.header().len());
		assert_eq!(
			&row[6..],
			&["6.500", "7", "High Band 25 to 1000 MHz", "50.00", "36.02", "41", "01:02:03", "1.50", "13.98"]
		);
	}

	#[test]
	fn extended_row_without_optional_fields() {
		let ts = Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
		let s = Sample::compute(&Reading::new(1.0, 0.0, 20.0), 1, ts, Duration::ZERO);
		let row = Layout::Extended.row(&s);
		assert_eq!(&row[8..], &["", "30.00", "undefined", "", "", "", ""]);
	}

	#[test]
	fn persisted_fields_round_trip() {
		let buf = Shared::default();
		let mut sink = CsvSink::from_writer("mem", buf.clone(), Layout::Extended);
		sink.start().unwrap();
		let written = vec![sample(100.0, 4.0), sample(0.12, 0.01), sample(1234.56, 78.9)];
		for s in &written {
			sink.accept(s).unwrap();
		}

		let data = buf.0.borrow().clone();
		let mut rdr = csv::Reader::from_reader(data.as_slice());
		let rows:Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
		assert_eq!(rows.len(), written.len());
		for (row, s) in rows.iter().zip(&written) {
			assert_eq!(row[1].parse::<f64>().unwrap(), s.forward_w);
			assert_eq!(row[2].parse::<f64>().unwrap(), s.reflected_w);
			assert_eq!(row[3].parse::<f64>().unwrap(), s.temperature_c);
			assert_eq!(Metric::parse(&row[5]).unwrap().to_string(), s.return_loss_db.to_string());
		}
	}

	#[test]
	fn accept_before_start_fails() {
		let mut sink = CsvSink::from_writer("mem", Shared::default(), Layout::Basic);
		assert!(sink.accept(&sample(1.0, 0.0)).is_err());
		assert!(sink.critical());
	}

	#[test]
	fn file_is_not_clobbered() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("run.csv");
		std::fs::write(&path, "keep me\n").unwrap();

		let mut sink = CsvSink::create(&path, Layout::Basic);
		assert_eq!(sink.start().unwrap_err().kind(), ErrorKind::AlreadyExists);
		assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me\n");
	}

	#[test]
	fn timestamped_file_name() {
		let ts = Local.with_ymd_and_hms(2025, 6, 7, 8, 9, 10).unwrap();
		let p = timestamped_path(Path::new("/tmp/logs"), "rf_power_data", &ts);
		assert_eq!(p, PathBuf::from("/tmp/logs/rf_power_data_2025-06-07_08-09-10.csv"));
	}
}
