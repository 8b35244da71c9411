
// Instrument links.  Everything above this module talks SCPI text through `Transport`; the
// resource string decides which wire carries it.

use std::fmt;
use std::io::{self, BufRead, BufReader, Error, ErrorKind, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use lazy_static::lazy_static;
use log::{debug, trace};
use regex::Regex;

use crate::rpc::tcp_clients::connect_stream;
use crate::sim::SimulatedMeter;
use crate::vxi11::{self, CoreClient};

lazy_static! {
	static ref TCPIP_INSTR_RE: Regex  = Regex::new(r"(?i)^TCPIP\d*::([^:]+)(?:::([^:]+))?::INSTR$").unwrap();
	static ref TCPIP_SOCKET_RE: Regex = Regex::new(r"(?i)^TCPIP\d*::([^:]+)::(\d+)::SOCKET$").unwrap();
	static ref USB_INSTR_RE: Regex    = Regex::new(r"(?i)^USB\d*::(0x[0-9a-f]+|\d+)::(0x[0-9a-f]+|\d+)::([^:]+)(?:::\d+)?::INSTR$").unwrap();
	static ref SIM_RE: Regex          = Regex::new(r"(?i)^SIM(?:::.*)?$").unwrap();
}

pub trait Transport {
	fn write(&mut self, cmd:&str) -> io::Result<()>;

	// One response, terminator left in place
	fn read(&mut self) -> io::Result<String>;

	fn query(&mut self, cmd:&str) -> io::Result<String> {
		self.write(cmd)?;
		self.read()
	}

	// Throws away anything still in flight so the next query gets its own answer.  Called after
	// a failed exchange.
	fn clear(&mut self) -> io::Result<()> { Ok(()) }

	// Must be safe to call more than once
	fn close(&mut self) -> io::Result<()> { Ok(()) }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
	fn write(&mut self, cmd:&str) -> io::Result<()> { (**self).write(cmd) }
	fn read(&mut self) -> io::Result<String> { (**self).read() }
	fn query(&mut self, cmd:&str) -> io::Result<String> { (**self).query(cmd) }
	fn clear(&mut self) -> io::Result<()> { (**self).clear() }
	fn close(&mut self) -> io::Result<()> { (**self).close() }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
	Vxi11 { host: String, device: String },
	Socket { host: String, port: u16 },
	Usb { vendor_id: u16, product_id: u16, serial: String },
	Simulated,
}

fn parse_u16(s:&str) -> Option<u16> {
	let lower = s.to_ascii_lowercase();
	match lower.strip_prefix("0x") {
		Some(hex) => u16::from_str_radix(hex, 16).ok(),
		None      => lower.parse::<u16>().ok(),
	}
}

impl Resource {

	pub fn parse(s:&str) -> io::Result<Resource> {
		let s = s.trim();
		let bad = || Error::new(ErrorKind::InvalidInput, format!("Unrecognised resource string '{}'", s));

		if SIM_RE.is_match(s) {
			return Ok(Resource::Simulated);
		}
		if let Some(caps) = TCPIP_SOCKET_RE.captures(s) {
			let port = caps[2].parse::<u16>().map_err(|_| bad())?;
			return Ok(Resource::Socket { host: caps[1].to_owned(), port });
		}
		if let Some(caps) = TCPIP_INSTR_RE.captures(s) {
			let device = caps.get(2).map(|m| m.as_str()).unwrap_or(vxi11::DEFAULT_DEVICE);
			return Ok(Resource::Vxi11 { host: caps[1].to_owned(), device: device.to_owned() });
		}
		if let Some(caps) = USB_INSTR_RE.captures(s) {
			let vendor_id = parse_u16(&caps[1]).ok_or_else(bad)?;
			let product_id = parse_u16(&caps[2]).ok_or_else(bad)?;
			return Ok(Resource::Usb { vendor_id, product_id, serial: caps[3].to_owned() });
		}
		Err(bad())
	}

}

impl fmt::Display for Resource {
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Resource::Vxi11 { host, device } => write!(f, "TCPIP0::{}::{}::INSTR", host, device),
			Resource::Socket { host, port }  => write!(f, "TCPIP0::{}::{}::SOCKET", host, port),
			Resource::Usb { vendor_id, product_id, serial } => write!(f, "USB0::{:#06x}::{:#06x}::{}::INSTR", vendor_id, product_id, serial),
			Resource::Simulated => write!(f, "SIM"),
		}
	}
}

// Raw SCPI over a TCP socket, newline terminated in both directions.  A raw socket has no way to
// abort a reply that is still on its way, so `clear` drops the connection and dials again.
pub struct SocketClient {
	host: String,
	port: u16,
	timeout: Duration,
	reader: Option<BufReader<TcpStream>>,
}

impl SocketClient {

	pub fn connect(host:&str, port:u16, timeout:Duration) -> io::Result<Self> {
		let stream = connect_stream((host, port), timeout)?;
		Ok(SocketClient { host: host.to_owned(), port, timeout, reader: Some(BufReader::new(stream)) })
	}

	fn reader(&mut self) -> io::Result<&mut BufReader<TcpStream>> {
		self.reader.as_mut().ok_or_else(|| Error::new(ErrorKind::NotConnected, "Socket link is closed"))
	}

}

impl Transport for SocketClient {

	fn write(&mut self, cmd:&str) -> io::Result<()> {
		trace!("socket >> {}", cmd);
		let stream = self.reader()?.get_mut();
		stream.write_all(cmd.as_bytes())?;
		stream.write_all(b"\n")?;
		stream.flush()
	}

	fn read(&mut self) -> io::Result<String> {
		let mut line = String::new();
		match self.reader()?.read_line(&mut line) {
			Ok(0) => Err(Error::new(ErrorKind::UnexpectedEof, "Instrument closed the connection")),
			Ok(_) => {
				trace!("socket << {}", line.trim_end());
				Ok(line)
			},
			// Unix reports an expired read timeout as WouldBlock
			Err(ref e) if e.kind() == ErrorKind::WouldBlock => Err(Error::new(ErrorKind::TimedOut, "I/O timeout")),
			Err(e) => Err(e),
		}
	}

	fn clear(&mut self) -> io::Result<()> {
		if let Some(old) = self.reader.take() {
			let _ = old.get_ref().shutdown(Shutdown::Both);
		}
		debug!("Reconnecting to {}:{} to discard a stale reply", self.host, self.port);
		let stream = connect_stream((self.host.as_str(), self.port), self.timeout)?;
		self.reader = Some(BufReader::new(stream));
		Ok(())
	}

	fn close(&mut self) -> io::Result<()> {
		match self.reader.take() {
			Some(r) => match r.get_ref().shutdown(Shutdown::Both) {
				Err(ref e) if e.kind() == ErrorKind::NotConnected => Ok(()),
				other => other,
			},
			None => Ok(()),
		}
	}

}

#[cfg(feature = "visa")]
mod visa {
	use std::ffi::CString;
	use std::io::{self, BufRead, BufReader, Error, ErrorKind, Write};
	use std::time::Duration;

	use log::trace;
	use visa_rs::attribute::{AttrTmoValue, HasAttribute};
	use visa_rs::prelude::*;

	use super::Transport;

	fn visa_err(e:visa_rs::Error) -> io::Error { Error::new(ErrorKind::Other, format!("VISA: {}", e)) }

	pub struct VisaClient {
		// Declared first so the session closes before the resource manager
		instr: Option<Instrument>,
		_rm: DefaultRM,
	}

	impl VisaClient {

		pub fn open(resource:&str, timeout:Duration) -> io::Result<Self> {
			let rm = DefaultRM::new().map_err(visa_err)?;
			let rsc = CString::new(resource).map_err(|e| Error::new(ErrorKind::InvalidInput, e))?;
			let instr = rm.open(&rsc.into(), AccessMode::NO_LOCK, timeout).map_err(visa_err)?;

			// The open timeout above only covers opening; reads and writes have their own
			let ms = timeout.as_millis().min(u32::MAX as u128) as u32;
			let tmo = AttrTmoValue::new_checked(ms)
				.ok_or_else(|| Error::new(ErrorKind::InvalidInput, format!("{} ms is not a usable VISA timeout", ms)))?;
			instr.set_attr(tmo).map_err(visa_err)?;

			Ok(VisaClient { instr: Some(instr), _rm: rm })
		}

		fn instr(&self) -> io::Result<&Instrument> {
			self.instr.as_ref().ok_or_else(|| Error::new(ErrorKind::NotConnected, "VISA session already closed"))
		}

	}

	impl Transport for VisaClient {

		fn write(&mut self, cmd:&str) -> io::Result<()> {
			trace!("visa >> {}", cmd);
			let mut instr = self.instr()?;
			instr.write_all(cmd.as_bytes())?;
			instr.write_all(b"\n")
		}

		fn read(&mut self) -> io::Result<String> {
			let mut line = String::new();
			BufReader::new(self.instr()?).read_line(&mut line)?;
			trace!("visa << {}", line.trim_end());
			Ok(line)
		}

		// viClear: flushes the device's output queue and the session buffers
		fn clear(&mut self) -> io::Result<()> {
			self.instr()?.clear().map_err(visa_err)
		}

		fn close(&mut self) -> io::Result<()> {
			// Dropping the instrument closes the VISA session
			self.instr.take();
			Ok(())
		}

	}
}

pub fn open(resource:&str, timeout:Duration) -> io::Result<Box<dyn Transport>> {
	let parsed = Resource::parse(resource)?;
	debug!("Opening {} ({:?})", resource, parsed);

	match parsed {
		Resource::Simulated => Ok(Box::new(SimulatedMeter::default())),
		#[cfg(feature = "visa")]
		_ => Ok(Box::new(visa::VisaClient::open(resource, timeout)?)),
		#[cfg(not(feature = "visa"))]
		Resource::Vxi11 { host, device } => {
			let mut core = CoreClient::new(&host, timeout)?;
			core.create_link(&device)?;
			Ok(Box::new(core))
		},
		#[cfg(not(feature = "visa"))]
		Resource::Socket { host, port } => Ok(Box::new(SocketClient::connect(&host, port, timeout)?)),
		#[cfg(not(feature = "visa"))]
		Resource::Usb { .. } => Err(Error::new(ErrorKind::Unsupported,
			format!("{} is a USB resource; rebuild with the `visa` feature to reach it", resource))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::TcpListener;
	use std::thread;

	#[test]
	fn parses_the_4480_usb_resource() {
		let r = Resource::parse("USB0::0x1422::0x4480::152256401::INSTR").unwrap();
		assert_eq!(r, Resource::Usb { vendor_id: 0x1422, product_id: 0x4480, serial: "152256401".into() });
	}

	#[test]
	fn parses_lan_resources() {
		assert_eq!(
			Resource::parse("TCPIP0::192.168.2.4::INSTR").unwrap(),
			Resource::Vxi11 { host: "192.168.2.4".into(), device: "inst0".into() }
		);
		assert_eq!(
			Resource::parse("TCPIP::meter.local::gpib0,5::INSTR").unwrap(),
			Resource::Vxi11 { host: "meter.local".into(), device: "gpib0,5".into() }
		);
		assert_eq!(
			Resource::parse("tcpip0::10.0.0.7::5025::socket").unwrap(),
			Resource::Socket { host: "10.0.0.7".into(), port: 5025 }
		);
	}

	#[test]
	fn parses_simulated() {
		assert_eq!(Resource::parse("SIM").unwrap(), Resource::Simulated);
		assert_eq!(Resource::parse("sim::4480").unwrap(), Resource::Simulated);
	}

	#[test]
	fn rejects_garbage() {
		assert!(Resource::parse("GPIB0::12").is_err());
		assert!(Resource::parse("TCPIP0::host::99999::SOCKET").is_err());
	}

	#[test]
	fn display_round_trips() {
		let r = Resource::Usb { vendor_id: 0x1422, product_id: 0x4480, serial: "152256401".into() };
		assert_eq!(Resource::parse(&r.to_string()).unwrap(), r);
	}

	#[test]
	fn open_simulated_answers_idn() {
		let mut t = open("SIM", Duration::from_millis(100)).unwrap();
		assert!(t.query("*IDN?").unwrap().contains("4480"));
		t.close().unwrap();
	}

	#[cfg(not(feature = "visa"))]
	#[test]
	fn usb_without_visa_is_unsupported() {
		let e = open("USB0::0x1422::0x4480::152256401::INSTR", Duration::from_millis(100)).err().unwrap();
		assert_eq!(e.kind(), ErrorKind::Unsupported);
	}

	// Serves one connection per entry in `scripts`; each script is the list of replies to send,
	// in order, one per received line.  `None` means stay silent for that line.
	fn line_server(scripts:Vec<Vec<Option<&'static str>>>) -> (u16, thread::JoinHandle<Vec<String>>) {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let port = listener.local_addr().unwrap().port();
		let handle = thread::spawn(move || {
			let mut received = vec![];
			for script in scripts {
				let (stream, _) = listener.accept().unwrap();
				let mut reader = BufReader::new(stream.try_clone().unwrap());
				let mut out = stream;
				for reply in script {
					let mut line = String::new();
					if reader.read_line(&mut line).unwrap_or(0) == 0 { break; }
					received.push(line.trim_end().to_owned());
					if let Some(r) = reply {
						if out.write_all(format!("{}\n", r).as_bytes()).is_err() { break; }
					}
				}
				// Hold the connection open until the client lets go of it
				let mut rest = String::new();
				while reader.read_line(&mut rest).unwrap_or(0) > 0 { rest.clear(); }
			}
			received
		});
		(port, handle)
	}

	#[test]
	fn socket_link_queries_line_by_line() {
		let (port, server) = line_server(vec![vec![Some("Bird Technologies,4480A,1,1.0"), None, Some("12.5")]]);
		let mut link = SocketClient::connect("127.0.0.1", port, Duration::from_secs(2)).unwrap();

		assert_eq!(link.query("*IDN?").unwrap(), "Bird Technologies,4480A,1,1.0\n");
		link.write("*CLS").unwrap();
		assert_eq!(link.query("FETC:FORW?").unwrap(), "12.5\n");
		link.close().unwrap();
		link.close().unwrap();
		assert_eq!(link.write("*IDN?").unwrap_err().kind(), ErrorKind::NotConnected);

		assert_eq!(server.join().unwrap(), vec!["*IDN?", "*CLS", "FETC:FORW?"]);
	}

	#[test]
	fn socket_timeout_is_reported_as_timed_out() {
		let (port, server) = line_server(vec![vec![None]]);
		let mut link = SocketClient::connect("127.0.0.1", port, Duration::from_millis(100)).unwrap();
		assert_eq!(link.query("FETC:REFL?").unwrap_err().kind(), ErrorKind::TimedOut);
		link.close().unwrap();
		server.join().unwrap();
	}

	#[test]
	fn clear_starts_a_fresh_connection() {
		let (port, server) = line_server(vec![vec![None], vec![Some("4.0")]]);
		let mut link = SocketClient::connect("127.0.0.1", port, Duration::from_millis(200)).unwrap();

		assert!(link.query("FETC:REFL?").is_err());
		link.clear().unwrap();
		assert_eq!(link.query("FETC:REFL?").unwrap(), "4.0\n");
		link.close().unwrap();
		assert_eq!(server.join().unwrap().len(), 2);
	}

	#[test]
	fn refused_connection_is_an_error() {
		let port = {
			let l = TcpListener::bind("127.0.0.1:0").unwrap();
			l.local_addr().unwrap().port()
		};
		assert!(SocketClient::connect("127.0.0.1", port, Duration::from_millis(200)).is_err());
	}
}
