
use std::io::{self, Read, Write, Error, ErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt, ReadBytesExt};
use log::trace;

use crate::xdr;
use super::xdr_pack;
use super::xdr_unpack;

const LAST_FRAGMENT:u32 = 0x80000000;

// One RPC program/version bound to one TCP connection.  Calls are strictly sequential: build the
// arguments into `packer` after `start_call`, then `do_call` leaves the reply body in `unpacker`.
pub struct TcpClient {
	pub stream: TcpStream,
	pub prog: u32,
	pub vers: u32,
	pub lastxid: u32,
	pub packer: xdr::Packer,
	pub unpacker: xdr::Unpacker,
}

pub fn connect_stream<A: ToSocketAddrs>(addr: A, timeout: Duration) -> io::Result<TcpStream> {
	let mut last_err = Error::new(ErrorKind::NotFound, "Address did not resolve to anything");
	for sock_addr in addr.to_socket_addrs()? {
		match TcpStream::connect_timeout(&sock_addr, timeout) {
			Ok(stream) => {
				stream.set_read_timeout(Some(timeout))?;
				stream.set_write_timeout(Some(timeout))?;
				stream.set_nodelay(true)?;
				return Ok(stream);
			},
			Err(e) => last_err = e,
		}
	}
	Err(last_err)
}

impl TcpClient {

	pub fn connect<A: ToSocketAddrs>(addr: A, prog: u32, vers: u32, timeout: Duration) -> io::Result<Self> {
		let stream = connect_stream(addr, timeout)?;
		Ok(Self{ stream, prog, vers, lastxid: 0, packer: xdr::Packer::new(), unpacker: xdr::Unpacker::new() })
	}

	pub fn start_call(&mut self, prc:u32) -> io::Result<()> {
		self.lastxid = self.lastxid.wrapping_add(1);
		self.packer.reset();
		xdr_pack::pack_callheader_no_auth(&mut self.packer, self.lastxid, self.prog, self.vers, prc)
	}

	pub fn do_call(&mut self) -> io::Result<()> {
		// Record marking: a single fragment with the last-fragment bit set
		let call:&[u8] = self.packer.as_bytes();
		let mut send_bytes:Vec<u8> = Vec::with_capacity(call.len() + 4);
		send_bytes.write_u32::<BigEndian>(call.len() as u32 | LAST_FRAGMENT)?;
		send_bytes.extend_from_slice(call);
		self.stream.write_all(&send_bytes)?;
		trace!("rpc call xid={} prog={:#x} len={}", self.lastxid, self.prog, call.len());

		loop {
			let reply:Vec<u8> = self.read_record()?;

			self.unpacker.reset(&reply);
			let xid = xdr_unpack::unpack_replyheader(&mut self.unpacker)?;

			if xid == self.lastxid {
				return Ok(());
			} else if xid < self.lastxid {
				// Stale reply to a call that already timed out on our side
				continue;
			} else {
				return Err(Error::new(ErrorKind::Other, "Received an RPC reply for a call that hasn't been made"));
			}
		}
	}

	fn read_record(&mut self) -> io::Result<Vec<u8>> {
		let mut reply:Vec<u8> = vec![];

		let mut last:bool = false;
		while !last {
			let x:u32 = self.stream.read_u32::<BigEndian>()?;

			last = (x & LAST_FRAGMENT) != 0;
			let n = (x & !LAST_FRAGMENT) as usize;

			let start = reply.len();
			reply.resize(start + n, 0);
			self.stream.read_exact(&mut reply[start..])?;
		}

		Ok(reply)
	}

}
