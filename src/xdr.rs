
// XDR encoding for the RPC calls that carry SCPI traffic over VXI-11.  Everything on the wire is a
// multiple of four bytes, big-endian.

use std::io::{self, Cursor, Error, ErrorKind};

use byteorder::{BigEndian, WriteBytesExt, ReadBytesExt};

#[derive(Default)]
pub struct Packer {
	buff: Vec<u8>,
}

#[derive(Default)]
pub struct Unpacker {
	buff: Vec<u8>,
	pos: usize,
}

fn err(msg:&str) -> io::Error { Error::new(ErrorKind::Other, msg) }

impl Packer {

	pub fn new() -> Self { Self::default() }

	pub fn reset(&mut self) { self.buff.clear(); }

	pub fn as_bytes(&self) -> &[u8] { &self.buff }

	pub fn pack_u32(&mut self, x:u32) -> io::Result<()> { self.buff.write_u32::<BigEndian>(x) }
	pub fn pack_i32(&mut self, x:i32) -> io::Result<()> { self.buff.write_i32::<BigEndian>(x) }

	pub fn pack_bool(&mut self, b:bool) -> io::Result<()> { self.pack_i32(if b { 1 } else { 0 }) }

	pub fn pack_enum(&mut self, x:i32) -> io::Result<()> { self.pack_i32(x) }

	pub fn pack_variable_len_opaque(&mut self, data:&[u8]) -> io::Result<()> {
		self.pack_u32(data.len() as u32)?;
		self.buff.extend_from_slice(data);

		// Pad back to a four byte boundary
		while self.buff.len() % 4 != 0 { self.buff.push(0); }
		Ok(())
	}

}

impl Unpacker {

	pub fn new() -> Self { Self::default() }

	pub fn reset(&mut self, data:&[u8]) {
		self.buff.clear();
		self.buff.extend_from_slice(data);
		self.pos = 0;
	}

	pub fn all_data_consumed(&self) -> bool { self.pos >= self.buff.len() }

	fn remaining(&self) -> &[u8] { &self.buff[self.pos..] }

	fn advance(&mut self, n:usize) -> io::Result<()> {
		if self.pos + n > self.buff.len() {
			return Err(err("Tried to read past the end of the XDR buffer"));
		}
		self.pos += n;
		Ok(())
	}

	pub fn unpack_u32(&mut self) -> io::Result<u32> {
		let ans:u32 = Cursor::new(self.remaining()).read_u32::<BigEndian>()?;
		self.advance(4)?;
		Ok(ans)
	}

	pub fn unpack_i32(&mut self) -> io::Result<i32> {
		let ans:i32 = Cursor::new(self.remaining()).read_i32::<BigEndian>()?;
		self.advance(4)?;
		Ok(ans)
	}

	// The set of legal values depends on the procedure, so checking is left to the caller
	pub fn unpack_enum(&mut self) -> io::Result<i32> { self.unpack_i32() }

	pub fn unpack_bool(&mut self) -> io::Result<bool> {
		match self.unpack_i32()? {
			0 => Ok(false),
			1 => Ok(true),
			_ => Err(err("Expected 0 or 1 for an XDR bool")),
		}
	}

	pub fn unpack_variable_len_opaque(&mut self) -> io::Result<Vec<u8>> {
		let n:usize = self.unpack_u32()? as usize;
		if n > self.remaining().len() {
			return Err(err("Opaque length runs past the end of the XDR buffer"));
		}
		let ans:Vec<u8> = self.remaining()[..n].to_vec();
		let padded = (n + 3) & !3;
		self.advance(padded.min(self.remaining().len()))?;
		Ok(ans)
	}

}
