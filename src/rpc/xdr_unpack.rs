use std::io::{self, Error, ErrorKind};

use crate::xdr::Unpacker;
use crate::rpc::{REPLY, MSG_DENIED, RPC_MISMATCH, AUTH_ERROR, MSG_ACCEPTED, PROG_UNAVAIL, PROG_MISMATCH, PROC_UNAVAIL, GARBAGE_ARGS, SUCCESS};

fn err(msg:&str) -> io::Error { Error::new(ErrorKind::Other, msg) }

pub fn unpack_auth(unpacker:&mut Unpacker) -> io::Result<(i32, Vec<u8>)> {
	let flavor:i32    = unpacker.unpack_enum()?;
	let stuff:Vec<u8> = unpacker.unpack_variable_len_opaque()?;
	Ok((flavor, stuff))
}

// Consumes the reply header and returns the xid so the caller can match it against the call
pub fn unpack_replyheader(unpacker:&mut Unpacker) -> io::Result<u32> {
	let xid:u32 = unpacker.unpack_u32()?;

	if unpacker.unpack_enum()? != REPLY { return Err(err("Expected REPLY message type in RPC header")); }

	match unpacker.unpack_enum()? {
		MSG_DENIED => {
			return match unpacker.unpack_enum()? {
				RPC_MISMATCH => Err(err("RPC message denied: version mismatch")),
				AUTH_ERROR   => Err(err("RPC message denied: authentication error")),
				_            => Err(err("RPC message denied for an unknown reason")),
			};
		},
		MSG_ACCEPTED => { },
		_            => return Err(err("Neither MSG_DENIED nor MSG_ACCEPTED in RPC header")),
	}

	let _verf = unpack_auth(unpacker)?;

	match unpacker.unpack_enum()? {
		SUCCESS       => Ok(xid),
		PROG_UNAVAIL  => Err(err("RPC program unavailable")),
		PROG_MISMATCH => Err(err("RPC program version mismatch")),
		PROC_UNAVAIL  => Err(err("RPC procedure unavailable")),
		GARBAGE_ARGS  => Err(err("RPC server could not decode arguments")),
		_             => Err(err("RPC call failed for an unknown reason")),
	}
}
