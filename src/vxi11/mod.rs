
// Device core
pub const DEVICE_CORE_PROG:u32  = 0x0607af;
pub const DEVICE_CORE_VERS:u32  = 1;
pub const CREATE_LINK:u32       = 10;
pub const DEVICE_WRITE:u32      = 11;
pub const DEVICE_READ:u32       = 12;
pub const DEVICE_CLEAR:u32      = 15;
pub const DESTROY_LINK:u32      = 23;

pub const CLIENT_ID:i32 = 3333;
pub const DEFAULT_LOCK_TIMEOUT:u32 = 10000;
pub const DEFAULT_DEVICE:&str = "inst0";

pub const OPERATION_FLAGS_END_ONLY:i32 = 8;

// Reason bits in a device_read reply
pub const REASON_REQCNT:i32 = 1;
pub const REASON_CHR:i32    = 2;
pub const REASON_END:i32    = 4;

use std::io::{self, Error, ErrorKind};
use std::net::ToSocketAddrs;
use std::str;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::instrument::Transport;
use crate::rpc::port_mapping::{TcpPortMapperClient, Mapping};
use crate::rpc::tcp_clients::TcpClient;

fn err(msg:&str) -> io::Error { Error::new(ErrorKind::Other, msg) }

// Map a VXI-11 device_error code onto an io::Error so timeouts stay distinguishable
fn device_error(code:i32) -> io::Result<()> {
    match code {
        0  => Ok(()),
        1  => Err(err("Syntax error")),
        3  => Err(Error::new(ErrorKind::NotConnected, "Device not accessible")),
        4  => Err(err("Invalid link identifier")),
        5  => Err(err("Parameter error")),
        9  => Err(err("Out of resources")),
        11 => Err(err("Device locked by another link")),
        15 => Err(Error::new(ErrorKind::TimedOut, "I/O timeout")),
        17 => Err(err("I/O error")),
        21 => Err(err("Invalid address")),
        23 => Err(err("Abort")),
        _  => Err(err("Unknown error")),
    }
}

pub mod xdr_pack;

// The device reports its own I/O timeout (error 15); the socket waits a little longer so that
// reply still arrives
const RPC_MARGIN:Duration = Duration::from_secs(1);

pub struct CoreClient {
    client: TcpClient,
    opt_link: Option<Link>,
    io_timeout_ms: u32,
}

#[derive(Debug)]
pub struct Link {
    pub link_id: i32,
    pub abort_port: u32,
    pub max_recv_size: u32,
}

impl CoreClient {

    fn get_link(&self) -> io::Result<&Link> {
        self.opt_link.as_ref().ok_or_else(|| Error::new(ErrorKind::NotConnected, "No link"))
    }

    pub fn new(host:&str, timeout:Duration) -> io::Result<Self> {

        // Find the port to use for the core program
        let mut pmap_client = TcpPortMapperClient::new(host, timeout)?;

        let mapping = Mapping {
            program: DEVICE_CORE_PROG,
            version: DEVICE_CORE_VERS,
            port: 0,
        };

        let port = pmap_client.get_port(&mapping)?;
        debug!("VXI-11 core channel for {} on port {}", host, port);

        CoreClient::connect((host, port), timeout)
    }

    // Straight to a known core channel port, skipping the portmapper
    pub fn connect<A: ToSocketAddrs>(addr:A, timeout:Duration) -> io::Result<Self> {
        let client = TcpClient::connect(addr, DEVICE_CORE_PROG, DEVICE_CORE_VERS, timeout + RPC_MARGIN)?;
        let io_timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
        Ok(CoreClient { client, opt_link: None, io_timeout_ms })
    }

    pub fn create_link(&mut self, device:&str) -> io::Result<()> {
        if self.opt_link.is_some() {
            return Err(err("Already connected to a link"));
        }

        self.client.start_call(CREATE_LINK)?;
        xdr_pack::pack_create_link_parms(&mut self.client.packer, CLIENT_ID, false, DEFAULT_LOCK_TIMEOUT, device)?;
        self.client.do_call()?;

        let error:i32         = self.client.unpacker.unpack_i32()?;
        let link_id:i32       = self.client.unpacker.unpack_i32()?;
        let abort_port:u32    = self.client.unpacker.unpack_u32()?;
        let max_recv_size:u32 = self.client.unpacker.unpack_u32()?;

        device_error(error)?;

        self.opt_link = Some(Link{ link_id, abort_port, max_recv_size });
        debug!("VXI-11 link {:?}", self.opt_link);
        Ok(())
    }

    pub fn write(&mut self, data:&[u8]) -> io::Result<()> {
        let link = self.get_link()?;
        let link_id = link.link_id;
        if link.max_recv_size > 0 && data.len() > link.max_recv_size as usize {
            return Err(err("Command is larger than the device's maximum receive size"));
        }

        self.client.start_call(DEVICE_WRITE)?;
        xdr_pack::pack_device_write_parms(&mut self.client.packer, link_id, self.io_timeout_ms, DEFAULT_LOCK_TIMEOUT, OPERATION_FLAGS_END_ONLY, data)?;
        self.client.do_call()?;

        let error:i32 = self.client.unpacker.unpack_i32()?;
        let size:u32  = self.client.unpacker.unpack_u32()?;

        device_error(error)?;

        if size as usize != data.len() {
            return Err(err("Number of bytes in confirmation doesn't match number of bytes sent"));
        }
        Ok(())
    }

    pub fn read(&mut self) -> io::Result<Vec<u8>> {
        let link_id = self.get_link()?.link_id;
        let mut ans:Vec<u8> = vec![];

        // A response may arrive in several chunks; keep reading until END or the term char
        loop {
            self.client.start_call(DEVICE_READ)?;
            xdr_pack::pack_device_read_parms(&mut self.client.packer, link_id, u32::MAX, self.io_timeout_ms, DEFAULT_LOCK_TIMEOUT, 0, 0)?;
            self.client.do_call()?;

            let error:i32 = self.client.unpacker.unpack_i32()?;
            let reason:i32 = self.client.unpacker.unpack_i32()?;
            let mut data:Vec<u8> = self.client.unpacker.unpack_variable_len_opaque()?;

            device_error(error)?;
            ans.append(&mut data);

            if reason & (REASON_END | REASON_CHR) != 0 {
                return Ok(ans);
            } else if reason & REASON_REQCNT == 0 {
                return Err(err("Expected one of three reason bits to be set"));
            }
        }
    }

    // device_clear: the instrument drops its input and output buffers, including a reply that
    // missed its timeout
    pub fn device_clear(&mut self) -> io::Result<()> {
        let link_id = self.get_link()?.link_id;

        self.client.start_call(DEVICE_CLEAR)?;
        xdr_pack::pack_device_generic_parms(&mut self.client.packer, link_id, 0, DEFAULT_LOCK_TIMEOUT, self.io_timeout_ms)?;
        self.client.do_call()?;

        device_error(self.client.unpacker.unpack_i32()?)
    }

    pub fn destroy_link(&mut self) -> io::Result<()> {
        let link_id = self.get_link()?.link_id;

        self.client.start_call(DESTROY_LINK)?;
        xdr_pack::pack_device_link(&mut self.client.packer, link_id)?;
        self.client.do_call()?;

        self.opt_link = None;
        device_error(self.client.unpacker.unpack_i32()?)
    }

    pub fn has_link(&self) -> bool { self.opt_link.is_some() }

}

impl Transport for CoreClient {

    fn write(&mut self, cmd:&str) -> io::Result<()> {
        trace!("vxi11 >> {}", cmd);
        CoreClient::write(self, cmd.as_bytes())
    }

    fn read(&mut self) -> io::Result<String> {
        let raw = CoreClient::read(self)?;
        let resp = str::from_utf8(&raw)
            .map(|s| s.to_owned())
            .map_err(|_| Error::new(ErrorKind::InvalidData, "Unable to parse response as UTF-8"))?;
        trace!("vxi11 << {}", resp.trim_end());
        Ok(resp)
    }

    fn clear(&mut self) -> io::Result<()> {
        self.device_clear()
    }

    fn close(&mut self) -> io::Result<()> {
        if self.has_link() { self.destroy_link() } else { Ok(()) }
    }

}

impl Drop for CoreClient {

    fn drop(&mut self) {
        if self.has_link() {
            if let Err(e) = self.destroy_link() {
                warn!("Unable to destroy VXI-11 link: {}", e);
            }
        }
    }

}
