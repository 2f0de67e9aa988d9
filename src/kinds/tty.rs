//! TTY endpoint kind, backed by `serialport`.
//!
//! Grounded in `ep_tty.c`'s configuration: canonical mode off, 8N1, no flow
//! control, `VMIN=1`/`VTIME=0` (the closest portable equivalent `serialport`
//! exposes is a short read timeout, since it does not expose raw termios
//! `VMIN`/`VTIME` directly). Bytes read from the device are framed and
//! handed to the peer; frames arriving from the peer are written to the
//! device via [`crate::frame::write_all`].

use std::io::Read;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, StopBits, TTYPort};

use crate::endpoint::{EndpointKind, EndpointOps};
use crate::error::{Error, Result};

pub struct TtyKind {
    path: String,
    baud: u32,
    port: Option<TTYPort>,
}

impl TtyKind {
    pub fn new(path: String, baud: u32) -> TtyKind {
        TtyKind { path, baud, port: None }
    }
}

impl EndpointOps for TtyKind {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Tty
    }

    fn open(&mut self, _path_params: &str) -> Result<()> {
        let mut port = serialport::new(&self.path, self.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(10))
            .open_native()
            .map_err(|e| Error::invalid(format!("tty {}: {e}", self.path)))?;
        port.set_exclusive(false).ok();
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn on_data(&mut self, payload: &[u8], _reply: &mut Vec<u8>) -> Result<()> {
        let port = self.port.as_mut().ok_or_else(|| Error::invalid("tty not open"))?;
        crate::frame::write_all(port, payload)
    }

    fn poll_fd(&self) -> Option<RawFd> {
        self.port.as_ref().map(|p| p.as_raw_fd())
    }

    fn on_ready(&mut self, readable: bool, _writable: bool, out: &mut Vec<u8>) -> Result<()> {
        if !readable {
            return Ok(());
        }
        let port = self.port.as_mut().ok_or_else(|| Error::invalid("tty not open"))?;
        let mut buf = [0u8; 4096];
        loop {
            match port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }
}
