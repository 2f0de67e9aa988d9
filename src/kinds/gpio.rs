//! GPIO endpoint kind, backed by `gpio-cdev`.
//!
//! Grounded in the original's `ep_gpio.c`: output lines accept a single
//! byte 0/1 from the peer and set the line; input lines subscribe to both
//! edges and emit `{value:u8, sec:i64, nsec:i64}` on every edge, discarding
//! silently if unbound (enforced by the registry, not here).

use std::os::unix::io::{AsRawFd, RawFd};

use gpio_cdev::{Chip, EventRequestFlags, EventType, LineEventHandle, LineHandle, LineRequestFlags};

use crate::endpoint::{EndpointKind, EndpointOps};
use crate::error::{Error, Result};
use crate::uri::GpioDir;

enum Line {
    Out(LineHandle),
    In(LineEventHandle),
}

pub struct GpioKind {
    consumer: String,
    chip_path: String,
    offset: u32,
    dir: GpioDir,
    initval: Option<u8>,
    line: Option<Line>,
}

impl GpioKind {
    pub fn new(consumer: String, chip: String, offset: u32, dir: GpioDir, initval: Option<u8>) -> GpioKind {
        GpioKind {
            consumer,
            chip_path: format!("/dev/gpiochip{chip}"),
            offset,
            dir,
            initval,
            line: None,
        }
    }
}

impl EndpointOps for GpioKind {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Gpio
    }

    fn open(&mut self, _path_params: &str) -> Result<()> {
        let mut chip = Chip::new(&self.chip_path)
            .map_err(|e| Error::invalid(format!("gpio chip {}: {e}", self.chip_path)))?;
        let handle = chip
            .get_line(self.offset)
            .map_err(|e| Error::invalid(format!("gpio line {}: {e}", self.offset)))?;

        self.line = Some(match self.dir {
            GpioDir::Out => {
                let default = self.initval.unwrap_or(0) as u8;
                let h = handle
                    .request(LineRequestFlags::OUTPUT, default, &self.consumer)
                    .map_err(|e| Error::Io(e.into()))?;
                Line::Out(h)
            }
            GpioDir::In => {
                let h = handle
                    .events(
                        LineRequestFlags::INPUT,
                        EventRequestFlags::BOTH_EDGES,
                        &self.consumer,
                    )
                    .map_err(|e| Error::Io(e.into()))?;
                Line::In(h)
            }
        });
        Ok(())
    }

    fn close(&mut self) {
        self.line = None;
    }

    /// A payload arriving from the peer is only meaningful for an output
    /// line: exactly one byte, 0 or 1.
    fn on_data(&mut self, payload: &[u8], _reply: &mut Vec<u8>) -> Result<()> {
        let Some(Line::Out(handle)) = &self.line else {
            return Err(Error::protocol("gpio line is not configured as output"));
        };
        if payload.len() != 1 || (payload[0] != 0 && payload[0] != 1) {
            return Err(Error::protocol("gpio output payload must be one byte, 0 or 1"));
        }
        handle.set_value(payload[0] as u8).map_err(|e| Error::Io(e.into()))
    }

    fn poll_fd(&self) -> Option<RawFd> {
        match &self.line {
            Some(Line::In(h)) => Some(h.as_raw_fd()),
            _ => None,
        }
    }

    fn on_ready(&mut self, readable: bool, _writable: bool, out: &mut Vec<u8>) -> Result<()> {
        if !readable {
            return Ok(());
        }
        let Some(Line::In(handle)) = &mut self.line else {
            return Ok(());
        };
        let event = handle
            .get_event()
            .map_err(|e| Error::Io(e.into()))?;
        let value: u8 = match event.event_type() {
            EventType::RisingEdge => 1,
            EventType::FallingEdge => 0,
        };
        let nanos = event.timestamp() as i64;
        let sec = nanos / 1_000_000_000;
        let nsec = nanos % 1_000_000_000;
        out.push(value);
        out.extend_from_slice(&sec.to_ne_bytes());
        out.extend_from_slice(&nsec.to_ne_bytes());
        Ok(())
    }
}
