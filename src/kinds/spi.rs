//! SPI endpoint kind, backed by `spidev`.
//!
//! Grounded in `ep_spi.c`: the payload is `tx_len:u16 ‖ rd_flag:u8 ‖
//! tx[tx_len]`; each byte of `tx` is transferred full-duplex with its own
//! `SPI_IOC_MESSAGE(1)` call (mirroring the original's per-byte ioctl
//! loop), and the concatenated rx bytes are returned only if `rd_flag` is
//! set.

use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use crate::endpoint::{EndpointKind, EndpointOps};
use crate::error::{Error, Result};

pub struct SpiKind {
    path: String,
    speed_hz: u32,
    mode: u8,
    dev: Option<Spidev>,
}

impl SpiKind {
    pub fn new(path: String, speed_hz: u32, mode: u8) -> SpiKind {
        SpiKind { path, speed_hz, mode, dev: None }
    }
}

fn mode_flags(mode: u8) -> SpiModeFlags {
    match mode {
        0 => SpiModeFlags::SPI_MODE_0,
        1 => SpiModeFlags::SPI_MODE_1,
        2 => SpiModeFlags::SPI_MODE_2,
        _ => SpiModeFlags::SPI_MODE_3,
    }
}

impl EndpointOps for SpiKind {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Spi
    }

    fn open(&mut self, _path_params: &str) -> Result<()> {
        let mut dev = Spidev::open(&self.path).map_err(|e| Error::Io(e.into()))?;
        let options = SpidevOptions::new()
            .max_speed_hz(self.speed_hz)
            .mode(mode_flags(self.mode))
            .build();
        dev.configure(&options).map_err(|e| Error::Io(e.into()))?;
        self.dev = Some(dev);
        Ok(())
    }

    fn close(&mut self) {
        self.dev = None;
    }

    fn on_data(&mut self, payload: &[u8], reply: &mut Vec<u8>) -> Result<()> {
        if payload.len() < 3 {
            return Err(Error::protocol("spi payload shorter than header"));
        }
        let tx_len = u16::from_ne_bytes([payload[0], payload[1]]) as usize;
        let rd_flag = payload[2];
        let tx = payload.get(3..3 + tx_len).ok_or_else(|| {
            Error::protocol("spi payload tx shorter than declared tx_len")
        })?;

        let dev = self.dev.as_mut().ok_or_else(|| Error::invalid("spi device not open"))?;
        let mut rx = vec![0u8; tx_len];
        for i in 0..tx_len {
            let mut transfer = SpidevTransfer::read_write(&tx[i..=i], &mut rx[i..=i]);
            dev.transfer(&mut transfer).map_err(|e| Error::Io(e.into()))?;
        }

        if rd_flag != 0 {
            reply.extend_from_slice(&rx);
        }
        Ok(())
    }
}
