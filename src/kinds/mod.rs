//! Per-kind `EndpointOps` implementations and the factory that builds one
//! from a parsed [`crate::uri::Address`].

pub mod gpio;
pub mod i2c;
pub mod ipc;
pub mod loopkind;
pub mod spi;
pub mod sysfs;
pub mod tty;

use crate::endpoint::{EndpointKind, EndpointOps};
use crate::error::Result;
use crate::uri::{self, Address};

/// Builds the kind-specific ops object for `address` and immediately calls
/// its `open`, mirroring the registry's "allocate then open" sequencing
/// (`open(uri)` in §4.4).
pub fn build(address: &Address) -> Result<Box<dyn EndpointOps>> {
    let mut ops: Box<dyn EndpointOps> = match address.kind {
        EndpointKind::Ipc => {
            let addr = uri::parse_ipc(&address.path)?;
            Box::new(ipc::IpcKind::new(ipc::IpcSpec::Unix(addr)))
        }
        EndpointKind::Inet => {
            let (host, port) = uri::parse_inet(&address.path)?;
            Box::new(ipc::IpcKind::new(ipc::IpcSpec::Inet(host, port)))
        }
        EndpointKind::Tty => {
            let (dev, baud) = uri::parse_tty(&address.path)?;
            Box::new(tty::TtyKind::new(dev, baud))
        }
        EndpointKind::Gpio => {
            let (consumer, chip, line, dir, initval) = uri::parse_gpio(&address.path)?;
            Box::new(gpio::GpioKind::new(consumer, chip, line, dir, initval))
        }
        EndpointKind::Spi => {
            let (dev, speed, mode) = uri::parse_spi(&address.path)?;
            Box::new(spi::SpiKind::new(dev, speed, mode))
        }
        EndpointKind::I2c => Box::new(i2c::I2cKind::new(address.path.clone())),
        EndpointKind::Sysfs => {
            let addr = uri::parse_sysfs(&address.path)?;
            Box::new(sysfs::SysfsKind::new(addr))
        }
        EndpointKind::Loop => Box::new(loopkind::NullOps::new(EndpointKind::Loop)),
        EndpointKind::Port => Box::new(loopkind::NullOps::new(EndpointKind::Port)),
    };
    ops.open(&address.path)?;
    Ok(ops)
}
