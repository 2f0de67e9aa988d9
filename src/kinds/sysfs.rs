//! Sysfs endpoint kind, backed by `udev`.
//!
//! Grounded in `ep_sysfs.c`: input is a text payload, either `attr` (read)
//! or `attr=value` (write, empty value accepted). The device is resolved at
//! open time by sys-path, `subsystem:name`, or device-id, tried in the
//! order the original's code actually uses (not the order its usage text
//! lists — see `uri::parse_sysfs`).

use std::path::Path;

use udev::Device;

use crate::endpoint::{EndpointKind, EndpointOps};
use crate::error::{Error, Result};
use crate::uri::SysfsAddr;

pub struct SysfsKind {
    addr: SysfsAddr,
    device: Option<Device>,
}

impl SysfsKind {
    pub fn new(addr: SysfsAddr) -> SysfsKind {
        SysfsKind { addr, device: None }
    }
}

/// Resolves a bare device-id (`c<major>:<minor>` or `b<major>:<minor>`) via
/// the `/sys/dev/{char,block}/MAJOR:MINOR` symlink the kernel maintains for
/// every device node, since the `udev` crate's safe wrapper has no direct
/// `from_device_id` binding.
fn resolve_device_id(id: &str) -> Result<Device> {
    let (class_dir, rest) = match id.split_at(1) {
        ("c", rest) => ("char", rest),
        ("b", rest) => ("block", rest),
        _ => (if id.contains(':') { "char" } else { "" }, id),
    };
    if class_dir.is_empty() {
        return Err(Error::invalid(format!("unrecognized sysfs device-id: {id}")));
    }
    let link = Path::new("/sys/dev").join(class_dir).join(rest);
    let syspath = std::fs::canonicalize(&link)
        .map_err(|e| Error::invalid(format!("sysfs device-id {id}: {e}")))?;
    Device::from_syspath(&syspath).map_err(|e| Error::Io(e))
}

impl EndpointOps for SysfsKind {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Sysfs
    }

    fn open(&mut self, _path_params: &str) -> Result<()> {
        let device = match &self.addr {
            SysfsAddr::SysPath(path) => Device::from_syspath(Path::new(path)).map_err(Error::Io)?,
            SysfsAddr::SubsystemDevice(subsystem, name) => {
                Device::from_subsystem_sysname(subsystem.clone(), name.clone()).map_err(Error::Io)?
            }
            SysfsAddr::DeviceId(id) => resolve_device_id(id)?,
        };
        self.device = Some(device);
        Ok(())
    }

    fn close(&mut self) {
        self.device = None;
    }

    fn on_data(&mut self, payload: &[u8], reply: &mut Vec<u8>) -> Result<()> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::protocol("sysfs payload is not valid utf-8"))?;
        let device = self.device.as_mut().ok_or_else(|| Error::invalid("sysfs device not open"))?;

        match text.split_once('=') {
            Some((attr, value)) => {
                device
                    .set_attribute_value(attr, value)
                    .map_err(Error::Io)?;
                Ok(())
            }
            None => {
                let value = device
                    .attribute_value(text)
                    .ok_or_else(|| Error::not_found(format!("sysfs attribute: {text}")))?
                    .to_string_lossy()
                    .into_owned();
                reply.extend_from_slice(format!("{text}={value}").as_bytes());
                Ok(())
            }
        }
    }
}
