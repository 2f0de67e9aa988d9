//! URI grammar parsing for endpoint addressing.
//!
//! `<scheme>://<path>`, scheme drawn from {ipc, inet, tty, gpio, spi, i2c,
//! sysfs}; a bare string with no recognized scheme is a loopback name. Grounded
//! in how each `ep_*.c` file parses its `open(path)` argument.

use crate::endpoint::EndpointKind;
use crate::error::{Error, Result};

pub const DEFAULT_INET_PORT: u16 = 9110;
pub const DEFAULT_TTY_BAUD: u32 = 115_200;
pub const TTY_BAUD_RATES: &[u32] = &[57_600, 115_200, 230_400, 460_800, 500_000, 576_000, 921_600];
pub const DEFAULT_SPI_MODE: u8 = 3;

/// A parsed endpoint address: the kind to allocate and whatever remains of
/// the URI after the scheme for that kind's `open` to interpret further.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub kind: EndpointKind,
    pub path: String,
}

pub fn parse(uri: &str) -> Result<Address> {
    match uri.split_once("://") {
        Some(("ipc", path)) => Ok(Address { kind: EndpointKind::Ipc, path: path.to_string() }),
        Some(("inet", path)) => Ok(Address { kind: EndpointKind::Inet, path: path.to_string() }),
        Some(("tty", path)) => Ok(Address { kind: EndpointKind::Tty, path: path.to_string() }),
        Some(("gpio", path)) => Ok(Address { kind: EndpointKind::Gpio, path: path.to_string() }),
        Some(("spi", path)) => Ok(Address { kind: EndpointKind::Spi, path: path.to_string() }),
        Some(("i2c", path)) => Ok(Address { kind: EndpointKind::I2c, path: path.to_string() }),
        Some(("sysfs", path)) => Ok(Address { kind: EndpointKind::Sysfs, path: path.to_string() }),
        Some((scheme, _)) => Err(Error::invalid(format!("unknown scheme: {scheme}"))),
        None => Ok(Address { kind: EndpointKind::Loop, path: uri.to_string() }),
    }
}

/// `ipc` path: a filesystem path, or `@name` for the abstract namespace (the
/// `@` stands in for the leading NUL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcAddr {
    Path(String),
    Abstract(String),
}

pub fn parse_ipc(path: &str) -> Result<IpcAddr> {
    if path.is_empty() {
        return Err(Error::invalid("ipc path is empty"));
    }
    if let Some(name) = path.strip_prefix('@') {
        Ok(IpcAddr::Abstract(name.to_string()))
    } else {
        Ok(IpcAddr::Path(path.to_string()))
    }
}

/// `inet` path: `host:port`, default port 9110.
pub fn parse_inet(path: &str) -> Result<(String, u16)> {
    match path.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port: u16 = port
                .parse()
                .map_err(|_| Error::invalid(format!("bad inet port: {port}")))?;
            Ok((host.to_string(), port))
        }
        _ => Ok((path.to_string(), DEFAULT_INET_PORT)),
    }
}

/// `tty` path: `dev,baud`; `baud` must be one of [`TTY_BAUD_RATES`].
pub fn parse_tty(path: &str) -> Result<(String, u32)> {
    let mut parts = path.splitn(2, ',');
    let dev = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::invalid("tty device path is empty"))?;
    let baud = match parts.next() {
        None => DEFAULT_TTY_BAUD,
        Some(s) => {
            let baud: u32 = s
                .parse()
                .map_err(|_| Error::invalid(format!("bad tty baud: {s}")))?;
            if !TTY_BAUD_RATES.contains(&baud) {
                return Err(Error::invalid(format!("unsupported tty baud: {baud}")));
            }
            baud
        }
    };
    Ok((dev.to_string(), baud))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioDir {
    In,
    Out,
}

/// `gpio` path: `consumer@chip-line,dir[,initval]`.
pub fn parse_gpio(path: &str) -> Result<(String, String, u32, GpioDir, Option<u8>)> {
    let (consumer, rest) = path
        .split_once('@')
        .ok_or_else(|| Error::invalid("gpio path missing 'consumer@'"))?;
    let mut fields = rest.split(',');
    let chip_line = fields
        .next()
        .ok_or_else(|| Error::invalid("gpio path missing chip-line"))?;
    let (chip, line) = chip_line
        .rsplit_once('-')
        .ok_or_else(|| Error::invalid("gpio chip-line must be 'chip-line'"))?;
    let line: u32 = line
        .parse()
        .map_err(|_| Error::invalid(format!("bad gpio line offset: {line}")))?;
    let dir = match fields.next() {
        Some("in") => GpioDir::In,
        Some("out") => GpioDir::Out,
        Some(other) => return Err(Error::invalid(format!("bad gpio direction: {other}"))),
        None => return Err(Error::invalid("gpio path missing direction")),
    };
    let initval = match fields.next() {
        None => None,
        Some("0") => Some(0),
        Some("1") => Some(1),
        Some(other) => return Err(Error::invalid(format!("bad gpio initval: {other}"))),
    };
    if dir == GpioDir::In && initval.is_some() {
        return Err(Error::invalid("gpio initval is only valid for dir=out"));
    }
    Ok((consumer.to_string(), chip.to_string(), line, dir, initval))
}

/// `spi` path: `dev,speed[,mode]`.
pub fn parse_spi(path: &str) -> Result<(String, u32, u8)> {
    let mut fields = path.split(',');
    let dev = fields
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::invalid("spi device path is empty"))?;
    let speed: u32 = fields
        .next()
        .ok_or_else(|| Error::invalid("spi path missing speed"))?
        .parse()
        .map_err(|_| Error::invalid("bad spi speed"))?;
    let mode = match fields.next() {
        None => DEFAULT_SPI_MODE,
        Some(s) => {
            let mode: u8 = s.parse().map_err(|_| Error::invalid("bad spi mode"))?;
            if mode > 3 {
                return Err(Error::invalid(format!("spi mode out of range: {mode}")));
            }
            mode
        }
    };
    Ok((dev.to_string(), speed, mode))
}

/// `sysfs` path: a sys-path, `subsystem:name`, or a bare device id. The
/// original's code resolves in that order (`udev_device_new_from_syspath`,
/// then `_from_subsystem_sysname`, then `_from_device_id`), which differs
/// from the order implied by a naive reading of its own usage docs; this
/// crate follows the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysfsAddr {
    SysPath(String),
    SubsystemDevice(String, String),
    DeviceId(String),
}

pub fn parse_sysfs(path: &str) -> Result<SysfsAddr> {
    if path.is_empty() {
        return Err(Error::invalid("sysfs path is empty"));
    }
    if path.starts_with('/') {
        return Ok(SysfsAddr::SysPath(path.to_string()));
    }
    if is_major_minor_device_id(path) {
        return Ok(SysfsAddr::DeviceId(path.to_string()));
    }
    if let Some((subsystem, name)) = path.split_once(':') {
        return Ok(SysfsAddr::SubsystemDevice(subsystem.to_string(), name.to_string()));
    }
    Ok(SysfsAddr::DeviceId(path.to_string()))
}

/// `c<major>:<minor>` or `b<major>:<minor>`, the device-id form the kernel's
/// `/sys/dev/{char,block}` symlinks key on — these must be told apart from
/// a `subsystem:name` pair before the generic colon split runs, or a
/// device-id like `c189:0` is swallowed as `SubsystemDevice("c189", "0")`.
fn is_major_minor_device_id(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('c').or_else(|| path.strip_prefix('b')) else {
        return false;
    };
    let Some((major, minor)) = rest.split_once(':') else {
        return false;
    };
    !major.is_empty() && !minor.is_empty() && major.bytes().all(|b| b.is_ascii_digit()) && minor.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_selects_kind() {
        assert_eq!(parse("ipc://@/tmp/a").unwrap().kind, EndpointKind::Ipc);
        assert_eq!(parse("inet://localhost:9000").unwrap().kind, EndpointKind::Inet);
        assert_eq!(parse("gpio://led@0-17,out,0").unwrap().kind, EndpointKind::Gpio);
    }

    #[test]
    fn missing_scheme_is_loopback() {
        let addr = parse("lo").unwrap();
        assert_eq!(addr.kind, EndpointKind::Loop);
        assert_eq!(addr.path, "lo");
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(parse("carrier-pigeon://nest").is_err());
    }

    #[test]
    fn ipc_abstract_namespace() {
        assert_eq!(parse_ipc("@foo").unwrap(), IpcAddr::Abstract("foo".to_string()));
        assert_eq!(parse_ipc("/tmp/foo").unwrap(), IpcAddr::Path("/tmp/foo".to_string()));
    }

    #[test]
    fn inet_defaults_port() {
        assert_eq!(parse_inet("example.com").unwrap(), ("example.com".to_string(), DEFAULT_INET_PORT));
        assert_eq!(parse_inet("example.com:1234").unwrap(), ("example.com".to_string(), 1234));
    }

    #[test]
    fn tty_rejects_unlisted_baud() {
        assert!(parse_tty("/dev/ttyUSB0,9600").is_err());
        assert_eq!(parse_tty("/dev/ttyUSB0").unwrap(), ("/dev/ttyUSB0".to_string(), DEFAULT_TTY_BAUD));
    }

    #[test]
    fn gpio_parses_full_grammar() {
        let (consumer, chip, line, dir, initval) = parse_gpio("led@0-17,out,1").unwrap();
        assert_eq!(consumer, "led");
        assert_eq!(chip, "0");
        assert_eq!(line, 17);
        assert_eq!(dir, GpioDir::Out);
        assert_eq!(initval, Some(1));
    }

    #[test]
    fn gpio_in_rejects_initval() {
        assert!(parse_gpio("sensor@0-4,in,1").is_err());
    }

    #[test]
    fn sysfs_resolution_order_matches_code() {
        assert_eq!(parse_sysfs("/sys/class/gpio/gpio17").unwrap(), SysfsAddr::SysPath("/sys/class/gpio/gpio17".to_string()));
        assert_eq!(
            parse_sysfs("tty:ttyUSB0").unwrap(),
            SysfsAddr::SubsystemDevice("tty".to_string(), "ttyUSB0".to_string())
        );
        assert_eq!(parse_sysfs("c189:0").unwrap(), SysfsAddr::DeviceId("c189:0".to_string()));
    }
}
