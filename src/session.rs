//! Client sessions (C7): the connecting side of an IPC/INET link.
//!
//! Grounded in `connect.c`'s `struct rteipc_ctx`/`connect_read_cb`/
//! `connect_event_cb`, and the `RTEIPC_NO_EXIT_ON_ERR` flag. A session's
//! context-id space is disjoint from endpoint descriptors (invariant 1),
//! kept here as its own [`crate::slab::Slab`].

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use std::collections::VecDeque;

use log::{trace, warn};

use crate::error::{Error, Result};
use crate::slab::Slab;
use crate::uri::{self, Address};

pub const DEFAULT_SESSION_CAPACITY: usize = 256;

/// Set on a session via [`crate::ops::setcb`]'s `flag` parameter: the
/// terminal error that closes this session does not break the reactor
/// loop (mirrors `RTEIPC_NO_EXIT_ON_ERR`).
pub const NO_EXIT_ON_ERR: u32 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Closed,
}

pub type ReadCallback = Box<dyn FnMut(i64, &[u8])>;
pub type ErrCallback = Box<dyn FnMut(i64, u32)>;

enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    fn connect(address: &Address) -> Result<Stream> {
        match address.kind {
            crate::endpoint::EndpointKind::Ipc => {
                let addr = uri::parse_ipc(&address.path)?;
                match addr {
                    uri::IpcAddr::Path(path) => Ok(Stream::Unix(UnixStream::connect(path).map_err(Error::Io)?)),
                    uri::IpcAddr::Abstract(name) => {
                        use std::os::linux::net::SocketAddrExt;
                        let sockaddr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())
                            .map_err(Error::Io)?;
                        Ok(Stream::Unix(UnixStream::connect_addr(&sockaddr).map_err(Error::Io)?))
                    }
                }
            }
            crate::endpoint::EndpointKind::Inet => {
                let (host, port) = uri::parse_inet(&address.path)?;
                Ok(Stream::Tcp(TcpStream::connect((host.as_str(), port)).map_err(Error::Io)?))
            }
            _ => Err(Error::invalid("connect only accepts ipc:// or inet:// uris")),
        }
    }

    fn set_nonblocking(&self, v: bool) -> std::io::Result<()> {
        match self {
            Stream::Unix(s) => s.set_nonblocking(v),
            Stream::Tcp(s) => s.set_nonblocking(v),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Unix(s) => s.read(buf),
            Stream::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Unix(s) => s.write(buf),
            Stream::Tcp(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Unix(s) => s.flush(),
            Stream::Tcp(s) => s.flush(),
        }
    }
}

impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Stream::Unix(s) => s.as_raw_fd(),
            Stream::Tcp(s) => s.as_raw_fd(),
        }
    }
}

pub struct Session {
    stream: Stream,
    state: SessionState,
    inbox: VecDeque<u8>,
    read_cb: Option<ReadCallback>,
    err_cb: Option<ErrCallback>,
    flags: u32,
}

impl Session {
    pub fn no_exit_on_err(&self) -> bool {
        self.flags & NO_EXIT_ON_ERR != 0
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state != SessionState::Connected && self.state != SessionState::Connecting {
            return Err(Error::PeerClosed);
        }
        let framed = crate::frame::frame(bytes)?;
        crate::frame::write_all(&mut self.stream, &framed)
    }

    pub fn setcb(&mut self, read_cb: Option<ReadCallback>, err_cb: Option<ErrCallback>, flags: u32) {
        self.read_cb = read_cb;
        self.err_cb = err_cb;
        self.flags = flags;
    }

    /// Reads whatever is available, de-frames complete messages and
    /// dispatches each to the read callback, in order. Returns whether the
    /// session transitioned to `Closed` (EOF or error) so the caller can
    /// decide whether to break the reactor loop.
    fn service(&mut self, ctx: i64, events: u32) -> bool {
        self.state = SessionState::Connected;
        let mut buf = [0u8; 4096];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    trace!("session {ctx} saw EOF");
                    return self.fail(ctx, events);
                }
                Ok(n) => self.inbox.extend(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("session {ctx} read error, closing: {e}");
                    return self.fail(ctx, events);
                }
            }
        }
        while let Ok(Some(payload)) = crate::frame::drain(&mut self.inbox) {
            if let Some(cb) = self.read_cb.as_mut() {
                cb(ctx, &payload);
            }
        }
        false
    }

    fn fail(&mut self, ctx: i64, events: u32) -> bool {
        self.state = SessionState::Closed;
        if let Some(cb) = self.err_cb.as_mut() {
            cb(ctx, events);
        }
        true
    }
}

#[derive(Default)]
pub struct SessionTable {
    sessions: Slab<Session>,
}

impl SessionTable {
    pub fn new() -> SessionTable {
        SessionTable { sessions: Slab::with_capacity(DEFAULT_SESSION_CAPACITY) }
    }

    pub fn connect(&mut self, uri: &str) -> Result<i64> {
        let address = uri::parse(uri)?;
        if !matches!(address.kind, crate::endpoint::EndpointKind::Ipc | crate::endpoint::EndpointKind::Inet) {
            return Err(Error::invalid("connect only accepts ipc:// or inet:// uris"));
        }
        let stream = Stream::connect(&address)?;
        stream.set_nonblocking(true).map_err(Error::Io)?;
        let id = self.sessions.insert(Session {
            stream,
            state: SessionState::Connecting,
            inbox: VecDeque::new(),
            read_cb: None,
            err_cb: None,
            flags: 0,
        })?;
        trace!("session {id} connecting to {uri}");
        Ok(id as i64)
    }

    pub fn send(&mut self, ctx: i64, bytes: &[u8]) -> Result<()> {
        self.sessions
            .get_mut(ctx as usize)
            .ok_or_else(|| Error::not_found(format!("session {ctx}")))?
            .send(bytes)
    }

    /// See [`crate::switch::SwitchTable::evxfer`] for why this collapses
    /// onto `send` rather than taking a separate buffer type.
    pub fn evsend(&mut self, ctx: i64, bytes: &[u8]) -> Result<()> {
        self.send(ctx, bytes)
    }

    pub fn gpio_send(&mut self, ctx: i64, value: u8) -> Result<()> {
        self.send(ctx, &crate::payload::gpio(value))
    }

    pub fn spi_send(&mut self, ctx: i64, tx: &[u8], read_flag: bool) -> Result<()> {
        self.send(ctx, &crate::payload::spi(tx, read_flag))
    }

    pub fn i2c_send(&mut self, ctx: i64, addr: u16, tx: &[u8], rlen: u16) -> Result<()> {
        self.send(ctx, &crate::payload::i2c(addr, tx, rlen))
    }

    pub fn sysfs_send(&mut self, ctx: i64, attr: &str, value: Option<&str>) -> Result<()> {
        self.send(ctx, &crate::payload::sysfs(attr, value))
    }

    pub fn setcb(&mut self, ctx: i64, read_cb: Option<ReadCallback>, err_cb: Option<ErrCallback>, flags: u32) -> Result<()> {
        self.sessions
            .get_mut(ctx as usize)
            .ok_or_else(|| Error::not_found(format!("session {ctx}")))?
            .setcb(read_cb, err_cb, flags);
        Ok(())
    }

    pub fn raw_fd(&self, ctx: i64) -> Option<RawFd> {
        self.sessions.get(ctx as usize).map(|s| s.raw_fd())
    }

    pub fn iter_fds(&self) -> impl Iterator<Item = (i64, RawFd)> + '_ {
        self.sessions.iter().map(|(id, s)| (id as i64, s.raw_fd()))
    }

    /// Services readiness on `ctx`. `events` is the raw bitmask the reactor
    /// observed for this source; it is only ever surfaced to the error
    /// callback (§4.9: "call the error callback ... with the original event
    /// bitmask"), never interpreted here. Returns `true` if this session
    /// just closed terminally and does *not* have `NO_EXIT_ON_ERR` set,
    /// meaning the reactor loop should break.
    pub fn service(&mut self, ctx: i64, events: u32) -> bool {
        let Some(session) = self.sessions.get_mut(ctx as usize) else { return false };
        let just_closed = session.service(ctx, events);
        let should_break = just_closed && !session.no_exit_on_err();
        if just_closed {
            if should_break {
                warn!("session {ctx} closed terminally, breaking the reactor loop");
            } else {
                trace!("session {ctx} closed terminally (NO_EXIT_ON_ERR set)");
            }
            self.sessions.remove(ctx as usize);
        }
        should_break
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_rejects_non_ipc_inet_schemes() {
        let mut table = SessionTable::new();
        assert!(table.connect("gpio://led@0-1,out").is_err());
    }
}
