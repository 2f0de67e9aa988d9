//! IPC (Unix-domain) and INET (TCP) endpoint kinds.
//!
//! Grounded in `ep_ipc.c`: a listener that accepts at most one client at a
//! time, re-arming on disconnect (`listen_cb` disables the listener fd on
//! accept; `event_cb` re-enables it on EOF). Unlike every other kind, IPC
//! and INET do not interpret payloads — bytes are relayed verbatim in both
//! directions, since framing on this link is the connected client's own
//! responsibility (see `registry::dispatch_from`, which special-cases these
//! two kinds ahead of the generic frame/`on_data` path).

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::linux::net::SocketAddrExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{SocketAddr, UnixListener, UnixStream};

use crate::endpoint::{EndpointKind, EndpointOps};
use crate::error::{Error, Result};
use crate::uri::IpcAddr;

enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

enum Client {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Client {
    fn set_nonblocking(&self, v: bool) -> std::io::Result<()> {
        match self {
            Client::Unix(s) => s.set_nonblocking(v),
            Client::Tcp(s) => s.set_nonblocking(v),
        }
    }
}

impl Read for Client {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Client::Unix(s) => s.read(buf),
            Client::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Client {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Client::Unix(s) => s.write(buf),
            Client::Tcp(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Client::Unix(s) => s.flush(),
            Client::Tcp(s) => s.flush(),
        }
    }
}

impl AsRawFd for Client {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Client::Unix(s) => s.as_raw_fd(),
            Client::Tcp(s) => s.as_raw_fd(),
        }
    }
}

pub enum IpcSpec {
    Unix(IpcAddr),
    Inet(String, u16),
}

pub struct IpcKind {
    spec: IpcSpec,
    listener: Option<Listener>,
    client: Option<Client>,
}

impl IpcKind {
    pub fn new(spec: IpcSpec) -> IpcKind {
        IpcKind { spec, listener: None, client: None }
    }

    pub fn kind_tag(&self) -> EndpointKind {
        match self.spec {
            IpcSpec::Unix(_) => EndpointKind::Ipc,
            IpcSpec::Inet(..) => EndpointKind::Inet,
        }
    }

    /// True while a client is connected; the listener only re-arms once
    /// this goes back to false.
    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    fn accept(&mut self) -> Result<bool> {
        let accepted = match self.listener.as_ref().unwrap() {
            Listener::Unix(l) => l.accept().ok().map(|(s, _)| Client::Unix(s)),
            Listener::Tcp(l) => l.accept().ok().map(|(s, _)| Client::Tcp(s)),
        };
        match accepted {
            Some(client) => {
                client.set_nonblocking(true).map_err(Error::Io)?;
                self.client = Some(client);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl EndpointOps for IpcKind {
    fn kind(&self) -> EndpointKind {
        self.kind_tag()
    }

    fn open(&mut self, _path_params: &str) -> Result<()> {
        self.listener = Some(match &self.spec {
            IpcSpec::Unix(IpcAddr::Path(path)) => {
                let _ = std::fs::remove_file(path);
                Listener::Unix(UnixListener::bind(path).map_err(Error::Io)?)
            }
            IpcSpec::Unix(IpcAddr::Abstract(name)) => {
                let addr = SocketAddr::from_abstract_name(name.as_bytes()).map_err(Error::Io)?;
                Listener::Unix(UnixListener::bind_addr(&addr).map_err(Error::Io)?)
            }
            IpcSpec::Inet(host, port) => {
                Listener::Tcp(TcpListener::bind((host.as_str(), *port)).map_err(Error::Io)?)
            }
        });
        match self.listener.as_ref().unwrap() {
            Listener::Unix(l) => l.set_nonblocking(true).map_err(Error::Io)?,
            Listener::Tcp(l) => l.set_nonblocking(true).map_err(Error::Io)?,
        }
        Ok(())
    }

    fn close(&mut self) {
        self.client = None;
        self.listener = None;
    }

    fn on_data(&mut self, _payload: &[u8], _reply: &mut Vec<u8>) -> Result<()> {
        // Never invoked: the registry relays Ipc/Inet traffic through
        // `on_relay` verbatim instead of de-framing it.
        Ok(())
    }

    fn on_relay(&mut self, raw: &[u8]) -> Result<()> {
        match self.client.as_mut() {
            Some(client) => crate::frame::write_all(client, raw),
            None => Ok(()), // no client connected yet: drop, matching a disconnected peer
        }
    }

    fn poll_fd(&self) -> Option<RawFd> {
        if let Some(client) = &self.client {
            Some(client.as_raw_fd())
        } else {
            self.listener.as_ref().map(|l| match l {
                Listener::Unix(l) => l.as_raw_fd(),
                Listener::Tcp(l) => l.as_raw_fd(),
            })
        }
    }

    fn on_ready(&mut self, readable: bool, _writable: bool, out: &mut Vec<u8>) -> Result<()> {
        if !readable {
            return Ok(());
        }
        if self.client.is_none() {
            self.accept()?;
            return Ok(());
        }
        let mut buf = [0u8; 4096];
        loop {
            let client = self.client.as_mut().unwrap();
            match client.read(&mut buf) {
                Ok(0) => {
                    self.client = None;
                    break;
                }
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.client = None;
                    return Err(Error::Io(e));
                }
            }
        }
        Ok(())
    }
}
