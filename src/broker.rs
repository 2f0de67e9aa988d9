//! The public operations (C10): `init`/`reinit`/`shutdown`/`dispatch` plus
//! every verb in the endpoint and client-session families, and the thin
//! switch/loopback wrappers that round out the public surface.
//!
//! Grounded in the design note on the "global/thread-local loop": the
//! source keeps `__base` as a thread-local populated by the first `init`
//! call and released by `shutdown`. Here that becomes a single [`Broker`]
//! owning the [`Reactor`](crate::reactor::Reactor) plus every table
//! (endpoints, sessions, switches, loopbacks), stored in thread-local state
//! so every free function in this module can reach it without the caller
//! threading a handle through every call site — exactly the tradeoff the
//! design notes call out as acceptable.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use log::{trace, warn};

use crate::error::{Error, Result};
use crate::loopback::{LoopCallback, LoopbackTable};
use crate::reactor::{Readiness, Reactor};
use crate::registry::Registry;
use crate::session::{ErrCallback, ReadCallback, SessionTable};
use crate::switch::{PortHook, SwitchHook, SwitchTable};
use crate::token::{Interest, Token};

thread_local! {
    static BROKER: RefCell<Option<Broker>> = RefCell::new(None);
}

/// A watched source, bijectively encoded into a [`Token`] so the reactor's
/// readiness loop can route an event back to the table that owns it
/// without a second lookup table: even tokens are endpoint descriptors,
/// odd tokens are session context ids (see `encode`/`decode` below).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Source {
    Endpoint(usize),
    Session(i64),
}

fn encode(source: Source) -> Token {
    match source {
        Source::Endpoint(d) => Token(d * 2),
        Source::Session(ctx) => Token(ctx as usize * 2 + 1),
    }
}

fn decode(token: Token) -> Source {
    if token.0 % 2 == 0 {
        Source::Endpoint(token.0 / 2)
    } else {
        Source::Session((token.0 / 2) as i64)
    }
}

/// Reconstructs the raw epoll event bitmask a [`Readiness`] was decoded
/// from, so it can be handed back to a session's error callback verbatim
/// (§4.9) instead of being collapsed into the `readable`/`writable`/`error`
/// booleans the rest of the broker works with.
fn epoll_events_bitmask(r: &Readiness) -> u32 {
    let mut bits = 0i32;
    if r.readable {
        bits |= libc::EPOLLIN;
    }
    if r.writable {
        bits |= libc::EPOLLOUT;
    }
    if r.error {
        bits |= libc::EPOLLERR | libc::EPOLLHUP;
    }
    bits as u32
}

/// Owns every piece of core state for one execution context (§4.1: "only
/// one loop is active per execution context").
struct Broker {
    reactor: Reactor,
    registry: Registry,
    sessions: SessionTable,
    switches: SwitchTable,
    loopbacks: LoopbackTable,
    /// The fd most recently registered with the reactor for each source,
    /// so a source whose underlying fd changes out from under it (an IPC
    /// endpoint's listener fd swapping to its accepted client's fd) gets
    /// deregistered and re-registered rather than silently watching a
    /// stale descriptor.
    watched: HashMap<Source, RawFd>,
    break_requested: bool,
}

impl Broker {
    fn new() -> Result<Broker> {
        Ok(Broker {
            reactor: Reactor::new()?,
            registry: Registry::new(),
            sessions: SessionTable::new(),
            switches: SwitchTable::new(),
            loopbacks: LoopbackTable::new(),
            watched: HashMap::new(),
            break_requested: false,
        })
    }

    /// Reconciles the reactor's registrations against the current set of
    /// endpoint/session fds. Endpoint fds can appear, disappear, or be
    /// swapped for a different fd of the same descriptor (an IPC listener
    /// accepting its one client) between dispatch calls, so this runs at
    /// the top of every `dispatch`.
    fn sync_watches(&mut self) -> Result<()> {
        let mut desired: HashMap<Source, RawFd> = HashMap::new();
        for (fd, descriptor) in self.registry.device_fds() {
            desired.insert(Source::Endpoint(descriptor), fd);
        }
        for (ctx, fd) in self.sessions.iter_fds() {
            desired.insert(Source::Session(ctx), fd);
        }

        for (source, old_fd) in self.watched.clone() {
            match desired.get(&source) {
                Some(&new_fd) if new_fd == old_fd => {}
                _ => {
                    let _ = self.reactor.deregister(old_fd);
                }
            }
        }
        for (&source, &fd) in &desired {
            let already_current = self.watched.get(&source) == Some(&fd);
            if !already_current {
                self.reactor.register(fd, encode(source), Interest::READABLE)?;
            }
        }
        self.watched = desired;
        Ok(())
    }

    /// Services exactly one round of readiness, per `reactor.poll`'s
    /// semantics, and reports whether a terminal session error without
    /// `NoExitOnError` asked the loop to break (§4.9 state machine).
    fn poll_once(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.sync_watches()?;
        let readiness: Vec<_> = self.reactor.poll(timeout)?.to_vec();
        for r in readiness {
            // A hangup/error notification without EPOLLIN still needs to
            // reach the kind/session so it can attempt its read and
            // observe the failure, rather than being silently skipped.
            let readable = r.readable || r.error;
            match decode(r.token) {
                Source::Endpoint(d) => {
                    if let Err(e) = self.registry.service_device_fd(d, readable, r.writable) {
                        warn!("endpoint {d} data-path error, closing: {e}");
                        self.close(d);
                    }
                }
                Source::Session(ctx) => {
                    if self.sessions.service(ctx, epoll_events_bitmask(&r)) {
                        self.break_requested = true;
                    }
                }
            }
        }
        Ok(())
    }

    fn close(&mut self, descriptor: usize) {
        self.loopbacks.close_by_descriptor(&mut self.registry, descriptor);
        self.switches.close_port_by_descriptor(&mut self.registry, descriptor);
        self.registry.close(descriptor);
        self.watched.retain(|source, _| *source != Source::Endpoint(descriptor));
    }

    fn open(&mut self, uri: &str) -> Result<usize> {
        let address = crate::uri::parse(uri)?;
        match address.kind {
            crate::endpoint::EndpointKind::Loop => self.loopbacks.open(&mut self.registry, &address.path),
            _ => self.registry.open_address(&address),
        }
    }
}

/// Runs `f` with the process-wide broker, failing if [`init`] has not been
/// called (or [`shutdown`] already released it).
fn with_broker<T>(f: impl FnOnce(&mut Broker) -> Result<T>) -> Result<T> {
    BROKER.with(|cell| {
        let mut slot = cell.borrow_mut();
        let broker = slot
            .as_mut()
            .ok_or_else(|| Error::invalid("epfabric is not initialized; call init() first"))?;
        f(broker)
    })
}

// ---------------------------------------------------------------------
// Endpoint family
// ---------------------------------------------------------------------

/// First `init` on this thread stores the broker; a second call is a no-op
/// (matches "first `init` stores it" in §4.1).
pub fn init() -> Result<()> {
    BROKER.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_some() {
            trace!("init: already initialized on this thread");
            return Ok(());
        }
        *slot = Some(Broker::new()?);
        trace!("init: broker ready");
        Ok(())
    })
}

/// Refreshes the reactor's internal fds after a `fork()` (§4.1: "reinit
/// refreshes its internal fds after fork"). The epoll instance is not
/// inherited meaningfully across a fork, so this recreates it and
/// re-registers every currently-watched fd.
pub fn reinit() -> Result<()> {
    trace!("reinit: recreating the reactor's epoll instance");
    with_broker(|broker| {
        broker.reactor = Reactor::new()?;
        broker.watched.clear();
        broker.sync_watches()
    })
}

/// Frees the reactor and drops all pending events; no callbacks fire
/// afterwards (§5 "Cancellation / timeouts").
pub fn shutdown() {
    BROKER.with(|cell| {
        if cell.borrow().is_some() {
            trace!("shutdown: releasing broker state");
        }
        *cell.borrow_mut() = None;
    });
}

/// Services readiness until `deadline` elapses or a terminal session error
/// (without `NoExitOnError`) breaks the loop. `deadline = None` blocks
/// until the latter.
pub fn dispatch(deadline: Option<Duration>) -> Result<()> {
    let start = Instant::now();
    loop {
        let remaining = match deadline {
            Some(d) => match d.checked_sub(start.elapsed()) {
                Some(r) if !r.is_zero() => Some(r),
                _ => return Ok(()),
            },
            None => None,
        };
        let broke = with_broker(|broker| {
            broker.poll_once(remaining)?;
            Ok(broker.break_requested)
        })?;
        if broke {
            with_broker(|broker| {
                broker.break_requested = false;
                Ok(())
            })?;
            return Ok(());
        }
        if deadline.is_none() {
            continue;
        }
        if start.elapsed() >= deadline.unwrap() {
            return Ok(());
        }
    }
}

pub fn open(uri: &str) -> Result<usize> {
    with_broker(|broker| broker.open(uri))
}

/// Idempotent against an unknown/already-closed descriptor (§4.9).
pub fn close(descriptor: usize) {
    let _ = with_broker(|broker| {
        broker.close(descriptor);
        Ok(())
    });
}

pub fn bind(a: usize, b: usize) -> Result<()> {
    with_broker(|broker| broker.registry.bind(a, b))
}

/// Idempotent against an unbound/unknown descriptor (§4.9).
pub fn unbind(descriptor: usize) {
    let _ = with_broker(|broker| {
        broker.registry.unbind(descriptor);
        Ok(())
    });
}

// ---------------------------------------------------------------------
// Client-session family
// ---------------------------------------------------------------------

pub fn connect(uri: &str) -> Result<i64> {
    with_broker(|broker| broker.sessions.connect(uri))
}

pub fn send(ctx: i64, bytes: &[u8]) -> Result<()> {
    with_broker(|broker| broker.sessions.send(ctx, bytes))
}

pub fn evsend(ctx: i64, bytes: &[u8]) -> Result<()> {
    send(ctx, bytes)
}

pub fn gpio_send(ctx: i64, value: u8) -> Result<()> {
    with_broker(|broker| broker.sessions.gpio_send(ctx, value))
}

pub fn spi_send(ctx: i64, tx: &[u8], read_flag: bool) -> Result<()> {
    with_broker(|broker| broker.sessions.spi_send(ctx, tx, read_flag))
}

pub fn i2c_send(ctx: i64, addr: u16, tx: &[u8], rlen: u16) -> Result<()> {
    with_broker(|broker| broker.sessions.i2c_send(ctx, addr, tx, rlen))
}

pub fn sysfs_send(ctx: i64, attr: &str, value: Option<&str>) -> Result<()> {
    with_broker(|broker| broker.sessions.sysfs_send(ctx, attr, value))
}

pub fn setcb(ctx: i64, read_cb: Option<ReadCallback>, err_cb: Option<ErrCallback>, flags: u32) -> Result<()> {
    with_broker(|broker| broker.sessions.setcb(ctx, read_cb, err_cb, flags))
}

// ---------------------------------------------------------------------
// Switch & ports
// ---------------------------------------------------------------------

pub fn switch_create() -> Result<usize> {
    with_broker(|broker| Ok(broker.switches.switch_create()))
}

pub fn port(switch: usize, name: &str) -> Result<usize> {
    with_broker(|broker| broker.switches.port(&mut broker.registry, switch, name))
}

pub fn port_close(switch: usize, name: &str) {
    let _ = with_broker(|broker| {
        broker.switches.port_close(&mut broker.registry, switch, name);
        Ok(())
    });
}

pub fn switch_setcb(switch: usize, hook: SwitchHook) -> Result<()> {
    with_broker(|broker| broker.switches.switch_setcb(switch, hook))
}

pub fn port_setcb(switch: usize, name: &str, hook: PortHook) -> Result<()> {
    with_broker(|broker| broker.switches.port_setcb(switch, name, hook))
}

pub fn xfer(switch: usize, name: &str, payload: &[u8]) -> Result<()> {
    with_broker(|broker| broker.switches.xfer(&mut broker.registry, switch, name, payload))
}

pub fn evxfer(switch: usize, name: &str, payload: &[u8]) -> Result<()> {
    xfer(switch, name, payload)
}

pub fn gpio_xfer(switch: usize, name: &str, value: u8) -> Result<()> {
    with_broker(|broker| broker.switches.gpio_xfer(&mut broker.registry, switch, name, value))
}

pub fn spi_xfer(switch: usize, name: &str, tx: &[u8], read_flag: bool) -> Result<()> {
    with_broker(|broker| broker.switches.spi_xfer(&mut broker.registry, switch, name, tx, read_flag))
}

pub fn i2c_xfer(switch: usize, name: &str, addr: u16, tx: &[u8], rlen: u16) -> Result<()> {
    with_broker(|broker| broker.switches.i2c_xfer(&mut broker.registry, switch, name, addr, tx, rlen))
}

pub fn sysfs_xfer(switch: usize, name: &str, attr: &str, value: Option<&str>) -> Result<()> {
    with_broker(|broker| broker.switches.sysfs_xfer(&mut broker.registry, switch, name, attr, value))
}

// ---------------------------------------------------------------------
// Loopback
// ---------------------------------------------------------------------

pub fn loopback_xfer(name: &str, payload: &[u8]) -> Result<()> {
    with_broker(|broker| broker.loopbacks.xfer(&mut broker.registry, name, payload))
}

pub fn loopback_evxfer(name: &str, payload: &[u8]) -> Result<()> {
    loopback_xfer(name, payload)
}

pub fn loopback_gpio_xfer(name: &str, value: u8) -> Result<()> {
    with_broker(|broker| broker.loopbacks.gpio_xfer(&mut broker.registry, name, value))
}

pub fn loopback_spi_xfer(name: &str, tx: &[u8], read_flag: bool) -> Result<()> {
    with_broker(|broker| broker.loopbacks.spi_xfer(&mut broker.registry, name, tx, read_flag))
}

pub fn loopback_i2c_xfer(name: &str, addr: u16, tx: &[u8], rlen: u16) -> Result<()> {
    with_broker(|broker| broker.loopbacks.i2c_xfer(&mut broker.registry, name, addr, tx, rlen))
}

pub fn loopback_sysfs_xfer(name: &str, attr: &str, value: Option<&str>) -> Result<()> {
    with_broker(|broker| broker.loopbacks.sysfs_xfer(&mut broker.registry, name, attr, value))
}

pub fn loopback_setcb(name: &str, callback: LoopCallback) -> Result<()> {
    with_broker(|broker| broker.loopbacks.setcb(name, callback))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Each test gets its own thread so the thread-local broker state
    /// never leaks between tests (tests run concurrently by default).
    fn in_fresh_broker(f: impl FnOnce() + Send + 'static) {
        std::thread::spawn(move || {
            init().unwrap();
            f();
            shutdown();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn init_is_idempotent_and_shutdown_releases_state() {
        in_fresh_broker(|| {
            init().unwrap(); // second call is a no-op, not an error
            let d = open("ipc://@epfabric-broker-test").unwrap();
            close(d);
        });
    }

    #[test]
    fn operations_before_init_fail_rather_than_panic() {
        // No init() on this thread.
        assert!(open("ipc://@never-initialized").is_err());
    }

    #[test]
    fn bind_self_is_rejected() {
        in_fresh_broker(|| {
            let d = open("ipc://@epfabric-broker-self-bind").unwrap();
            assert!(bind(d, d).is_err());
            close(d);
        });
    }

    #[test]
    fn close_is_idempotent() {
        in_fresh_broker(|| {
            let d = open("ipc://@epfabric-broker-double-close").unwrap();
            close(d);
            close(d); // must not panic
        });
    }

    #[test]
    fn closing_a_port_descriptor_cleans_up_switch_membership() {
        in_fresh_broker(|| {
            let sw = switch_create().unwrap();
            let p1 = port(sw, "p1").unwrap();
            close(p1);
            // The name is free again because the switch no longer thinks
            // p1 exists.
            assert!(port(sw, "p1").is_ok());
        });
    }
}
