//! Single-threaded I/O event loop.
//!
//! Three primitive event classes: fd readiness, timer expiry (a relative
//! deadline passed to [`Reactor::poll`], mirroring `rteipc_dispatch`'s
//! `struct timeval *tv`), and signal delivery (via `signalfd`, registered as
//! an ordinary readable fd). Grounded in the teacher's epoll selector
//! (`sys/unix/selector/epoll.rs`): `epoll_create1`, `epoll_ctl`,
//! `epoll_wait`, `EPOLLIN`/`EPOLLOUT`/`EPOLLRDHUP`/`EPOLLERR`.
//!
//! Unlike the teacher, `epfabric` does not need a `Waker` for cross-thread
//! wakeup: the reactor is bound to its creating thread with no parallelism
//! across it, so every registration, readiness callback, and teardown
//! happens on that one thread.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::token::{Interest, Token};

/// A single readiness notification returned by [`Reactor::poll`].
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    /// Set on `EPOLLERR` or `EPOLLHUP`/`EPOLLRDHUP`; the caller should treat
    /// the source as broken and close it.
    pub error: bool,
}

/// An epoll-backed reactor. One instance is owned by the process-wide
/// `Broker` (see `broker.rs`) per the "global/thread-local loop" design
/// note: the source's `__base` thread-local becomes state owned by the
/// first `init` call here.
pub struct Reactor {
    epfd: RawFd,
    events: Vec<libc::epoll_event>,
    readiness_scratch: Vec<Readiness>,
}

impl Reactor {
    pub fn new() -> Result<Reactor> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(Reactor {
            epfd,
            events: vec![unsafe { std::mem::zeroed() }; 256],
            readiness_scratch: Vec::with_capacity(256),
        })
    }

    pub fn register(&self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, Some((token, interest)))
    }

    pub fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, Some((token, interest)))
    }

    pub fn deregister(&self, fd: RawFd) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, None)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token_interest: Option<(Token, Interest)>) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: token_interest
                .map(|(_, interest)| interest_to_epoll(interest))
                .unwrap_or(0),
            u64: token_interest.map(|(t, _)| t.0 as u64).unwrap_or(0),
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if ret < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Blocks until at least one event is ready or `timeout` elapses.
    /// `timeout = None` blocks indefinitely; `Some(Duration::ZERO)` polls
    /// without blocking. This is the reactor's "relative deadline" primitive
    /// (mirrors `rteipc_dispatch(struct timeval *tv)`).
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<&[Readiness]> {
        let millis = timeout
            .map(|d| d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                millis,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(&[]);
            }
            return Err(Error::Io(err));
        }

        // SAFETY: this buffer is reused across calls; translate raw events
        // into `Readiness` in place via a side buffer to avoid aliasing.
        self.readiness_scratch.clear();
        for ev in &self.events[..n as usize] {
            self.readiness_scratch.push(Readiness {
                token: Token(ev.u64 as usize),
                readable: ev.events as i32 & (libc::EPOLLIN | libc::EPOLLPRI) != 0,
                writable: ev.events as i32 & libc::EPOLLOUT != 0,
                error: ev.events as i32 & (libc::EPOLLERR | libc::EPOLLHUP | libc::EPOLLRDHUP) != 0,
            });
        }
        Ok(&self.readiness_scratch)
    }

    /// Registers interest in `signal` being delivered, surfaced as a
    /// readable event on `token`. The signal is blocked from its default
    /// disposition for the whole process, matching `signalfd(2)`'s
    /// requirement.
    pub fn watch_signal(&self, signal: libc::c_int, token: Token) -> Result<SignalWatch> {
        unsafe {
            let mut mask: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut mask);
            libc::sigaddset(&mut mask, signal);
            if libc::sigprocmask(libc::SIG_BLOCK, &mask, std::ptr::null_mut()) < 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }
            let fd = libc::signalfd(-1, &mask, libc::SFD_NONBLOCK | libc::SFD_CLOEXEC);
            if fd < 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }
            self.register(fd, token, Interest::READABLE)?;
            Ok(SignalWatch { fd })
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

/// RAII handle for a `signalfd` registration created by
/// [`Reactor::watch_signal`]; closing it unblocks the signal's normal
/// disposition is left to the caller (the mask is process-wide).
pub struct SignalWatch {
    fd: RawFd,
}

impl SignalWatch {
    /// Reads and clears the pending `signalfd_siginfo`, returning the
    /// signal number that fired.
    pub fn read(&self) -> Result<libc::c_int> {
        let mut info: libc::signalfd_siginfo = unsafe { std::mem::zeroed() };
        let n = unsafe {
            libc::read(
                self.fd,
                &mut info as *mut _ as *mut libc::c_void,
                std::mem::size_of::<libc::signalfd_siginfo>(),
            )
        };
        if n < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(info.ssi_signo as libc::c_int)
    }
}

impl Drop for SignalWatch {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn interest_to_epoll(interest: Interest) -> u32 {
    let mut bits = 0i32;
    if interest.is_readable() {
        bits |= libc::EPOLLIN | libc::EPOLLRDHUP;
    }
    if interest.is_writable() {
        bits |= libc::EPOLLOUT;
    }
    bits as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn registers_and_observes_readiness_on_a_socket_pair() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut reactor = Reactor::new().unwrap();
        reactor.register(a.as_raw_fd(), Token(7), Interest::READABLE).unwrap();

        std::io::Write::write_all(&mut { b.try_clone().unwrap() }, b"hi").unwrap();

        let readiness = reactor.poll(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(readiness.len(), 1);
        assert_eq!(readiness[0].token, Token(7));
        assert!(readiness[0].readable);
    }

    #[test]
    fn poll_times_out_with_no_events() {
        let mut reactor = Reactor::new().unwrap();
        let readiness = reactor.poll(Some(Duration::from_millis(10))).unwrap();
        assert!(readiness.is_empty());
    }
}
