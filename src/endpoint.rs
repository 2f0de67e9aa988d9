//! Endpoint kinds, compatibility, and the endpoint record itself.
//!
//! Grounded in the original's `ep.h`/`ep_core.c`: a `struct rteipc_ep` with a
//! type tag and a v-table of `open`/`close`/`on_data`/`compatible`. Here the
//! v-table becomes the [`EndpointOps`] trait and the type tag becomes
//! [`EndpointKind`]; dispatch is a `match` on the kind inside the registry
//! rather than an indirect call through a function-pointer struct.

use std::collections::VecDeque;

use crate::peer::PeerChannelEnd;

/// The closed set of endpoint kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Ipc,
    Inet,
    Tty,
    Gpio,
    Spi,
    I2c,
    Sysfs,
    Loop,
    Port,
}

/// The outcome of checking whether two kinds may be bound (`ep_compatible`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// Neither kind accepts the other.
    Incompatible,
    /// Exactly one side accepts the other (only ever arises while one side
    /// is a PORT, whose ultimate peer is unknown at bind time).
    OneSided,
    /// Both sides accept each other.
    Bidirectional,
}

impl Compatibility {
    pub fn is_compatible(self) -> bool {
        !matches!(self, Compatibility::Incompatible)
    }
}

impl EndpointKind {
    /// Whether this kind's mask admits `other` (one direction only).
    ///
    /// IPC/INET/LOOP/PORT are universal acceptors (`COMPAT_ANY`); every other
    /// kind accepts only IPC/INET, mirroring `COMPAT_TTY`/`COMPAT_GPIO`/etc.
    /// each being `1 << EP_IPC` with no other bit set.
    fn accepts(self, other: EndpointKind) -> bool {
        use EndpointKind::*;
        match self {
            Ipc | Inet | Loop | Port => true,
            Tty | Gpio | Spi | I2c | Sysfs => matches!(other, Ipc | Inet),
        }
    }

    /// Combines both directions' acceptance into a [`Compatibility`] verdict
    /// (mirrors `ep_compatible` returning 2/1/0).
    pub fn compatible_with(self, other: EndpointKind) -> Compatibility {
        match (self.accepts(other), other.accepts(self)) {
            (true, true) => Compatibility::Bidirectional,
            (true, false) | (false, true) => Compatibility::OneSided,
            (false, false) => Compatibility::Incompatible,
        }
    }
}

/// Per-kind behavior the registry dispatches into. A kind's state lives in
/// whatever the implementor stores in [`Endpoint::state`]; `on_data` is
/// handed the bytes that arrived on the peer channel (already de-framed by
/// the registry's drain loop — see `registry.rs`) and writes its reply, if
/// any, back onto `reply`.
pub trait EndpointOps {
    fn kind(&self) -> EndpointKind;

    /// Performs any kind-specific setup implied by the URI path/parameters.
    /// Called once, immediately after registration; failure here causes the
    /// registry to unregister and free the descriptor.
    fn open(&mut self, path_params: &str) -> crate::error::Result<()>;

    /// Releases kind-specific resources. Called once, from `close`, after
    /// any existing bind has been torn down.
    fn close(&mut self);

    /// Handles one de-framed payload arriving from the bound peer channel.
    /// Implementations that want to emit a reply write raw (unframed) bytes
    /// into `reply`; the registry frames it and forwards it back across the
    /// peer channel after the call returns. Not called for `Ipc`/`Inet`,
    /// which relay bytes verbatim instead of interpreting payloads (see
    /// `registry.rs`).
    fn on_data(&mut self, payload: &[u8], reply: &mut Vec<u8>) -> crate::error::Result<()>;

    /// Pushes raw bytes that arrived on the bound peer channel straight to
    /// this endpoint's backend, with no framing applied. Only meaningful
    /// for `Ipc`/`Inet`, which relay an already-framed byte stream verbatim
    /// rather than interpreting payloads (see `registry.rs`); every other
    /// kind leaves the default no-op.
    fn on_relay(&mut self, raw: &[u8]) -> crate::error::Result<()> {
        let _ = raw;
        Ok(())
    }

    /// The kind's own kernel fd, if any, that the reactor should watch for
    /// readiness independent of the peer channel (a GPIO line fd, a TTY
    /// device fd, an IPC listener/client socket fd).
    fn poll_fd(&self) -> Option<std::os::unix::io::RawFd> {
        None
    }

    /// Called when [`poll_fd`](EndpointOps::poll_fd)'s descriptor becomes
    /// ready. Implementations that want to push data out to the bound peer
    /// write raw bytes into `out`; the registry frames and forwards it,
    /// discarding silently if the endpoint is currently unbound (matches
    /// the GPIO input-line behavior in the original).
    fn on_ready(&mut self, readable: bool, writable: bool, out: &mut Vec<u8>) -> crate::error::Result<()> {
        let _ = (readable, writable, out);
        Ok(())
    }
}

/// A live endpoint record (mirrors `struct rteipc_ep`).
pub struct Endpoint {
    pub descriptor: usize,
    pub kind: EndpointKind,
    pub ops: Box<dyn EndpointOps>,
    /// The live end of this endpoint's peer channel, set at bind time and
    /// cleared at unbind/close.
    pub peer_end: Option<PeerChannelEnd>,
    /// The descriptor of the bound partner, kept in lockstep with
    /// `peer_end` so invariant 2 (`peer(a)=b ∧ peer(b)=a`) is checkable by
    /// inspection.
    pub peer_descriptor: Option<usize>,
    /// Bytes read off the peer channel but not yet reassembled into a whole
    /// frame.
    pub inbox: VecDeque<u8>,
}

impl Endpoint {
    pub fn new(descriptor: usize, ops: Box<dyn EndpointOps>) -> Endpoint {
        let kind = ops.kind();
        Endpoint {
            descriptor,
            kind,
            ops,
            peer_end: None,
            peer_descriptor: None,
            inbox: VecDeque::new(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.peer_descriptor.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_is_bidirectionally_compatible_with_tty() {
        assert_eq!(
            EndpointKind::Ipc.compatible_with(EndpointKind::Tty),
            Compatibility::Bidirectional
        );
        assert_eq!(
            EndpointKind::Tty.compatible_with(EndpointKind::Ipc),
            Compatibility::Bidirectional
        );
    }

    #[test]
    fn tty_and_gpio_are_incompatible_with_each_other() {
        assert_eq!(
            EndpointKind::Tty.compatible_with(EndpointKind::Gpio),
            Compatibility::Incompatible
        );
    }

    #[test]
    fn port_is_one_sided_with_every_restricted_kind() {
        // A PORT accepts anything, but GPIO only accepts IPC/INET, so the
        // pair is one-sided rather than bidirectional or incompatible.
        assert_eq!(
            EndpointKind::Port.compatible_with(EndpointKind::Gpio),
            Compatibility::OneSided
        );
    }

    #[test]
    fn loop_is_universal() {
        for kind in [
            EndpointKind::Ipc,
            EndpointKind::Inet,
            EndpointKind::Tty,
            EndpointKind::Gpio,
            EndpointKind::Spi,
            EndpointKind::I2c,
            EndpointKind::Sysfs,
            EndpointKind::Port,
        ] {
            assert!(EndpointKind::Loop.compatible_with(kind).is_compatible());
        }
    }
}
