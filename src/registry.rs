//! The endpoint registry (C4): open/close/bind/unbind/lookup, and the
//! dispatch loop that drains a bound peer channel and routes payloads into
//! each endpoint's behavior.
//!
//! Grounded in `ep_core.c`'s `register_endpoint`/`bind_endpoint`/
//! `unbind_endpoint`/`find_endpoint`, with the descriptor table itself
//! delegated to [`crate::slab::Slab`].

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use log::{trace, warn};

use crate::endpoint::{Endpoint, EndpointKind};
use crate::error::{Error, Result};
use crate::kinds;
use crate::peer::{self, PeerChannelEnd};
use crate::slab::Slab;
use crate::uri::{self, Address};

pub const DEFAULT_ENDPOINT_CAPACITY: usize = 128;

/// Installed by `loopback.rs`/`switch.rs` against a `Loop`/`Port`
/// descriptor so the registry can hand it de-framed payloads without
/// depending on either module directly. Takes `&mut Registry` because a
/// switch or loopback hook is allowed to call back into any core operation
/// re-entrantly (bind/close/xfer) per the on-data re-entrancy rule.
pub type RelayHook = Box<dyn FnMut(&mut Registry, &[u8])>;

pub struct Registry {
    endpoints: Slab<Endpoint>,
    device_fds: HashMap<RawFd, usize>,
    relay_hooks: HashMap<usize, RelayHook>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::with_capacity(DEFAULT_ENDPOINT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Registry {
        Registry {
            endpoints: Slab::with_capacity(capacity),
            device_fds: HashMap::new(),
            relay_hooks: HashMap::new(),
        }
    }

    pub fn lookup(&self, descriptor: usize) -> Option<&Endpoint> {
        self.endpoints.get(descriptor)
    }

    pub fn lookup_mut(&mut self, descriptor: usize) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(descriptor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Endpoint)> {
        self.endpoints.iter()
    }

    /// Parses `uri`, allocates a descriptor, and opens the kind's backend.
    /// On kind-open failure the descriptor is freed and never observable
    /// (§4.4: "never leak a partially-initialized object").
    pub fn open(&mut self, uri: &str) -> Result<usize> {
        let address: Address = uri::parse(uri)?;
        self.open_address(&address)
    }

    pub fn open_address(&mut self, address: &Address) -> Result<usize> {
        let ops = kinds::build(address).map_err(|e| {
            warn!("failed to open {:?} endpoint: {e}", address.kind);
            e
        })?;
        let descriptor = self.endpoints.insert_with(|descriptor| Endpoint::new(descriptor, ops))?;
        if let Some(fd) = self.endpoints.get(descriptor).unwrap().ops.poll_fd() {
            self.device_fds.insert(fd, descriptor);
        }
        trace!("opened {:?} endpoint {descriptor}", address.kind);
        Ok(descriptor)
    }

    /// Installs a pre-built ops object directly (used by `switch.rs`/
    /// `loopback.rs`, whose `PORT`/`LOOP` endpoints have no URI to parse).
    pub fn open_with_ops(&mut self, ops: Box<dyn crate::endpoint::EndpointOps>) -> Result<usize> {
        self.endpoints.insert_with(|descriptor| Endpoint::new(descriptor, ops))
    }

    pub fn set_relay_hook(&mut self, descriptor: usize, hook: RelayHook) {
        self.relay_hooks.insert(descriptor, hook);
    }

    pub fn clear_relay_hook(&mut self, descriptor: usize) {
        self.relay_hooks.remove(&descriptor);
    }

    /// Idempotent: closing an already-closed or unknown descriptor is a
    /// silent no-op (§4.9 failure behavior).
    pub fn close(&mut self, descriptor: usize) {
        if self.endpoints.get(descriptor).is_none() {
            return;
        }
        self.unbind(descriptor);
        if let Some(mut endpoint) = self.endpoints.remove(descriptor) {
            if let Some(fd) = endpoint.ops.poll_fd() {
                self.device_fds.remove(&fd);
            }
            endpoint.ops.close();
        }
        self.relay_hooks.remove(&descriptor);
    }

    /// Joins two endpoints with a fresh peer channel.
    pub fn bind(&mut self, a: usize, b: usize) -> Result<()> {
        if a == b {
            return Err(Error::invalid("cannot bind an endpoint to itself"));
        }
        let (kind_a, bound_a) = self.require(a)?;
        let (kind_b, bound_b) = self.require(b)?;
        if bound_a || bound_b {
            warn!("bind conflict: {a} <-> {b}, one side is already bound");
            return Err(Error::conflict("endpoint is already bound"));
        }
        if !kind_a.compatible_with(kind_b).is_compatible() {
            warn!("bind rejected: {kind_a:?} <-> {kind_b:?} are incompatible");
            return Err(Error::Incompatible(format!("{kind_a:?} <-> {kind_b:?}")));
        }
        trace!("bound {a} ({kind_a:?}) <-> {b} ({kind_b:?})");

        let (end_a, end_b) = peer::channel();
        {
            let ep_a = self.endpoints.get_mut(a).unwrap();
            ep_a.peer_end = Some(end_a);
            ep_a.peer_descriptor = Some(b);
        }
        {
            let ep_b = self.endpoints.get_mut(b).unwrap();
            ep_b.peer_end = Some(end_b);
            ep_b.peer_descriptor = Some(a);
        }
        Ok(())
    }

    fn require(&self, descriptor: usize) -> Result<(EndpointKind, bool)> {
        let ep = self
            .endpoints
            .get(descriptor)
            .ok_or_else(|| Error::not_found(format!("descriptor {descriptor}")))?;
        Ok((ep.kind, ep.is_bound()))
    }

    /// Idempotent: unbinding an unbound or unknown descriptor is a no-op.
    pub fn unbind(&mut self, descriptor: usize) {
        let partner = match self.endpoints.get_mut(descriptor) {
            Some(ep) => ep.peer_descriptor.take(),
            None => return,
        };
        if let Some(ep) = self.endpoints.get_mut(descriptor) {
            ep.peer_end = None;
        }
        if let Some(partner) = partner {
            if let Some(ep) = self.endpoints.get_mut(partner) {
                ep.peer_end = None;
                ep.peer_descriptor = None;
            }
        }
    }

    /// Injects `payload` as though it arrived on `descriptor`'s bound peer
    /// channel, framing it first. Used by the switch/loopback `xfer`
    /// families to push data "from in-process code" through an endpoint's
    /// normal dispatch path.
    pub fn inject(&mut self, descriptor: usize, payload: &[u8]) -> Result<()> {
        if self.endpoints.get(descriptor).and_then(|ep| ep.peer_descriptor).is_none() {
            return Err(Error::not_found(format!("descriptor {descriptor} is unbound")));
        }
        let framed = crate::frame::frame(payload)?;
        self.write_and_dispatch(descriptor, &framed)
    }

    /// Writes `bytes` onto `from`'s outgoing peer-channel buffer — making
    /// them readable on the bound partner's side — then immediately
    /// services that partner, since the binding fabric has no real fd to
    /// wait on a readiness notification from.
    fn write_and_dispatch(&mut self, from: usize, bytes: &[u8]) -> Result<()> {
        let peer_descriptor = self.endpoints.get(from).and_then(|ep| ep.peer_descriptor);
        {
            let ep = self.endpoints.get(from).unwrap();
            ep.peer_end.as_ref().unwrap().write(bytes)?;
        }
        match peer_descriptor {
            Some(peer) => self.dispatch_from(peer),
            None => Ok(()),
        }
    }

    /// The fds the reactor should be watching: every device fd a kind
    /// registered via `poll_fd`.
    pub fn device_fds(&self) -> impl Iterator<Item = (RawFd, usize)> + '_ {
        self.device_fds.iter().map(|(&fd, &d)| (fd, d))
    }

    /// Called by the broker when `descriptor`'s own device fd becomes
    /// ready (not the peer channel). Pulls whatever the kind produces and
    /// forwards it to the bound peer, if any.
    pub fn service_device_fd(&mut self, descriptor: usize, readable: bool, writable: bool) -> Result<()> {
        let mut out = Vec::new();
        let is_relay_kind = matches!(
            self.endpoints.get(descriptor).map(|e| e.kind),
            Some(EndpointKind::Ipc) | Some(EndpointKind::Inet)
        );
        {
            let ep = self
                .endpoints
                .get_mut(descriptor)
                .ok_or_else(|| Error::not_found(format!("descriptor {descriptor}")))?;
            ep.ops.on_ready(readable, writable, &mut out)?;
        }
        if !out.is_empty() && self.endpoints.get(descriptor).map(|e| e.is_bound()) != Some(true) {
            trace!("dropping {} byte(s) from unbound endpoint {descriptor}", out.len());
        }
        if out.is_empty() || self.endpoints.get(descriptor).map(|e| e.is_bound()) != Some(true) {
            // Either nothing produced, or the endpoint is unbound: in the
            // latter case discard silently (generalizes the GPIO
            // input-line "discard if unbound" rule to every kind).
            return Ok(());
        }
        let bytes = if is_relay_kind { out } else { crate::frame::frame(&out)? };
        self.write_and_dispatch(descriptor, &bytes)
    }

    /// Drains every complete frame currently queued on `descriptor`'s peer
    /// channel and routes each to the endpoint's behavior. `Ipc`/`Inet`
    /// bypass framing entirely and relay verbatim.
    pub fn dispatch_from(&mut self, descriptor: usize) -> Result<()> {
        let (peer_end, kind) = match self.endpoints.get(descriptor) {
            Some(ep) => (ep.peer_end.clone(), ep.kind),
            None => return Ok(()),
        };
        let Some(peer_end) = peer_end else { return Ok(()) };
        if !peer_end.has_readable() {
            return Ok(());
        }
        let incoming = peer_end.take_readable();

        if matches!(kind, EndpointKind::Ipc | EndpointKind::Inet) {
            let ep = self.endpoints.get_mut(descriptor).unwrap();
            return ep.ops.on_relay(&incoming);
        }

        self.endpoints.get_mut(descriptor).unwrap().inbox.extend(incoming);
        loop {
            let ep = self.endpoints.get_mut(descriptor).unwrap();
            let payload = match crate::frame::drain(&mut ep.inbox)? {
                Some(p) => p,
                None => break,
            };
            let mut reply = Vec::new();
            match ep.ops.on_data(&payload, &mut reply) {
                Ok(()) => {}
                // A broken fd is fatal to the endpoint; let the caller close it.
                Err(e @ Error::Io(_)) => {
                    warn!("endpoint {descriptor} data-path I/O error, closing: {e}");
                    return Err(e);
                }
                // Anything else (malformed payload, bad utf-8, wrong length) drops
                // only this frame; the binding and the rest of the drain loop continue.
                Err(e) => {
                    warn!("endpoint {descriptor} dropped a {}-byte frame: {e}", payload.len());
                    continue;
                }
            }

            // Temporarily take the hook out of the map so a re-entrant
            // call (e.g. a switch hook calling `xfer` on a sibling port)
            // can borrow `self` mutably without aliasing this borrow.
            if let Some(mut hook) = self.relay_hooks.remove(&descriptor) {
                hook(self, &payload);
                self.relay_hooks.insert(descriptor, hook);
            }

            if !reply.is_empty() {
                let framed = crate::frame::frame(&reply)?;
                self.write_and_dispatch(descriptor, &framed)?;
            }
        }
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}
