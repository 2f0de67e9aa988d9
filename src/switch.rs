//! Switch & ports (C8): a named directory of `PORT`-kind endpoints with
//! pluggable dispatch.
//!
//! The original's switch (`switch.c`) wired ports together through an
//! internal rendezvous Unix socket with a randomly generated filename per
//! switch; that plumbing is superseded here by a direct in-process fan-out
//! table, since the only externally observable contract is the dispatch
//! policy in §4.7, not the transport the original used to implement it.
//!
//! Dispatch policy when a payload arrives at port P from its bound peer:
//! 1. per-port hook, if set;
//! 2. else switch-wide hook, if set;
//! 3. else broadcast to every other port whose bound peer is compatible
//!    with P's bound peer, skipping unbound ports.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::endpoint::EndpointKind;
use crate::error::{Error, Result};
use crate::kinds::loopkind::NullOps;
use crate::registry::Registry;

pub type PortHook = Box<dyn FnMut(&mut Registry, &[u8])>;
pub type SwitchHook = Box<dyn FnMut(&mut Registry, &str, &[u8])>;

struct PortEntry {
    name: String,
    descriptor: usize,
    hook: Option<PortHook>,
}

struct SwitchInner {
    ports: Vec<usize>, // descriptors, in creation order (for broadcast traversal)
    by_descriptor: HashMap<usize, Rc<RefCell<PortEntry>>>,
    by_name: HashMap<String, usize>,
    switch_hook: Option<SwitchHook>,
}

pub struct SwitchTable {
    switches: HashMap<usize, Rc<RefCell<SwitchInner>>>,
    /// Reverse lookup from a port's endpoint descriptor to its owning
    /// switch, so a top-level `close(descriptor)` can find and clean up
    /// the port's switch membership without the caller knowing it came
    /// from a switch at all.
    owner_of: HashMap<usize, usize>,
    next_id: usize,
}

impl SwitchTable {
    pub fn new() -> SwitchTable {
        SwitchTable { switches: HashMap::new(), owner_of: HashMap::new(), next_id: 0 }
    }

    pub fn switch_create(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.switches.insert(
            id,
            Rc::new(RefCell::new(SwitchInner {
                ports: Vec::new(),
                by_descriptor: HashMap::new(),
                by_name: HashMap::new(),
                switch_hook: None,
            })),
        );
        id
    }

    fn inner(&self, switch: usize) -> Result<Rc<RefCell<SwitchInner>>> {
        self.switches
            .get(&switch)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("switch {switch}")))
    }

    /// Creates a new `PORT` endpoint named `name` under `switch`.
    pub fn port(&mut self, registry: &mut Registry, switch: usize, name: &str) -> Result<usize> {
        if name.len() > 15 {
            return Err(Error::invalid("port name exceeds 15 bytes"));
        }
        let inner = self.inner(switch)?;
        if inner.borrow().by_name.contains_key(name) {
            return Err(Error::conflict(format!("port name already taken: {name}")));
        }

        let descriptor = registry.open_with_ops(Box::new(NullOps::new(EndpointKind::Port)))?;
        let entry = Rc::new(RefCell::new(PortEntry {
            name: name.to_string(),
            descriptor,
            hook: None,
        }));
        {
            let mut inner_mut = inner.borrow_mut();
            inner_mut.ports.push(descriptor);
            inner_mut.by_descriptor.insert(descriptor, entry);
            inner_mut.by_name.insert(name.to_string(), descriptor);
        }
        self.owner_of.insert(descriptor, switch);

        let inner_for_hook = inner.clone();
        registry.set_relay_hook(
            descriptor,
            Box::new(move |registry, payload| {
                dispatch(registry, &inner_for_hook, descriptor, payload);
            }),
        );
        Ok(descriptor)
    }

    pub fn port_close(&mut self, registry: &mut Registry, switch: usize, name: &str) {
        let Ok(inner) = self.inner(switch) else { return };
        let descriptor = inner.borrow_mut().by_name.remove(name);
        if let Some(descriptor) = descriptor {
            inner.borrow_mut().by_descriptor.remove(&descriptor);
            inner.borrow_mut().ports.retain(|&d| d != descriptor);
            self.owner_of.remove(&descriptor);
            registry.clear_relay_hook(descriptor);
            registry.close(descriptor);
        }
    }

    /// Removes `descriptor` from whichever switch owns it, if any, without
    /// requiring the caller to know the switch or port name. Used by the
    /// top-level `close` operation (§4.9), which closes by descriptor alone.
    pub fn close_port_by_descriptor(&mut self, registry: &mut Registry, descriptor: usize) {
        let Some(&switch) = self.owner_of.get(&descriptor) else { return };
        let Some(name) = self
            .switches
            .get(&switch)
            .and_then(|inner| inner.borrow().by_descriptor.get(&descriptor).map(|e| e.borrow().name.clone()))
        else {
            return;
        };
        self.port_close(registry, switch, &name);
    }

    pub fn switch_setcb(&mut self, switch: usize, hook: SwitchHook) -> Result<()> {
        self.inner(switch)?.borrow_mut().switch_hook = Some(hook);
        Ok(())
    }

    pub fn port_setcb(&mut self, switch: usize, name: &str, hook: PortHook) -> Result<()> {
        let inner = self.inner(switch)?;
        let descriptor = *inner
            .borrow()
            .by_name
            .get(name)
            .ok_or_else(|| Error::not_found(format!("port: {name}")))?;
        inner.borrow().by_descriptor.get(&descriptor).unwrap().borrow_mut().hook = Some(hook);
        Ok(())
    }

    /// Injects `payload` into port `name` as though it arrived from its
    /// bound peer.
    pub fn xfer(&self, registry: &mut Registry, switch: usize, name: &str, payload: &[u8]) -> Result<()> {
        let inner = self.inner(switch)?;
        let descriptor = *inner
            .borrow()
            .by_name
            .get(name)
            .ok_or_else(|| Error::not_found(format!("port: {name}")))?;
        registry.inject(descriptor, payload)
    }

    /// `evxfer` collapses onto `xfer`: the original's separate
    /// payload-pointer-plus-length and `evbuffer` overloads exist only
    /// because C has no owned, length-carrying byte-slice type; a Rust
    /// `&[u8]` already carries its own length, so one entry point covers
    /// both (see `DESIGN.md`).
    pub fn evxfer(&self, registry: &mut Registry, switch: usize, name: &str, payload: &[u8]) -> Result<()> {
        self.xfer(registry, switch, name, payload)
    }

    pub fn gpio_xfer(&self, registry: &mut Registry, switch: usize, name: &str, value: u8) -> Result<()> {
        self.xfer(registry, switch, name, &crate::payload::gpio(value))
    }

    pub fn spi_xfer(&self, registry: &mut Registry, switch: usize, name: &str, tx: &[u8], read_flag: bool) -> Result<()> {
        self.xfer(registry, switch, name, &crate::payload::spi(tx, read_flag))
    }

    pub fn i2c_xfer(&self, registry: &mut Registry, switch: usize, name: &str, addr: u16, tx: &[u8], rlen: u16) -> Result<()> {
        self.xfer(registry, switch, name, &crate::payload::i2c(addr, tx, rlen))
    }

    pub fn sysfs_xfer(&self, registry: &mut Registry, switch: usize, name: &str, attr: &str, value: Option<&str>) -> Result<()> {
        self.xfer(registry, switch, name, &crate::payload::sysfs(attr, value))
    }
}

impl Default for SwitchTable {
    fn default() -> SwitchTable {
        SwitchTable::new()
    }
}

/// Runs the dispatch policy for a payload that just arrived at `src`
/// (already de-framed). `inner` is the owning switch's shared state.
fn dispatch(registry: &mut Registry, inner: &Rc<RefCell<SwitchInner>>, src: usize, payload: &[u8]) {
    let per_port_hook_present = inner
        .borrow()
        .by_descriptor
        .get(&src)
        .map(|e| e.borrow().hook.is_some())
        .unwrap_or(false);

    if per_port_hook_present {
        let entry = inner.borrow().by_descriptor.get(&src).unwrap().clone();
        let mut hook = entry.borrow_mut().hook.take();
        if let Some(h) = hook.as_mut() {
            h(registry, payload);
        }
        entry.borrow_mut().hook = hook;
        return;
    }

    let switch_hook_present = inner.borrow().switch_hook.is_some();
    if switch_hook_present {
        let src_name = inner
            .borrow()
            .by_descriptor
            .get(&src)
            .map(|e| e.borrow().name.clone())
            .unwrap_or_default();
        let mut hook = inner.borrow_mut().switch_hook.take();
        if let Some(h) = hook.as_mut() {
            h(registry, &src_name, payload);
        }
        inner.borrow_mut().switch_hook = hook;
        return;
    }

    // Default: broadcast to every other port whose bound peer is
    // compatible with src's bound peer, skipping unbound ports.
    let src_peer_kind = registry.lookup(src).and_then(|e| e.peer_descriptor).and_then(|p| registry.lookup(p)).map(|e| e.kind);
    let Some(src_peer_kind) = src_peer_kind else { return };

    let targets: Vec<usize> = inner.borrow().ports.iter().copied().filter(|&d| d != src).collect();
    for target in targets {
        let target_peer_kind = registry
            .lookup(target)
            .and_then(|e| e.peer_descriptor)
            .and_then(|p| registry.lookup(p))
            .map(|e| e.kind);
        let Some(target_peer_kind) = target_peer_kind else { continue };
        if src_peer_kind.compatible_with(target_peer_kind).is_compatible() {
            let _ = registry.inject(target, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Opens a fresh, uniquely-named IPC endpoint to stand in for a port's
    /// bound peer (the thing a real connected client would sit behind).
    /// Each call gets its own abstract-namespace name so tests in this
    /// module never collide with each other.
    fn fresh_peer(registry: &mut Registry, label: &str) -> usize {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        registry
            .open(&format!("ipc://@epfabric-switch-test-{label}-{n}"))
            .unwrap()
    }

    /// A payload only runs through the switch's dispatch policy when it
    /// arrives *at* a port *from* its bound peer (§4.7) — `xfer` instead
    /// injects from in-process code outward through the port, which never
    /// touches dispatch. So to exercise dispatch here we inject from the
    /// peer side, exactly as a connected client's bytes would arrive.
    fn deliver_from_peer(registry: &mut Registry, peer: usize, payload: &[u8]) {
        registry.inject(peer, payload).unwrap();
    }

    #[test]
    fn default_broadcast_reaches_every_other_compatible_port() {
        let mut registry = Registry::new();
        let mut switches = SwitchTable::new();
        let sw = switches.switch_create();

        let p1 = switches.port(&mut registry, sw, "p1").unwrap();
        let p2 = switches.port(&mut registry, sw, "p2").unwrap();
        let p3 = switches.port(&mut registry, sw, "p3").unwrap();

        let peer1 = fresh_peer(&mut registry, "bcast-1");
        let peer2 = fresh_peer(&mut registry, "bcast-2");
        let peer3 = fresh_peer(&mut registry, "bcast-3");
        registry.bind(p1, peer1).unwrap();
        registry.bind(p2, peer2).unwrap();
        registry.bind(p3, peer3).unwrap();

        deliver_from_peer(&mut registry, peer1, b"hi");

        assert!(registry.lookup(peer2).unwrap().peer_end.as_ref().unwrap().has_readable());
        assert!(registry.lookup(peer3).unwrap().peer_end.as_ref().unwrap().has_readable());
        assert!(
            !registry.lookup(peer1).unwrap().peer_end.as_ref().unwrap().has_readable(),
            "the sender's own peer must not receive an echo"
        );
    }

    #[test]
    fn per_port_hook_suppresses_default_broadcast() {
        let mut registry = Registry::new();
        let mut switches = SwitchTable::new();
        let sw = switches.switch_create();
        let p1 = switches.port(&mut registry, sw, "p1").unwrap();
        switches.port(&mut registry, sw, "p2").unwrap();

        let peer1 = fresh_peer(&mut registry, "hook-1");
        registry.bind(p1, peer1).unwrap();

        let calls = Rc::new(RefCell::new(Vec::new()));
        let calls2 = calls.clone();
        switches
            .port_setcb(
                sw,
                "p1",
                Box::new(move |_registry, payload| {
                    calls2.borrow_mut().push(payload.to_vec());
                }),
            )
            .unwrap();

        deliver_from_peer(&mut registry, peer1, b"hello");
        assert_eq!(calls.borrow().as_slice(), &[b"hello".to_vec()]);
    }
}
