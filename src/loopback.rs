//! Loopback endpoints (C9): a backend-less, globally name-keyed endpoint
//! that lets in-process code inject and observe traffic without a socket.
//!
//! Grounded in `ep_loop.c`'s global `lo_list` and `rteipc_xfer`/
//! `xfer_setcb` family. Duplicate names fail open; lookup is linear over a
//! small list, matching the original's stated design (`lookup is linear
//! over a small list`, §4.8).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::endpoint::EndpointKind;
use crate::error::{Error, Result};
use crate::kinds::loopkind::NullOps;
use crate::registry::Registry;

pub type LoopCallback = Box<dyn FnMut(&str, &[u8])>;

struct Entry {
    name: String,
    descriptor: usize,
    callback: Option<LoopCallback>,
}

/// The process-wide loopback name table.
#[derive(Default)]
pub struct LoopbackTable {
    entries: HashMap<usize, Rc<RefCell<Entry>>>,
    by_name: HashMap<String, usize>,
}

impl LoopbackTable {
    pub fn new() -> LoopbackTable {
        LoopbackTable::default()
    }

    /// Registers a new loopback named `name`, failing if the name is
    /// already taken or exceeds 15 bytes.
    pub fn open(&mut self, registry: &mut Registry, name: &str) -> Result<usize> {
        if name.len() > 15 {
            return Err(Error::invalid("loopback name exceeds 15 bytes"));
        }
        if self.by_name.contains_key(name) {
            return Err(Error::conflict(format!("loopback name already taken: {name}")));
        }

        let descriptor = registry.open_with_ops(Box::new(NullOps::new(EndpointKind::Loop)))?;
        let entry = Rc::new(RefCell::new(Entry {
            name: name.to_string(),
            descriptor,
            callback: None,
        }));
        self.entries.insert(descriptor, entry.clone());
        self.by_name.insert(name.to_string(), descriptor);

        registry.set_relay_hook(
            descriptor,
            Box::new(move |_registry: &mut Registry, payload: &[u8]| {
                let mut entry = entry.borrow_mut();
                let name = entry.name.clone();
                if let Some(cb) = entry.callback.as_mut() {
                    cb(&name, payload);
                }
            }),
        );
        Ok(descriptor)
    }

    pub fn close(&mut self, registry: &mut Registry, name: &str) {
        if let Some(descriptor) = self.by_name.remove(name) {
            self.entries.remove(&descriptor);
            registry.clear_relay_hook(descriptor);
            registry.close(descriptor);
        }
    }

    /// Removes `descriptor` from the loopback table, if it names one,
    /// without requiring the caller to already know its name. Used by the
    /// top-level `close` operation (§4.9), which closes by descriptor alone.
    pub fn close_by_descriptor(&mut self, registry: &mut Registry, descriptor: usize) {
        let Some(name) = self.entries.get(&descriptor).map(|e| e.borrow().name.clone()) else {
            return;
        };
        self.close(registry, &name);
    }

    /// Installs (or replaces) the receive callback for `name`'s loopback.
    pub fn setcb(&mut self, name: &str, callback: LoopCallback) -> Result<()> {
        let descriptor = *self
            .by_name
            .get(name)
            .ok_or_else(|| Error::not_found(format!("loopback: {name}")))?;
        self.entries.get(&descriptor).unwrap().borrow_mut().callback = Some(callback);
        Ok(())
    }

    /// Injects `payload` into `name`'s loopback as if it originated there,
    /// flowing out to its bound peer.
    pub fn xfer(&self, registry: &mut Registry, name: &str, payload: &[u8]) -> Result<()> {
        let descriptor = *self
            .by_name
            .get(name)
            .ok_or_else(|| Error::not_found(format!("loopback: {name}")))?;
        registry.inject(descriptor, payload)
    }

    /// See [`crate::switch::SwitchTable::evxfer`] for why this collapses
    /// onto `xfer` rather than taking a separate buffer type.
    pub fn evxfer(&self, registry: &mut Registry, name: &str, payload: &[u8]) -> Result<()> {
        self.xfer(registry, name, payload)
    }

    pub fn gpio_xfer(&self, registry: &mut Registry, name: &str, value: u8) -> Result<()> {
        self.xfer(registry, name, &crate::payload::gpio(value))
    }

    pub fn spi_xfer(&self, registry: &mut Registry, name: &str, tx: &[u8], read_flag: bool) -> Result<()> {
        self.xfer(registry, name, &crate::payload::spi(tx, read_flag))
    }

    pub fn i2c_xfer(&self, registry: &mut Registry, name: &str, addr: u16, tx: &[u8], rlen: u16) -> Result<()> {
        self.xfer(registry, name, &crate::payload::i2c(addr, tx, rlen))
    }

    pub fn sysfs_xfer(&self, registry: &mut Registry, name: &str, attr: &str, value: Option<&str>) -> Result<()> {
        self.xfer(registry, name, &crate::payload::sysfs(attr, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_fail_open() {
        let mut registry = Registry::new();
        let mut table = LoopbackTable::new();
        table.open(&mut registry, "lo").unwrap();
        assert!(table.open(&mut registry, "lo").is_err());
    }

    #[test]
    fn xfer_into_bound_peer_fires_the_other_sides_callback() {
        let mut registry = Registry::new();
        let mut table = LoopbackTable::new();
        let a = table.open(&mut registry, "a").unwrap();
        let b = table.open(&mut registry, "b").unwrap();
        registry.bind(a, b).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        table
            .setcb(
                "b",
                Box::new(move |name, payload| {
                    seen2.borrow_mut().push((name.to_string(), payload.to_vec()));
                }),
            )
            .unwrap();

        table.xfer(&mut registry, "a", b"ping").unwrap();
        assert_eq!(seen.borrow().as_slice(), &[("b".to_string(), b"ping".to_vec())]);
    }

    #[test]
    fn setcb_on_unknown_name_fails() {
        let mut table = LoopbackTable::new();
        assert!(table.setcb("nope", Box::new(|_, _| {})).is_err());
    }
}
