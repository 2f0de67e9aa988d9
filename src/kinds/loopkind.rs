//! Backend-less ops shared by `LOOP` and `PORT` endpoints.
//!
//! Neither kind owns a kernel resource or interprets payloads itself — a
//! loopback's data goes to a caller-registered callback (`loopback.rs`) and a
//! port's data goes through the switch's dispatch policy (`switch.rs`).
//! The registry special-cases both kinds ahead of the generic `on_data`
//! path, so this type exists only to give every `Endpoint` a uniform
//! `Box<dyn EndpointOps>` to hold.

use crate::endpoint::{EndpointKind, EndpointOps};
use crate::error::Result;

pub struct NullOps {
    kind: EndpointKind,
}

impl NullOps {
    pub fn new(kind: EndpointKind) -> NullOps {
        NullOps { kind }
    }
}

impl EndpointOps for NullOps {
    fn kind(&self) -> EndpointKind {
        self.kind
    }

    fn open(&mut self, _path_params: &str) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn on_data(&mut self, _payload: &[u8], _reply: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}
