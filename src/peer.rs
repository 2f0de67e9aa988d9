//! The binding fabric: a bidirectional in-memory byte pipe joining two bound
//! endpoints (C6).
//!
//! The original pairs endpoints with `bufferevent_pair`, a libevent
//! construct backed by a socket pair under the hood. The design notes
//! explicitly permit a pair of in-memory queues with reactor wakeups
//! instead; since `epfabric`'s whole core runs single-threaded and
//! callbacks are re-entrant within the loop (see the registry's dispatch
//! loop), there is no cross-thread handoff to justify a real fd pair here.
//! A write to one end is therefore visible to the other immediately, and
//! the registry drives delivery synchronously rather than waiting for a
//! readiness notification that would always already be true.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::{Error, Result};

/// Bound so a runaway writer (e.g. a GPIO producing edges faster than its
/// peer drains them) cannot grow memory without limit; the registry surfaces
/// this as implicit back-pressure rather than blocking the loop.
pub const PEER_CHANNEL_CAPACITY: usize = 256 * 1024;

struct Buf {
    data: RefCell<VecDeque<u8>>,
}

/// One side of a bound pair. Writing queues bytes for the *other* side to
/// read; reading drains bytes the other side has queued for *this* side.
/// Cheap to clone: both directions are reference-counted, so a clone is
/// just another handle onto the same shared buffers.
#[derive(Clone)]
pub struct PeerChannelEnd {
    outbound: Rc<Buf>,
    inbound: Rc<Buf>,
}

impl PeerChannelEnd {
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut data = self.outbound.data.borrow_mut();
        if data.len() + bytes.len() > PEER_CHANNEL_CAPACITY {
            return Err(Error::ResourceExhausted(
                "peer channel buffer full".to_string(),
            ));
        }
        data.extend(bytes);
        Ok(())
    }

    /// Removes and returns everything currently queued for this side.
    pub fn take_readable(&self) -> Vec<u8> {
        self.inbound.data.borrow_mut().drain(..).collect()
    }

    pub fn has_readable(&self) -> bool {
        !self.inbound.data.borrow().is_empty()
    }
}

/// Creates a fresh bidirectional channel and returns its two ends.
pub fn channel() -> (PeerChannelEnd, PeerChannelEnd) {
    let a = Rc::new(Buf {
        data: RefCell::new(VecDeque::new()),
    });
    let b = Rc::new(Buf {
        data: RefCell::new(VecDeque::new()),
    });
    (
        PeerChannelEnd {
            outbound: a.clone(),
            inbound: b.clone(),
        },
        PeerChannelEnd {
            outbound: b,
            inbound: a,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_on_one_end_is_readable_on_the_other() {
        let (a, b) = channel();
        a.write(b"hello").unwrap();
        assert!(!a.has_readable());
        assert!(b.has_readable());
        assert_eq!(b.take_readable(), b"hello");
        assert!(!b.has_readable());
    }

    #[test]
    fn write_past_capacity_is_rejected() {
        let (a, _b) = channel();
        let chunk = vec![0u8; PEER_CHANNEL_CAPACITY];
        a.write(&chunk).unwrap();
        assert!(a.write(&[1]).is_err());
    }
}
