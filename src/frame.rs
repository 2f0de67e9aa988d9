//! Length-prefix framing over byte streams.
//!
//! Every message on an in-process or on-wire channel managed by the core is
//! `len:u32 BE ‖ payload[len]`: boundary-preserving, never delivered
//! truncated. Grounded in the original's `message.c` (`rteipc_msg_drain`,
//! `rteipc_msg_write`, `rteipc_evbuffer`).

use std::collections::VecDeque;
use std::io::{self, Write};

use crate::error::{Error, Result};

const LEN_PREFIX: usize = 4;

/// Pulls at most one frame out of `buf`, leaving any partial trailing frame
/// in place for the next call.
///
/// Returns `Ok(None)` if `buf` does not yet hold a complete frame (mirrors
/// `rteipc_msg_drain` returning `0`).
pub fn drain(buf: &mut VecDeque<u8>) -> Result<Option<Vec<u8>>> {
    if buf.len() < LEN_PREFIX {
        return Ok(None);
    }

    let mut len_bytes = [0u8; LEN_PREFIX];
    for (i, b) in buf.iter().take(LEN_PREFIX).enumerate() {
        len_bytes[i] = *b;
    }
    let len = u32::from_be_bytes(len_bytes) as usize;

    if buf.len() < LEN_PREFIX + len {
        return Ok(None);
    }

    buf.drain(..LEN_PREFIX);
    let payload: Vec<u8> = buf.drain(..len).collect();
    Ok(Some(payload))
}

/// Prepends a 4-byte big-endian length prefix to `payload` and appends the
/// result to `out`. Mirrors `rteipc_evbuffer`/`rteipc_buffer`.
pub fn frame_into(out: &mut Vec<u8>, payload: &[u8]) -> Result<()> {
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| Error::protocol("payload too large to frame"))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Frames `payload` into a fresh `Vec<u8>`.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(LEN_PREFIX + payload.len());
    frame_into(&mut out, payload)?;
    Ok(out)
}

/// Writes `bytes` to `w` until complete, retrying on `Interrupted`/`WouldBlock`.
/// Any other error is propagated; the caller is responsible for closing the
/// underlying fd on failure (mirrors `rteipc_msg_write`).
pub fn write_all<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    let mut offset = 0;
    while offset < bytes.len() {
        match w.write(&bytes[offset..]) {
            Ok(0) => return Err(Error::Io(io::Error::from(io::ErrorKind::WriteZero))),
            Ok(n) => offset += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_none_on_partial_header() {
        let mut buf = VecDeque::from(vec![0u8, 0, 0]);
        assert_eq!(drain(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn drain_returns_none_on_partial_payload() {
        let mut buf = VecDeque::new();
        buf.extend(5u32.to_be_bytes());
        buf.extend([1, 2, 3]);
        assert_eq!(drain(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn drain_yields_exactly_one_frame_and_keeps_the_rest() {
        let mut buf = VecDeque::new();
        buf.extend(frame(b"foo").unwrap());
        buf.extend(frame(b"bar").unwrap());

        assert_eq!(drain(&mut buf).unwrap(), Some(b"foo".to_vec()));
        assert_eq!(drain(&mut buf).unwrap(), Some(b"bar".to_vec()));
        assert_eq!(drain(&mut buf).unwrap(), None);
    }

    #[test]
    fn empty_payload_frames_to_a_zero_length_header() {
        let framed = frame(b"").unwrap();
        assert_eq!(framed, 0u32.to_be_bytes().to_vec());

        let mut buf = VecDeque::from(framed);
        assert_eq!(drain(&mut buf).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn wire_capture_matches_hello_scenario() {
        // A bare `"foo"` payload frames to `00 00 00 03 66 6F 6F`.
        let framed = frame(b"foo").unwrap();
        assert_eq!(framed, vec![0x00, 0x00, 0x00, 0x03, 0x66, 0x6F, 0x6F]);
    }
}
