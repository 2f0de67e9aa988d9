//! Per-kind wire payload construction, shared by the client-session `send`
//! family (§4.9), the switch `xfer` family (§4.7) and the loopback `xfer`
//! family (§4.8). Each of those three call sites needs to build the exact
//! same bytes a [`crate::kinds`] implementation decodes in its `on_data`,
//! so the layout lives here once instead of being duplicated three times.

/// GPIO output payload: a single byte, 0 or 1 (§6 "GPIO out (to device)").
pub fn gpio(value: u8) -> Vec<u8> {
    vec![value]
}

/// SPI payload: `tx_len:u16 host-endian ‖ rd_flag:u8 ‖ tx[tx_len]`
/// (§6 "SPI in (to device)").
pub fn spi(tx: &[u8], read_flag: bool) -> Vec<u8> {
    let tx_len = tx.len() as u16;
    let mut out = Vec::with_capacity(3 + tx.len());
    out.extend_from_slice(&tx_len.to_ne_bytes());
    out.push(read_flag as u8);
    out.extend_from_slice(tx);
    out
}

/// I2C payload: `addr:u16 ‖ wlen:u16 ‖ rlen:u16 ‖ tx[wlen]` (§6 "I2C in").
pub fn i2c(addr: u16, tx: &[u8], rlen: u16) -> Vec<u8> {
    let wlen = tx.len() as u16;
    let mut out = Vec::with_capacity(6 + tx.len());
    out.extend_from_slice(&addr.to_ne_bytes());
    out.extend_from_slice(&wlen.to_ne_bytes());
    out.extend_from_slice(&rlen.to_ne_bytes());
    out.extend_from_slice(tx);
    out
}

/// SYSFS payload: `attr` (read) or `attr=value` (write, §6 "SYSFS").
pub fn sysfs(attr: &str, value: Option<&str>) -> Vec<u8> {
    match value {
        Some(v) => format!("{attr}={v}").into_bytes(),
        None => attr.as_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpio_payload_is_a_single_byte() {
        assert_eq!(gpio(1), vec![1]);
        assert_eq!(gpio(0), vec![0]);
    }

    #[test]
    fn spi_payload_layout_matches_wire_spec() {
        let payload = spi(&[0xAB, 0xCD], true);
        assert_eq!(payload[0..2], 2u16.to_ne_bytes());
        assert_eq!(payload[2], 1);
        assert_eq!(&payload[3..], &[0xAB, 0xCD]);
    }

    #[test]
    fn spi_read_flag_is_zero_when_not_reading() {
        let payload = spi(&[0x01], false);
        assert_eq!(payload[2], 0);
    }

    #[test]
    fn i2c_payload_layout_matches_wire_spec() {
        let payload = i2c(0x20, &[0x01], 2);
        assert_eq!(payload[0..2], 0x20u16.to_ne_bytes());
        assert_eq!(payload[2..4], 1u16.to_ne_bytes());
        assert_eq!(payload[4..6], 2u16.to_ne_bytes());
        assert_eq!(&payload[6..], &[0x01]);
    }

    #[test]
    fn sysfs_read_has_no_equals_sign() {
        assert_eq!(sysfs("value", None), b"value".to_vec());
    }

    #[test]
    fn sysfs_write_joins_attr_and_value_with_equals() {
        assert_eq!(sysfs("brightness", Some("128")), b"brightness=128".to_vec());
    }

    #[test]
    fn sysfs_write_accepts_empty_value() {
        assert_eq!(sysfs("trigger", Some("")), b"trigger=".to_vec());
    }
}
