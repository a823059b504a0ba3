//! Portable integer encoding for block 0.
//!
//! Block 0 must be readable on any machine to tell the user where a swap
//! file came from, so its integers are written byte by byte, least
//! significant byte first, independent of the host's native layout.

/// Encode the low `out.len()` bytes of `value`, least significant first.
pub fn long_to_bytes(value: u64, out: &mut [u8]) {
    let mut n = value;
    for byte in out.iter_mut() {
        *byte = (n & 0xff) as u8;
        n >>= 8;
    }
}

/// Decode an integer written by [`long_to_bytes`].
pub fn bytes_to_long(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_order_is_fixed() {
        let mut buf = [0u8; 4];
        long_to_bytes(0x3031_3233, &mut buf);
        assert_eq!(buf, [0x33, 0x32, 0x31, 0x30]);
        assert_eq!(bytes_to_long(&buf), 0x3031_3233);
    }

    #[test]
    fn test_truncates_to_width() {
        let mut buf = [0u8; 2];
        long_to_bytes(0x1011_1213, &mut buf);
        assert_eq!(buf, [0x13, 0x12]);
        assert_eq!(bytes_to_long(&buf), 0x1213);
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(bytes_to_long(&[]), 0);
    }
}
