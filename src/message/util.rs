/// Compute the log-base-two of the next power of two: 8 -> 3, 9 -> 4.
///
pub fn ceil_log2(x: usize) -> usize {
    let mut n = 0;
    while 1 << n < x {
        n += 1
    }
    n
}

/// Read a little-endian f64 out of a reduction buffer. Buffers shorter than
/// eight bytes are zero-padded.
///
pub fn f64_from_bytes(bytes: &[u8]) -> f64 {
    let mut buffer = [0; 8];
    let n = bytes.len().min(8);
    buffer[..n].copy_from_slice(&bytes[..n]);
    f64::from_le_bytes(buffer)
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn ceil_log2_rounds_up() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
    }

    #[test]
    fn floats_survive_the_byte_buffer() {
        assert_eq!(f64_from_bytes(&2.25f64.to_le_bytes()), 2.25);
    }
}
