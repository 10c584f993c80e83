//! 8-bit byte checksum shared by the header and whole-frame checks.

/// Wrapping byte sum. A single flipped bit always changes the result.
pub fn byte_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Checksum over several regions, as if they were one contiguous buffer.
pub fn byte_checksum_parts(parts: &[&[u8]]) -> u8 {
    parts
        .iter()
        .fold(0u8, |acc, part| acc.wrapping_add(byte_checksum(part)))
}

/// Verify data against an expected checksum.
pub fn verify(data: &[u8], expected: u8) -> bool {
    byte_checksum(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(byte_checksum(&[]), 0);
    }

    #[test]
    fn wraps_around() {
        assert_eq!(byte_checksum(&[0xff, 0x02]), 0x01);
    }

    #[test]
    fn parts_equal_contiguous() {
        let whole = b"hello l0 relay";
        let (a, b) = whole.split_at(5);
        assert_eq!(byte_checksum_parts(&[a, b]), byte_checksum(whole));
    }

    #[test]
    fn single_bit_flip_detected() {
        let data = vec![0x5a_u8; 64];
        let sum = byte_checksum(&data);
        for i in 0..data.len() {
            for bit in 0..8 {
                let mut tampered = data.clone();
                tampered[i] ^= 1 << bit;
                assert!(!verify(&tampered, sum));
            }
        }
    }
}
