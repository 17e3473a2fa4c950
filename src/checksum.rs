//! Internet checksum (RFC 1071).

/// Sums big-endian 16-bit words, pads an odd trailing byte with a zero low
/// byte, folds the carries back in and returns the one's complement.
pub fn checksum(buffer: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut words = buffer.chunks_exact(2);
    for word in &mut words {
        sum = sum.wrapping_add(u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let [last] = words.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// True when the buffer, checksum field included, sums to zero.
pub fn verify(buffer: &[u8]) -> bool {
    checksum(buffer) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer() {
        assert_eq!(checksum(&[]), 0xFFFF);
    }

    #[test]
    fn all_zeros() {
        assert_eq!(checksum(&[0u8; 20]), 0xFFFF);
    }

    #[test]
    fn all_ones_fold_to_zero() {
        assert_eq!(checksum(&[0xFFu8; 20]), 0);
    }

    #[test]
    fn rfc1071_example() {
        // Example words from RFC 1071 section 3: sum is 0xddf2.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum(&data), !0xddf2);
    }

    #[test]
    fn odd_length_pads_low_byte() {
        assert_eq!(checksum(&[0x12, 0x34, 0x56]), checksum(&[0x12, 0x34, 0x56, 0x00]));
    }

    #[test]
    fn folded_back_checksum_verifies() {
        let mut ip_header = [
            0x45, 0x00, 0x00, 0x3c, 0x1c, 0x46, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00, 0xac, 0x10,
            0x0a, 0x63, 0xac, 0x10, 0x0a, 0x0c,
        ];
        let sum = checksum(&ip_header);
        ip_header[10..12].copy_from_slice(&sum.to_be_bytes());
        assert!(verify(&ip_header));
        assert_eq!(sum, 0xb1e6);
    }

    #[test]
    fn folded_back_checksum_verifies_for_many_lengths() {
        for len in (4..64).step_by(2) {
            let mut data: Vec<u8> = (0..len).map(|i| (i * 37 + 11) as u8).collect();
            data[2] = 0;
            data[3] = 0;
            let sum = checksum(&data);
            data[2..4].copy_from_slice(&sum.to_be_bytes());
            assert!(verify(&data), "length {}", len);
        }
    }
}
