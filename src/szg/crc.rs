/// The value the checksum register starts out with
const CRC_SEED: u16 = 0xFFFF;

/// Calculates the SYZYGY checksum for the given slice of `bytes`
///
/// The last two bytes of `bytes` are the storage location of the checksum itself and are not
/// part of the calculation. The shift and mix sequence is shared with the DNA firmware on the
/// peripheral and has to stay bit-exact.
pub fn compute(bytes: &[u8]) -> u16 {
    let end = bytes.len().saturating_sub(2);
    let mut crc = CRC_SEED;

    for byte in &bytes[..end] {
        let mut x = (crc >> 8) ^ *byte as u16;
        x ^= x >> 4;
        crc = (crc << 8) ^ (x << 12) ^ (x << 5) ^ x;
    }

    crc
}

/// Returns true when the big-endian checksum stored in the last two bytes of `bytes` matches the
/// checksum of the bytes before it
pub fn verify(bytes: &[u8]) -> bool {
    if bytes.len() < 2 {
        return false;
    }

    let stored = u16::from_be_bytes([bytes[bytes.len() - 2], bytes[bytes.len() - 1]]);

    compute(bytes) == stored
}

#[cfg(test)]
mod tests {
    use assert_hex::*;
    use hex_literal::hex;

    use super::*;

    const REFERENCE_HEADER: [u8; 40] = hex!("50 00 28 00 01 01 00 00 00 00 96 00 C8 00 01 00 78 00 4A 01 00 00 00 00 00 00 00 00 00 00 00 00 0A 08 0B 01 0A 00 B6 E7");

    #[test]
    fn it_should_compute_reference_header_checksum() {
        assert_eq_hex!(compute(&REFERENCE_HEADER), 0xB6E7);
        assert!(verify(&REFERENCE_HEADER));
    }

    #[test]
    fn it_should_ignore_the_checksum_slot() {
        let mut header = REFERENCE_HEADER;
        header[38] = 0x00;
        header[39] = 0x00;

        assert_eq_hex!(compute(&header), 0xB6E7);
    }

    #[test]
    fn it_should_compute_known_values() {
        assert_eq_hex!(compute(&[0u8; 40]), 0x4E5F);
        assert_eq_hex!(compute(&[0x12, 0x34, 0x00, 0x00]), 0x0EC9);
        assert_eq_hex!(compute(b"123456789\0\0"), 0x29B1);
    }

    #[test]
    fn it_should_return_the_seed_for_short_input() {
        assert_eq_hex!(compute(&[]), 0xFFFF);
        assert_eq_hex!(compute(&[0xAB, 0xCD]), 0xFFFF);
        assert!(!verify(&[0xFF]));
    }

    #[test]
    fn it_should_change_when_any_header_byte_changes() {
        for i in 0..38 {
            let mut header = REFERENCE_HEADER;
            header[i] ^= 0x01;

            assert_ne!(compute(&header), 0xB6E7, "byte {} did not affect the checksum", i);
            assert!(!verify(&header));
        }
    }
}
