// crc.rs -- 16-bit CCITT CRC (polynomial 0x1021)
//
// Used to confirm that both ends of a connection simulate movement with the
// same tunables. Delegates to the `crc` crate (CRC-16/IBM-3740, also known as
// CRC-16/CCITT-FALSE).

use crc::{Crc, CRC_16_IBM_3740};

const CRC_CALC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute CRC for an entire block of data.
pub fn crc_block(data: &[u8]) -> u16 {
    CRC_CALC.checksum(data)
}

/// CRC over a run of floats, hashed by their little-endian bit patterns so
/// that values which print alike but differ in the last bit still differ.
pub fn crc_floats(values: &[f32]) -> u16 {
    let mut digest = CRC_CALC.digest();
    for v in values {
        digest.update(&v.to_le_bytes());
    }
    digest.finalize()
}
