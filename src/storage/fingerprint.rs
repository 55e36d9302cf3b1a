//! Rabin fingerprinting of document bodies
//!
//! Bodies are treated as polynomials over GF(2) and reduced modulo a fixed
//! irreducible polynomial of degree 53, giving a 53-bit content identity.

use std::sync::OnceLock;

/// A content fingerprint; only the low 53 bits are ever set
pub type Fingerprint = u64;

/// Irreducible polynomial of degree 53
pub const POLYNOMIAL: u64 = 0x3DE9_DD57_CA44_8B;

const DEGREE: u32 = 53;
const SHIFT: u32 = DEGREE - 8;
const MASK: u64 = (1 << DEGREE) - 1;

/// `TABLE[t] = t * x^53 mod POLYNOMIAL` for every byte value `t`
fn table() -> &'static [u64; 256] {
    static TABLE: OnceLock<[u64; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        // x^(53+i) mod P for i in 0..8
        let mut powers = [0u64; 8];
        let mut r = POLYNOMIAL & MASK;
        for power in powers.iter_mut() {
            *power = r;
            r <<= 1;
            if r & (1 << DEGREE) != 0 {
                r ^= POLYNOMIAL;
            }
        }

        let mut table = [0u64; 256];
        for (t, entry) in table.iter_mut().enumerate() {
            *entry = powers
                .iter()
                .enumerate()
                .filter(|(bit, _)| t & (1 << bit) != 0)
                .fold(0, |acc, (_, power)| acc ^ power);
        }
        table
    })
}

/// Fingerprints a byte sequence
pub fn fingerprint(data: &[u8]) -> Fingerprint {
    let table = table();
    data.iter().fold(0u64, |f, &byte| {
        let top = (f >> SHIFT) as usize;
        (((f << 8) & MASK) | byte as u64) ^ table[top]
    })
}

/// Blob file name for a fingerprint: 16 lowercase hex digits
pub fn blob_name(fingerprint: Fingerprint) -> String {
    format!("{:016x}", fingerprint)
}
