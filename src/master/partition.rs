//! Host-based partitioning of the frontier across workers
//!
//! The SHA-1 digest space of host names is cut into ranges of
//! `floor(2^160 / n)` digests and worker `i` owns range `i`. The few digests
//! past the last full range go to worker `n - 1`. Only the host is hashed, so
//! every path of a host lands on the same worker.

use sha1::{Digest, Sha1};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    workers: usize,
}

impl Partitioner {
    /// `workers` must be at least one
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Index of the worker owning `host`
    pub fn owner_of(&self, host: &str) -> usize {
        let digest = Sha1::digest(host.to_ascii_lowercase().as_bytes());
        self.owner_of_digest(U160::from_be_bytes(&digest))
    }

    /// `min(floor(digest / floor(2^160 / n)), n - 1)`
    fn owner_of_digest(&self, digest: U160) -> usize {
        let n = self.workers as u64;
        let range = U160::TWO_POW_160.div_u64(n);
        let owner = digest.quotient(range).min(u128::from(n - 1));
        owner as usize
    }
}

/// Unsigned integer `hi * 2^128 + lo`, wide enough for 2^160
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct U160 {
    hi: u64,
    lo: u128,
}

impl U160 {
    const TWO_POW_160: U160 = U160 { hi: 1 << 32, lo: 0 };

    /// Reads a 20-byte big-endian digest
    fn from_be_bytes(bytes: &[u8]) -> Self {
        let mut hi = [0u8; 4];
        let mut lo = [0u8; 16];
        hi.copy_from_slice(&bytes[0..4]);
        lo.copy_from_slice(&bytes[4..20]);
        Self {
            hi: u64::from(u32::from_be_bytes(hi)),
            lo: u128::from_be_bytes(lo),
        }
    }

    fn div_u64(self, divisor: u64) -> Self {
        let divisor = u128::from(divisor);
        let hi = u128::from(self.hi) / divisor;
        let mut rem = u128::from(self.hi) % divisor;
        let mut lo = 0u128;
        for chunk in [self.lo >> 64, self.lo & u128::from(u64::MAX)] {
            let current = (rem << 64) | chunk;
            lo = (lo << 64) | (current / divisor);
            rem = current % divisor;
        }
        Self { hi: hi as u64, lo }
    }

    fn bit(&self, index: u32) -> bool {
        if index >= 128 {
            (self.hi >> (index - 128)) & 1 == 1
        } else {
            (self.lo >> index) & 1 == 1
        }
    }

    fn shl1(self, carry_in: bool) -> Self {
        Self {
            hi: (self.hi << 1) | (self.lo >> 127) as u64,
            lo: (self.lo << 1) | u128::from(carry_in),
        }
    }

    fn minus(self, other: Self) -> Self {
        let (lo, borrow) = self.lo.overflowing_sub(other.lo);
        Self {
            hi: self.hi - other.hi - u64::from(borrow),
            lo,
        }
    }

    /// Shift-subtract division; the quotient must fit in 128 bits
    fn quotient(self, divisor: Self) -> u128 {
        let mut quotient = 0u128;
        let mut rem = Self { hi: 0, lo: 0 };
        for index in (0..160).rev() {
            rem = rem.shl1(self.bit(index));
            quotient <<= 1;
            if rem >= divisor {
                rem = rem.minus(divisor);
                quotient |= 1;
            }
        }
        quotient
    }
}
