//! Descriptor sets for select
//!
//! A fixed-size bitmap, one bit per descriptor, laid out in 64-bit blocks.
//! These are plain values, not shared atomics: a select call copies the
//! caller's sets in, builds fresh output sets, and copies them back out.

use crate::fd::Fd;

/// Number of descriptors an `FdSet` can hold
pub const FD_SETSIZE: usize = 1024;

/// Number of bits per block
const BITS_PER_BLOCK: usize = 64;

const NUM_BLOCKS: usize = FD_SETSIZE / BITS_PER_BLOCK;

/// A set of descriptors
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct FdSet {
    blocks: [u64; NUM_BLOCKS],
}

impl FdSet {
    /// Create an empty set
    #[inline]
    pub const fn new() -> Self {
        Self { blocks: [0; NUM_BLOCKS] }
    }

    #[inline]
    fn locate(fd: Fd) -> Option<(usize, u64)> {
        let idx = fd.index()?;
        if idx >= FD_SETSIZE {
            return None;
        }
        Some((idx / BITS_PER_BLOCK, 1u64 << (idx % BITS_PER_BLOCK)))
    }

    /// Add a descriptor; out-of-range descriptors are ignored
    #[inline]
    pub fn set(&mut self, fd: Fd) {
        if let Some((block, mask)) = Self::locate(fd) {
            self.blocks[block] |= mask;
        }
    }

    /// Remove a descriptor
    #[inline]
    pub fn clear(&mut self, fd: Fd) {
        if let Some((block, mask)) = Self::locate(fd) {
            self.blocks[block] &= !mask;
        }
    }

    /// Check membership
    #[inline]
    pub fn is_set(&self, fd: Fd) -> bool {
        match Self::locate(fd) {
            Some((block, mask)) => self.blocks[block] & mask != 0,
            None => false,
        }
    }

    /// Remove every descriptor
    #[inline]
    pub fn zero(&mut self) {
        self.blocks = [0; NUM_BLOCKS];
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| *b == 0)
    }

    /// Number of descriptors in the set
    pub fn count(&self) -> usize {
        self.blocks.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// True if the two sets share at least one descriptor
    pub fn intersects(&self, other: &FdSet) -> bool {
        self.blocks.iter().zip(other.blocks.iter()).any(|(a, b)| a & b != 0)
    }

    /// Descriptors present in either set
    pub fn union(&self, other: &FdSet) -> FdSet {
        let mut out = *self;
        for (a, b) in out.blocks.iter_mut().zip(other.blocks.iter()) {
            *a |= *b;
        }
        out
    }

    /// Iterate members in ascending order
    pub fn iter(&self) -> FdSetIter<'_> {
        FdSetIter { set: self, block: 0, bits: self.blocks[0] }
    }

    /// Members below `limit`, ascending
    pub fn iter_below(&self, limit: Fd) -> impl Iterator<Item = Fd> + '_ {
        let limit = limit.as_raw();
        self.iter().take_while(move |fd| fd.as_raw() < limit)
    }
}

/// Optional-set helper: `select` accepts any of its three sets as absent
#[inline]
pub fn opt_is_set(set: Option<&FdSet>, fd: Fd) -> bool {
    set.map_or(false, |s| s.is_set(fd))
}

impl core::fmt::Debug for FdSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter().map(|fd| fd.as_raw())).finish()
    }
}

impl FromIterator<Fd> for FdSet {
    fn from_iter<I: IntoIterator<Item = Fd>>(iter: I) -> Self {
        let mut set = FdSet::new();
        for fd in iter {
            set.set(fd);
        }
        set
    }
}

/// Iterator over the members of an `FdSet`
pub struct FdSetIter<'a> {
    set: &'a FdSet,
    block: usize,
    bits: u64,
}

impl Iterator for FdSetIter<'_> {
    type Item = Fd;

    fn next(&mut self) -> Option<Fd> {
        loop {
            if self.bits != 0 {
                let bit = self.bits.trailing_zeros() as usize;
                self.bits &= self.bits - 1;
                return Some(Fd::new((self.block * BITS_PER_BLOCK + bit) as i32));
            }
            self.block += 1;
            if self.block >= NUM_BLOCKS {
                return None;
            }
            self.bits = self.set.blocks[self.block];
        }
    }
}
