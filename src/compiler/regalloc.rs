//! Register allocation for one scope.
//!
//! Registers are handed out lowest-first from a bitset. Registers 240 to 255
//! are never handed out by [`RegisterAllocator::allocate`]; they back the
//! tagged temporaries that instruction emission uses when every low register
//! is taken.

/// First register reserved for temporaries.
pub const TEMP_BASE: u32 = 0xF0;

/// Tags for temporaries, so nested uses within one instruction never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterTemp {
    T0 = 0,
    T1,
    T2,
    T3,
    T4,
    T5,
    T6,
    T7,
}

impl RegisterTemp {
    fn bit(self) -> u8 {
        1 << self as u8
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegisterAllocator {
    chunks: Vec<u32>,
    max: u32,
    temps: u8,
}

fn split(reg: u32) -> (usize, u32) {
    ((reg >> 5) as usize, reg & 0x1F)
}

impl RegisterAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_chunk(&mut self) {
        // the eighth chunk holds registers 224..256, the top half of which are temporaries
        let block = if self.chunks.len() == 7 { 0xFFFF_0000 } else { 0 };
        self.chunks.push(block);
    }

    pub fn allocate(&mut self) -> u32 {
        let mut chunk = 0;
        loop {
            if chunk == self.chunks.len() {
                self.push_chunk();
            }
            if self.chunks[chunk] != u32::MAX {
                break;
            }
            chunk += 1;
        }
        let bit = self.chunks[chunk].trailing_ones();
        self.chunks[chunk] |= 1 << bit;
        let reg = (chunk as u32) * 32 + bit;
        self.max = self.max.max(reg);
        reg
    }

    pub fn free(&mut self, reg: u32) {
        if (TEMP_BASE..=0xFF).contains(&reg) {
            return;
        }
        let (chunk, bit) = split(reg);
        if let Some(block) = self.chunks.get_mut(chunk) {
            *block &= !(1 << bit);
        }
    }

    /// Marks `reg` as in use without allocating it.
    pub fn touch(&mut self, reg: u32) {
        let (chunk, bit) = split(reg);
        while self.chunks.len() <= chunk {
            self.push_chunk();
        }
        self.chunks[chunk] |= 1 << bit;
        self.max = self.max.max(reg);
    }

    pub fn is_allocated(&self, reg: u32) -> bool {
        let (chunk, bit) = split(reg);
        self.chunks
            .get(chunk)
            .is_some_and(|block| block & (1 << bit) != 0)
    }

    /// Gets a register below 256 for use within a single instruction.
    pub fn allocate_temp(&mut self, nth: RegisterTemp) -> u32 {
        debug_assert!(
            self.temps & nth.bit() == 0,
            "temporary {nth:?} already in use"
        );
        self.temps |= nth.bit();
        let old_max = self.max;
        let reg = self.allocate();
        if reg > 0xFF {
            self.free(reg);
            let reg = TEMP_BASE + nth as u32;
            self.max = old_max.max(reg);
            return reg;
        }
        reg
    }

    pub fn free_temp(&mut self, reg: u32, nth: RegisterTemp) {
        self.temps &= !nth.bit();
        if reg < TEMP_BASE {
            self.free(reg);
        }
    }

    /// Highest register index ever handed out or touched.
    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn raise_max(&mut self, max: u32) {
        self.max = self.max.max(max);
    }
}

#[cfg(test)]
mod tests {
    use super::{RegisterAllocator, RegisterTemp, TEMP_BASE};
    use arbtest::arbtest;
    use assert2::{assert, check};

    #[test]
    fn lowest_free_first() {
        let mut ra = RegisterAllocator::new();
        check!(ra.allocate() == 0);
        check!(ra.allocate() == 1);
        check!(ra.allocate() == 2);
        ra.free(1);
        check!(ra.allocate() == 1);
        check!(ra.max() == 2);
    }

    #[test]
    fn temporaries_are_skipped() {
        let mut ra = RegisterAllocator::new();
        let regs = (0..260).map(|_| ra.allocate()).collect::<Vec<_>>();
        check!(regs[239] == 239);
        check!(regs[240] == 256);
        assert!(regs.iter().all(|reg| !(TEMP_BASE..=0xFF).contains(reg)));
    }

    #[test]
    fn temporaries_fall_back_to_reserved_range() {
        let mut ra = RegisterAllocator::new();
        let tmp = ra.allocate_temp(RegisterTemp::T0);
        check!(tmp == 0);
        ra.free_temp(tmp, RegisterTemp::T0);
        check!(!ra.is_allocated(0));

        for _ in 0..300 {
            _ = ra.allocate();
        }
        let max = ra.max();
        let tmp = ra.allocate_temp(RegisterTemp::T3);
        check!(tmp == TEMP_BASE + 3);
        check!(ra.max() == max);
        ra.free_temp(tmp, RegisterTemp::T3);
    }

    #[test]
    fn clones_are_independent() {
        let mut parent = RegisterAllocator::new();
        _ = parent.allocate();
        let mut child = parent.clone();
        check!(child.allocate() == 1);
        check!(parent.allocate() == 1);
    }

    #[test]
    fn touch_then_allocate() {
        arbtest(|u| {
            let reg = u.int_in_range(0..=600u32)?;
            let mut ra = RegisterAllocator::new();
            ra.touch(reg);
            assert!(ra.is_allocated(reg));
            let next = ra.allocate();
            assert!(next != reg);
            assert!(ra.max() >= reg);
            Ok(())
        });
    }
}
