use bitvec::prelude::*;
use minfo::{NR_TLS_SLOTS, TLS_AREA_VADDR, TLS_ENTRY_SIZE};

use crate::{
    error::{Error, Result},
    mem::VAddr,
};

type Bits = BitArr!(for NR_TLS_SLOTS, in u32, Lsb0);

/// The thread-local storage slots of one process.
#[derive(Debug, Clone)]
pub struct SlotBitmap {
    bits: Bits,
}

impl SlotBitmap {
    pub const CAPACITY: usize = NR_TLS_SLOTS;

    #[inline]
    pub fn new() -> Self {
        SlotBitmap { bits: Bits::ZERO }
    }

    /// Take the lowest free slot.
    pub fn allocate(&mut self) -> Result<usize> {
        let index = self.bits[..Self::CAPACITY]
            .first_zero()
            .ok_or(Error::RESOURCE_EXHAUSTED)?;
        self.bits.set(index, true);
        Ok(index)
    }

    pub fn free(&mut self, index: usize) -> Result {
        if index >= Self::CAPACITY || !self.bits[index] {
            return Err(Error::INVALID_ARGUMENT);
        }
        self.bits.set(index, false);
        Ok(())
    }

    #[inline]
    pub fn is_used(&self, index: usize) -> bool {
        index < Self::CAPACITY && self.bits[index]
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.bits[..Self::CAPACITY].count_ones()
    }

    pub fn iter_used(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits[..Self::CAPACITY].iter_ones()
    }

    /// The guest address of the storage behind `index`.
    #[inline]
    pub fn slot_addr(index: usize) -> VAddr {
        TLS_AREA_VADDR + index as VAddr * TLS_ENTRY_SIZE
    }
}

impl Default for SlotBitmap {
    fn default() -> Self {
        Self::new()
    }
}
