//! # Guest memory management.
//!
//! Every process owns one [`Arena`]: a contiguous host buffer backing both its
//! regular heap and its linear heap. The two heaps are [`RegionAllocator`]
//! views over disjoint guest address ranges that carve their blocks out of the
//! same arena, which keeps host-side address translation a simple offset
//! lookup.

pub mod arena;
pub mod heap;
pub mod limit;
pub mod region;
pub mod space;

use bitop_ex::BitOpEx;
use minfo::PAGE_SHIFT;

pub use self::{
    arena::{Arena, Block},
    heap::{Extent, RegionAllocator},
    limit::{CommitLimit, ResourceLimit},
    region::{MemoryRegion, MemoryRegionInfo, RegionTable},
    space::{AddressSpace, Backing},
};

/// A guest virtual address.
pub type VAddr = u32;

bitflags::bitflags! {
    /// Access permissions of a guest mapping.
    pub struct Permissions: u8 {
        const READ    = 1;
        const WRITE   = 1 << 1;
        const EXECUTE = 1 << 2;

        const READ_WRITE   = Self::READ.bits | Self::WRITE.bits;
        const READ_EXECUTE = Self::READ.bits | Self::EXECUTE.bits;
    }
}

#[inline]
pub fn is_page_aligned(val: u32) -> bool {
    !val.contains_bit(PAGE_SHIFT)
}
