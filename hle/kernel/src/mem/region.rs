use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::Error;

/// The physical memory pools a process may draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MemoryRegion {
    Application = 1,
    System = 2,
    Base = 3,
}

impl MemoryRegion {
    pub const ALL: [MemoryRegion; 3] = [Self::Application, Self::System, Self::Base];

    #[inline]
    fn index(self) -> usize {
        self as usize - 1
    }
}

impl Default for MemoryRegion {
    fn default() -> Self {
        MemoryRegion::Application
    }
}

impl TryFrom<u8> for MemoryRegion {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MemoryRegion::Application),
            2 => Ok(MemoryRegion::System),
            3 => Ok(MemoryRegion::Base),
            _ => Err(Error::CAPABILITY_ERROR),
        }
    }
}

/// Usage bookkeeping of one physical memory pool.
///
/// Shared by every process drawing from the pool.
#[derive(Debug)]
pub struct MemoryRegionInfo {
    region: MemoryRegion,
    base: u32,
    size: u32,
    used: AtomicU32,
}

impl MemoryRegionInfo {
    pub fn new(region: MemoryRegion, base: u32, size: u32) -> Self {
        MemoryRegionInfo {
            region,
            base,
            size,
            used: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    /// Physical offset of the pool inside FCRAM.
    #[inline]
    pub fn base(&self) -> u32 {
        self.base
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn used(&self) -> u32 {
        self.used.load(Ordering::Acquire)
    }

    #[inline]
    pub fn free(&self) -> u32 {
        self.size - self.used()
    }

    /// Take `bytes` out of the pool, failing if not enough is left.
    pub fn reserve(&self, bytes: u32) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&new| new <= self.size)
            })
            .is_ok()
    }

    pub fn release(&self, bytes: u32) {
        let old = self.used.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(old >= bytes, "memory region usage underflow");
    }
}

/// The kernel's memory pools, indexable by [`MemoryRegion`].
#[derive(Debug, Clone)]
pub struct RegionTable([Arc<MemoryRegionInfo>; 3]);

impl RegionTable {
    /// Build the table from `(base, size)` pairs, in [`MemoryRegion::ALL`] order.
    pub fn new(layout: [(u32, u32); 3]) -> Self {
        let [app, sys, base] = layout;
        RegionTable([
            Arc::new(MemoryRegionInfo::new(MemoryRegion::Application, app.0, app.1)),
            Arc::new(MemoryRegionInfo::new(MemoryRegion::System, sys.0, sys.1)),
            Arc::new(MemoryRegionInfo::new(MemoryRegion::Base, base.0, base.1)),
        ])
    }

    #[inline]
    pub fn get(&self, region: MemoryRegion) -> &Arc<MemoryRegionInfo> {
        &self.0[region.index()]
    }
}
