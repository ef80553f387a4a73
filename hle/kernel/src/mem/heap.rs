use alloc::vec::Vec;
use core::ops::Range;

use collection_ex::RangeMap;

use super::{is_page_aligned, Arena, VAddr};
use crate::error::{Error, Result};

/// A committed block: its guest range and where its bytes start in the arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extent {
    pub virt: Range<VAddr>,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Backed by the arena bytes at this offset.
    Committed(usize),
    /// Mapped by someone else; never handed out nor released here.
    Locked,
}

/// Allocation bookkeeping for one guest heap range.
///
/// Blocks are searched lowest address first. Free space is the gaps between
/// blocks, so adjacent frees coalesce by construction.
#[derive(Debug)]
pub struct RegionAllocator {
    name: &'static str,
    blocks: RangeMap<VAddr, Slot>,
    used: u32,
}

impl RegionAllocator {
    pub fn new(name: &'static str, range: Range<VAddr>) -> Self {
        RegionAllocator {
            name,
            blocks: RangeMap::new(range),
            used: 0,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn range(&self) -> &Range<VAddr> {
        self.blocks.range()
    }

    /// Bytes currently committed.
    #[inline]
    pub fn used(&self) -> u32 {
        self.used
    }

    #[inline]
    pub fn overlaps(&self, range: &Range<VAddr>) -> bool {
        self.blocks.overlaps(range)
    }

    pub fn extents(&self) -> impl Iterator<Item = Extent> + '_ {
        self.blocks.iter().filter_map(|(_, (virt, slot))| match *slot {
            Slot::Committed(offset) => Some(Extent {
                virt: virt.clone(),
                offset,
            }),
            Slot::Locked => None,
        })
    }

    fn clip(&self, range: &Range<VAddr>) -> Option<Range<VAddr>> {
        let bounds = self.range();
        let clipped = range.start.max(bounds.start)..range.end.min(bounds.end);
        (clipped.start < clipped.end).then(|| clipped)
    }

    /// Keep the part of `range` inside this allocator from being handed out.
    ///
    /// The range must not overlap any block.
    pub fn lock(&mut self, range: &Range<VAddr>) {
        if let Some(clipped) = self.clip(range) {
            let ret = self.blocks.insert(clipped, Slot::Locked);
            debug_assert!(ret.is_ok(), "{}: locking an occupied range", self.name);
        }
    }

    /// Undo [`RegionAllocator::lock`] for the same `range`.
    pub fn unlock(&mut self, range: &Range<VAddr>) {
        if let Some(clipped) = self.clip(range) {
            if self.blocks.get(&clipped.start) == Some(&Slot::Locked) {
                let _ = self.blocks.remove(clipped.start);
            }
        }
    }

    fn check_size(size: u32) -> Result {
        if size == 0 || !is_page_aligned(size) {
            Err(Error::INVALID_SIZE)
        } else {
            Ok(())
        }
    }

    fn check_range(target: VAddr, size: u32) -> Result<Range<VAddr>> {
        Self::check_size(size)?;
        if !is_page_aligned(target) {
            return Err(Error::INVALID_SIZE);
        }
        let end = target.checked_add(size).ok_or(Error::INVALID_ADDRESS)?;
        Ok(target..end)
    }

    /// Validate an allocation request without committing anything.
    ///
    /// Returns the exact range for a fixed `target`, `None` if the allocator
    /// is free to choose.
    pub fn check_allocate(&self, target: Option<VAddr>, size: u32) -> Result<Option<Range<VAddr>>> {
        let target = match target {
            Some(target) => target,
            None => return Self::check_size(size).map(|_| None),
        };
        let range = Self::check_range(target, size)?;
        let bounds = self.range();
        if range.start < bounds.start || bounds.end < range.end || self.overlaps(&range) {
            return Err(Error::INVALID_ADDRESS);
        }
        Ok(Some(range))
    }

    /// Commit `size` bytes at `target`, or at the lowest free address if
    /// `target` is `None`, carving the backing bytes out of `arena`.
    pub fn allocate(&mut self, target: Option<VAddr>, size: u32, arena: &mut Arena) -> Result<Extent> {
        let fixed = self.check_allocate(target, size)?;

        let mut offset = 0;
        let mut carve = || {
            let bytes = arena.allocate(size as usize)?;
            offset = bytes.start;
            Ok(Slot::Committed(bytes.start))
        };
        let start = match fixed {
            Some(range) => {
                let start = range.start;
                self.blocks
                    .try_insert_with(range, || carve().map(|o| (o, ())), Error::INVALID_ADDRESS)?;
                start
            }
            None => self
                .blocks
                .allocate_with(size, |_| carve(), Error::OUT_OF_MEMORY)?,
        };

        self.used += size;
        log::trace!(
            "{}: committed {:#x}..{:#x} at arena offset {:#x}",
            self.name,
            start,
            start + size,
            offset
        );
        Ok(Extent {
            virt: start..start + size,
            offset,
        })
    }

    /// Validate a release request: `[target, target + size)` must be fully
    /// committed in this allocator.
    pub fn check_deallocate(&self, target: VAddr, size: u32) -> Result<Range<VAddr>> {
        let range = Self::check_range(target, size)?;
        let committed = self
            .blocks
            .overlapping(range.clone())
            .all(|(_, slot)| matches!(slot, Slot::Committed(_)));
        if committed && self.blocks.covers(&range) {
            Ok(range)
        } else {
            Err(Error::INVALID_ADDRESS)
        }
    }

    /// Release a committed range, splitting blocks it only partly covers.
    pub fn deallocate(&mut self, range: Range<VAddr>, arena: &mut Arena) -> Result {
        let range = self.check_deallocate(range.start, range.end.wrapping_sub(range.start))?;

        let hit: Vec<(Range<VAddr>, usize)> = self
            .blocks
            .overlapping(range.clone())
            .filter_map(|(virt, slot)| match *slot {
                Slot::Committed(offset) => Some((virt.clone(), offset)),
                Slot::Locked => None,
            })
            .collect();
        for (virt, offset) in hit {
            let _ = self.blocks.remove(virt.start);

            let cut = virt.start.max(range.start)..virt.end.min(range.end);
            let cut_offset = offset + (cut.start - virt.start) as usize;
            arena.deallocate(cut_offset..cut_offset + (cut.end - cut.start) as usize)?;

            if virt.start < cut.start {
                let _ = self.blocks.insert(virt.start..cut.start, Slot::Committed(offset));
            }
            if cut.end < virt.end {
                let rest = offset + (cut.end - virt.start) as usize;
                let _ = self.blocks.insert(cut.end..virt.end, Slot::Committed(rest));
            }
        }

        self.used -= range.end - range.start;
        log::trace!("{}: released {:#x}..{:#x}", self.name, range.start, range.end);
        Ok(())
    }
}
