use alloc::{sync::Arc, vec::Vec};
use core::ops::Range;

use collection_ex::RangeMap;
use spin::RwLock;

use crate::error::{Error, Result};

/// The host buffer shared with the address space driver.
///
/// The driver only ever keeps offsets into it, so the buffer may be grown or
/// shrunk while mappings are live.
pub type Block = Arc<RwLock<Vec<u8>>>;

/// A contiguous, growable byte buffer handing out offset ranges.
///
/// Freed ranges are reused lowest-offset-first; when nothing fits the buffer
/// is bumped at its end. Freeing the last range shrinks the buffer back.
#[derive(Debug)]
pub struct Arena {
    block: Block,
    extents: RangeMap<usize, ()>,
}

impl Arena {
    pub fn new() -> Self {
        Arena {
            block: Arc::new(RwLock::new(Vec::new())),
            extents: RangeMap::new(0..usize::MAX),
        }
    }

    #[inline]
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// The current size of the buffer in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.block.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Carve a zero-filled range of `size` bytes out of the buffer.
    pub fn allocate(&mut self, size: usize) -> Result<Range<usize>> {
        let block = &self.block;
        let start = self.extents.allocate_with(
            size,
            |range| {
                let mut block = block.write();
                if block.len() < range.end {
                    let extra = range.end - block.len();
                    block
                        .try_reserve(extra)
                        .map_err(|_| Error::OUT_OF_MEMORY)?;
                    block.resize(range.end, 0);
                }
                block[range].fill(0);
                Ok(())
            },
            Error::OUT_OF_MEMORY,
        )?;
        Ok(start..start + size)
    }

    /// Return `range` to the arena. It must lie inside a single allocated range,
    /// whose remaining parts stay allocated.
    pub fn deallocate(&mut self, range: Range<usize>) -> Result {
        let (extent, _) = self
            .extents
            .get_contained(&range.start)
            .cloned()
            .filter(|(extent, _)| range.start < range.end && range.end <= extent.end)
            .ok_or(Error::INVALID_ARGUMENT)?;

        let _ = self.extents.remove(extent.start);
        for rest in [extent.start..range.start, range.end..extent.end] {
            if rest.start < rest.end {
                let _ = self.extents.insert(rest, ());
            }
        }

        let end = self.extents.last().map_or(0, |(last, _)| last.end);
        let mut block = self.block.write();
        if end < block.len() {
            block.truncate(end);
        }
        Ok(())
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Arena;
    use crate::error::Error;

    #[test]
    fn bumps_then_reuses_holes() {
        let mut arena = Arena::new();
        let a = arena.allocate(0x1000).unwrap();
        let b = arena.allocate(0x2000).unwrap();
        let c = arena.allocate(0x1000).unwrap();
        assert_eq!((a.clone(), b.clone(), c), (0..0x1000, 0x1000..0x3000, 0x3000..0x4000));
        assert_eq!(arena.len(), 0x4000);

        arena.block().write()[b.clone()].fill(0xAA);
        arena.deallocate(b).unwrap();
        assert_eq!(arena.len(), 0x4000);

        // The hole is reused and handed out zeroed.
        let d = arena.allocate(0x1000).unwrap();
        assert_eq!(d, 0x1000..0x2000);
        assert!(arena.block().read()[d].iter().all(|&b| b == 0));
    }

    #[test]
    fn freeing_the_tail_shrinks() {
        let mut arena = Arena::new();
        let a = arena.allocate(0x1000).unwrap();
        let b = arena.allocate(0x1000).unwrap();
        arena.deallocate(b).unwrap();
        assert_eq!(arena.len(), 0x1000);
        arena.deallocate(a).unwrap();
        assert!(arena.is_empty());
    }

    #[test]
    fn partial_free_keeps_the_rest() {
        let mut arena = Arena::new();
        let a = arena.allocate(0x3000).unwrap();
        arena.deallocate(0x1000..0x2000).unwrap();
        assert_eq!(arena.deallocate(0x1000..0x2000), Err(Error::INVALID_ARGUMENT));
        assert_eq!(arena.allocate(0x1000).unwrap(), 0x1000..0x2000);
        arena.deallocate(a.start..0x1000).unwrap();
        assert_eq!(arena.len(), 0x3000);
    }
}
