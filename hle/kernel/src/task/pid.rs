use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};

/// Hands out process IDs in strictly increasing order.
///
/// IDs are never reused, so the generator refuses to wrap around.
#[derive(Debug)]
pub struct IdGen {
    next: AtomicU32,
}

impl IdGen {
    pub const fn new(first: u32) -> Self {
        IdGen {
            next: AtomicU32::new(first),
        }
    }

    /// # Errors
    ///
    /// Returns error if the ID space is exhausted.
    pub fn next(&self) -> Result<u32> {
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |id| id.checked_add(1))
            .map_err(|_| Error::RESOURCE_EXHAUSTED)
    }

    /// The ID the next call to [`IdGen::next`] would return.
    #[inline]
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::Acquire)
    }
}
