use core::sync::atomic::{AtomicU32, Ordering};

/// The quota object a process charges its committed memory to.
///
/// Implementations decide the policy; the process core only reports every
/// commit and release.
pub trait ResourceLimit: Send + Sync {
    /// Charge `bytes`, returning `false` if the quota does not allow it.
    fn reserve(&self, bytes: u32) -> bool;

    fn release(&self, bytes: u32);
}

/// A plain committed-memory quota.
#[derive(Debug)]
pub struct CommitLimit {
    max: u32,
    used: AtomicU32,
}

impl CommitLimit {
    pub const fn new(max: u32) -> Self {
        CommitLimit {
            max,
            used: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn max(&self) -> u32 {
        self.max
    }

    #[inline]
    pub fn used(&self) -> u32 {
        self.used.load(Ordering::Acquire)
    }
}

impl ResourceLimit for CommitLimit {
    fn reserve(&self, bytes: u32) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&new| new <= self.max)
            })
            .is_ok()
    }

    fn release(&self, bytes: u32) {
        let old = self.used.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(old >= bytes, "resource limit usage underflow");
    }
}
