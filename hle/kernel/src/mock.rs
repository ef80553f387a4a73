//! Recording stand-ins for the collaborators of the process core.

use alloc::{sync::Arc, vec::Vec};
use core::ops::Range;

use spin::Mutex;

use crate::{
    error::{Error, Result},
    mem::{AddressSpace, Backing, Permissions, VAddr},
    task::{Launcher, MainThread},
};

#[derive(Debug, Clone)]
pub enum Op {
    Map(Range<VAddr>, Permissions, Backing),
    Unmap(Range<VAddr>),
}

#[derive(Debug, Default)]
pub struct Log {
    pub ops: Vec<Op>,
    pub mapped: Vec<Range<VAddr>>,
}

impl Log {
    pub fn maps(&self) -> impl Iterator<Item = (&Range<VAddr>, Permissions)> + '_ {
        self.ops.iter().filter_map(|op| match op {
            Op::Map(range, perms, _) => Some((range, *perms)),
            Op::Unmap(_) => None,
        })
    }

    pub fn unmaps(&self) -> impl Iterator<Item = &Range<VAddr>> + '_ {
        self.ops.iter().filter_map(|op| match op {
            Op::Map(..) => None,
            Op::Unmap(range) => Some(range),
        })
    }

    pub fn mapped_bytes(&self) -> u32 {
        self.mapped.iter().map(|r| r.end - r.start).sum()
    }
}

/// An address space that records every call and refuses double mappings.
#[derive(Debug, Clone, Default)]
pub struct MockSpace {
    pub log: Arc<Mutex<Log>>,
    /// Fail every `map` whose range starts here.
    pub fail_at: Option<VAddr>,
}

impl MockSpace {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AddressSpace for MockSpace {
    fn map(&mut self, range: Range<VAddr>, perms: Permissions, backing: Backing) -> Result {
        let mut log = self.log.lock();
        if self.fail_at == Some(range.start)
            || log
                .mapped
                .iter()
                .any(|r| r.start < range.end && range.start < r.end)
        {
            return Err(Error::INVALID_ADDRESS);
        }
        log.mapped.push(range.clone());
        log.ops.push(Op::Map(range, perms, backing));
        Ok(())
    }

    fn unmap(&mut self, range: Range<VAddr>) -> Result {
        let mut log = self.log.lock();
        // Partial unmaps split the recorded range.
        let mut rest = Vec::new();
        let mut hit = false;
        for r in log.mapped.drain(..) {
            if r.start < range.end && range.start < r.end {
                hit = true;
                if r.start < range.start {
                    rest.push(r.start..range.start);
                }
                if range.end < r.end {
                    rest.push(range.end..r.end);
                }
            } else {
                rest.push(r);
            }
        }
        log.mapped = rest;
        if !hit {
            return Err(Error::INVALID_ADDRESS);
        }
        log.ops.push(Op::Unmap(range));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockLauncher {
    pub launched: Mutex<Vec<MainThread>>,
    pub fail: bool,
}

impl Launcher for MockLauncher {
    fn launch_main_thread(&self, thread: &MainThread) -> Result {
        if self.fail {
            return Err(Error::RESOURCE_EXHAUSTED);
        }
        self.launched.lock().push(*thread);
        Ok(())
    }
}
