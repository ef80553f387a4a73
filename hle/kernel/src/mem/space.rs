use alloc::sync::Arc;
use core::{fmt, ops::Range};

use super::{Block, Permissions, VAddr};
use crate::error::Result;

/// What a guest mapping is backed by.
#[derive(Clone)]
pub enum Backing {
    /// A range of the process' heap arena, starting at `offset`.
    Arena { block: Block, offset: usize },
    /// A range of a loaded program image, starting at `offset`.
    Image { memory: Arc<[u8]>, offset: usize },
    /// Fresh zero-filled memory owned by the mapping.
    Zeroed,
    /// A special range granted by a capability descriptor. `addr` is the
    /// address as written in the descriptor; the driver resolves which
    /// device memory backs it.
    Io { addr: VAddr },
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::Arena { offset, .. } => write!(f, "Arena({:#x})", offset),
            Backing::Image { offset, .. } => write!(f, "Image({:#x})", offset),
            Backing::Zeroed => f.write_str("Zeroed"),
            Backing::Io { addr } => write!(f, "Io({:#x})", addr),
        }
    }
}

/// The page-table level driver of one process' address space.
///
/// Implemented by the memory subsystem of the emulator; the process core only
/// tells it what to map and unmap.
pub trait AddressSpace: Send {
    /// Map `range` with `perms`. Fails if any part of `range` is mapped.
    fn map(&mut self, range: Range<VAddr>, perms: Permissions, backing: Backing) -> Result;

    fn unmap(&mut self, range: Range<VAddr>) -> Result;
}
