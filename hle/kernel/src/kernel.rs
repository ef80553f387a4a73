use alloc::{boxed::Box, sync::Arc};

use crate::{
    config::KernelConfig,
    error::Result,
    mem::{AddressSpace, MemoryRegion, MemoryRegionInfo, RegionTable, ResourceLimit},
    task::{CodeSet, IdGen, Process},
};

/// One emulated kernel instance.
///
/// Owns the state shared by all of its processes: the process ID counter and
/// the physical memory regions.
#[derive(Debug)]
pub struct Kernel {
    config: Arc<KernelConfig>,
    pid: IdGen,
    regions: RegionTable,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        let regions = RegionTable::new(config.memory_regions);
        let pid = IdGen::new(config.first_process_id);
        Kernel {
            config: Arc::new(config),
            pid,
            regions,
        }
    }

    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[inline]
    pub fn region(&self, region: MemoryRegion) -> &Arc<MemoryRegionInfo> {
        self.regions.get(region)
    }

    /// The ID the next created process will get.
    #[inline]
    pub fn next_process_id(&self) -> u32 {
        self.pid.peek()
    }

    /// Create a process around `codeset`, mapped through `space` and charged
    /// to `limit`.
    ///
    /// # Errors
    ///
    /// Returns error if process IDs are exhausted.
    pub fn create_process(
        &self,
        codeset: Arc<CodeSet>,
        space: Box<dyn AddressSpace>,
        limit: Arc<dyn ResourceLimit>,
    ) -> Result<Process> {
        let id = self.pid.next()?;
        Ok(Process::new(
            id,
            codeset,
            space,
            limit,
            Arc::clone(&self.config),
            self.regions.clone(),
        ))
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}
