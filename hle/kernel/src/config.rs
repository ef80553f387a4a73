use alloc::string::String;
use core::ops::Range;

use derive_builder::Builder;
use minfo::{
    APPLICATION_REGION_BASE, APPLICATION_REGION_SIZE, BASE_REGION_BASE, BASE_REGION_SIZE,
    HEAP_VADDR, HEAP_VADDR_END, STACK_TOP, SYSTEM_REGION_BASE, SYSTEM_REGION_SIZE,
};

use crate::{
    mem::{is_page_aligned, VAddr},
    task::caps::DescriptorTable,
};

pub const DEFAULT_MAX_HANDLE_TABLE_SIZE: u32 = 0x3FF;
pub const DEFAULT_FIRST_PROCESS_ID: u32 = 10;
pub const DEFAULT_HEAP_RANGE: Range<VAddr> = HEAP_VADDR..HEAP_VADDR_END;
pub const DEFAULT_MEMORY_REGIONS: [(u32, u32); 3] = [
    (APPLICATION_REGION_BASE, APPLICATION_REGION_SIZE),
    (SYSTEM_REGION_BASE, SYSTEM_REGION_SIZE),
    (BASE_REGION_BASE, BASE_REGION_SIZE),
];

/// Boot-time parameters of a [`crate::Kernel`].
#[derive(Debug, Clone, Builder)]
#[builder(no_std, pattern = "owned", build_fn(validate = "Self::validate"))]
pub struct KernelConfig {
    /// The guest range the regular heap is allocated from.
    #[builder(default = "DEFAULT_HEAP_RANGE")]
    pub heap_range: Range<VAddr>,
    /// The main-thread stack ends here.
    #[builder(default = "STACK_TOP")]
    pub stack_top: VAddr,
    #[builder(default = "DEFAULT_MAX_HANDLE_TABLE_SIZE")]
    pub max_handle_table_size: u32,
    #[builder(default = "DEFAULT_FIRST_PROCESS_ID")]
    pub first_process_id: u32,
    /// `(base, size)` of the application, system and base memory regions.
    #[builder(default = "DEFAULT_MEMORY_REGIONS")]
    pub memory_regions: [(u32, u32); 3],
    #[builder(default)]
    pub descriptor_table: DescriptorTable,
}

impl KernelConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(range) = &self.heap_range {
            if range.start >= range.end
                || !is_page_aligned(range.start)
                || !is_page_aligned(range.end)
            {
                return Err(String::from("Invalid heap range"));
            }
        }
        if let Some(top) = self.stack_top {
            if !is_page_aligned(top) {
                return Err(String::from("Unaligned stack top"));
            }
        }
        if let Some(regions) = &self.memory_regions {
            let valid = regions.iter().all(|&(base, size)| {
                is_page_aligned(base) && is_page_aligned(size) && base.checked_add(size).is_some()
            });
            if !valid {
                return Err(String::from("Invalid memory region layout"));
            }
        }
        Ok(())
    }
}

impl KernelConfig {
    #[inline]
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            heap_range: DEFAULT_HEAP_RANGE,
            stack_top: STACK_TOP,
            max_handle_table_size: DEFAULT_MAX_HANDLE_TABLE_SIZE,
            first_process_id: DEFAULT_FIRST_PROCESS_ID,
            memory_regions: DEFAULT_MEMORY_REGIONS,
            descriptor_table: DescriptorTable::REFERENCE,
        }
    }
}
