use core::mem::size_of;

use modular_bitfield::prelude::*;
use static_assertions::const_assert_eq;

use crate::{error::Error, mem::MemoryRegion};

/// Bit names of [`RawProcessFlags`] for [`crate::logger::flags::Flags`].
pub const FLAG_NAMES: &str = "debug force nalnum spw prio args devmem sleep - - - - high";

/// The 16-bit kernel flags word as it appears in a capability descriptor.
#[bitfield]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawProcessFlags {
    pub allow_debug: bool,
    pub force_debug: bool,
    pub allow_nonalphanum: bool,
    pub shared_page_writable: bool,
    pub privileged_priority: bool,
    pub allow_main_args: bool,
    pub shared_device_mem: bool,
    pub runnable_on_sleep: bool,
    pub memory_region: B4,
    pub loaded_high: bool,
    #[skip]
    __: B3,
}
const_assert_eq!(size_of::<RawProcessFlags>(), size_of::<u16>());

impl RawProcessFlags {
    #[inline]
    pub fn from_raw(raw: u16) -> Self {
        Self::from_bytes(raw.to_le_bytes())
    }

    #[inline]
    pub fn raw(self) -> u16 {
        u16::from_le_bytes(self.into_bytes())
    }
}

/// Process attributes granted by the kernel flags descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessFlags {
    pub allow_debug: bool,
    pub force_debug: bool,
    pub allow_nonalphanum: bool,
    pub shared_page_writable: bool,
    /// Allows main-thread priorities above the unprivileged ceiling.
    pub privileged_priority: bool,
    pub allow_main_args: bool,
    pub shared_device_mem: bool,
    pub runnable_on_sleep: bool,
    pub memory_region: MemoryRegion,
    pub loaded_high: bool,
}

impl TryFrom<RawProcessFlags> for ProcessFlags {
    type Error = Error;

    fn try_from(raw: RawProcessFlags) -> Result<Self, Self::Error> {
        Ok(ProcessFlags {
            allow_debug: raw.allow_debug(),
            force_debug: raw.force_debug(),
            allow_nonalphanum: raw.allow_nonalphanum(),
            shared_page_writable: raw.shared_page_writable(),
            privileged_priority: raw.privileged_priority(),
            allow_main_args: raw.allow_main_args(),
            shared_device_mem: raw.shared_device_mem(),
            runnable_on_sleep: raw.runnable_on_sleep(),
            memory_region: MemoryRegion::try_from(raw.memory_region())?,
            loaded_high: raw.loaded_high(),
        })
    }
}

impl From<ProcessFlags> for RawProcessFlags {
    fn from(flags: ProcessFlags) -> Self {
        RawProcessFlags::new()
            .with_allow_debug(flags.allow_debug)
            .with_force_debug(flags.force_debug)
            .with_allow_nonalphanum(flags.allow_nonalphanum)
            .with_shared_page_writable(flags.shared_page_writable)
            .with_privileged_priority(flags.privileged_priority)
            .with_allow_main_args(flags.allow_main_args)
            .with_shared_device_mem(flags.shared_device_mem)
            .with_runnable_on_sleep(flags.runnable_on_sleep)
            .with_memory_region(flags.memory_region as u8)
            .with_loaded_high(flags.loaded_high)
    }
}
