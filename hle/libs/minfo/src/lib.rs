//! Guest memory layout of the emulated console.
//!
//! All addresses are guest virtual addresses unless stated otherwise.

#![no_std]

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: u32 = 1 << PAGE_SHIFT;

/// Regular heap, allocated by `ControlMemory` with `MEMOP_ALLOC`.
pub const HEAP_VADDR: u32 = 0x0800_0000;
pub const HEAP_SIZE: u32 = 0x0800_0000;
pub const HEAP_VADDR_END: u32 = HEAP_VADDR + HEAP_SIZE;

/// The main thread stack grows down from the end of the heap area.
pub const STACK_TOP: u32 = HEAP_VADDR_END;

/// Linear heap for programs built against kernels older than
/// [`NEW_LINEAR_HEAP_KERNEL_VERSION`].
pub const LINEAR_HEAP_VADDR: u32 = 0x1400_0000;

pub const NEW_LINEAR_HEAP_VADDR: u32 = 0x3000_0000;
/// First kernel release (8.0.0) that moved the linear heap.
pub const NEW_LINEAR_HEAP_KERNEL_VERSION: u16 = 0x022C;

pub const TLS_AREA_VADDR: u32 = 0x1FF8_2000;
pub const TLS_ENTRY_SIZE: u32 = 0x200;
pub const NR_TLS_SLOTS: usize = 300;

/// Physical FCRAM, split between the memory regions below.
pub const FCRAM_SIZE: u32 = 0x0800_0000;

pub const APPLICATION_REGION_BASE: u32 = 0;
pub const APPLICATION_REGION_SIZE: u32 = 0x0400_0000;
pub const SYSTEM_REGION_BASE: u32 = APPLICATION_REGION_BASE + APPLICATION_REGION_SIZE;
pub const SYSTEM_REGION_SIZE: u32 = 0x02C0_0000;
pub const BASE_REGION_BASE: u32 = SYSTEM_REGION_BASE + SYSTEM_REGION_SIZE;
pub const BASE_REGION_SIZE: u32 = 0x0140_0000;

const _: () = assert!(BASE_REGION_BASE + BASE_REGION_SIZE == FCRAM_SIZE);
