//! Kernel capability descriptors.
//!
//! Every descriptor is a 32-bit word whose kind is given by the number of
//! consecutive 1-bits starting from the most significant bit. The bits below
//! the terminating 0-bit are the payload.

use alloc::vec::Vec;
use core::slice;

use bitvec::prelude::*;
use minfo::{PAGE_SHIFT, PAGE_SIZE};

use super::flags::{ProcessFlags, RawProcessFlags};
use crate::{
    error::{Error, Result},
    mem::VAddr,
};

pub const MAX_ADDRESS_MAPPINGS: usize = 8;
pub const DEFAULT_HANDLE_TABLE_SIZE: u32 = 0x200;
pub const NR_SVCS: usize = 128;
pub const NR_INTERRUPTS: usize = 128;

const SVC_WINDOW_BITS: u32 = 24;
const MAPPING_PAGE_MASK: u32 = 0xF_FFFF;
const MAPPING_FLAG: u32 = 1 << 20;

pub type SvcMask = BitArr!(for NR_SVCS, in u32, Lsb0);
pub type InterruptMask = BitArr!(for NR_INTERRUPTS, in u32, Lsb0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Interrupts,
    SvcMask,
    KernelVersion,
    HandleTableSize,
    KernelFlags,
    MappedRange,
    MappedPage,
    Unused,
}

/// The tag length to descriptor kind table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorTable(&'static [(u32, Kind)]);

impl DescriptorTable {
    /// The layout used by the reference hardware.
    pub const REFERENCE: DescriptorTable = DescriptorTable(&[
        (3, Kind::Interrupts),
        (4, Kind::SvcMask),
        (6, Kind::KernelVersion),
        (7, Kind::HandleTableSize),
        (8, Kind::KernelFlags),
        (9, Kind::MappedRange),
        (11, Kind::MappedPage),
        (32, Kind::Unused),
    ]);

    #[inline]
    pub const fn new(entries: &'static [(u32, Kind)]) -> Self {
        DescriptorTable(entries)
    }

    /// Returns the tag length of `raw` and its kind, if the table knows it.
    pub fn classify(&self, raw: u32) -> (u32, Option<Kind>) {
        let ones = raw.leading_ones();
        let kind = self
            .0
            .iter()
            .find_map(|&(len, kind)| (len == ones).then(|| kind));
        (ones, kind)
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::REFERENCE
    }
}

/// The bits of `raw` below its tag.
#[inline]
pub fn payload(raw: u32, ones: u32) -> u32 {
    match 31u32.checked_sub(ones) {
        Some(bits) => raw & ((1 << bits) - 1),
        None => 0,
    }
}

/// A fixed special memory range granted to a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressMapping {
    pub address: VAddr,
    pub size: u32,
    pub writable: bool,
    pub unk_flag: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    Interrupts([u8; 4]),
    SvcMask { window: u32, bits: u32 },
    KernelVersion(u16),
    HandleTableSize(u32),
    KernelFlags(RawProcessFlags),
    Mapping(AddressMapping),
    Unknown(u32),
}

/// Decodes a descriptor sequence into [`Descriptor`]s.
///
/// Mapped-range descriptors come in pairs and are yielded as one item.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    table: DescriptorTable,
    words: slice::Iter<'a, u32>,
}

impl<'a> Decoder<'a> {
    pub fn new(table: DescriptorTable, words: &'a [u32]) -> Self {
        Decoder {
            table,
            words: words.iter(),
        }
    }

    fn decode_range(&mut self, first: u32) -> Result<Descriptor> {
        let second = *self.words.next().ok_or(Error::CAPABILITY_ERROR)?;
        let (ones, kind) = self.table.classify(second);
        if kind != Some(Kind::MappedRange) {
            return Err(Error::CAPABILITY_ERROR);
        }
        let second = payload(second, ones);

        let start = (first & MAPPING_PAGE_MASK) << PAGE_SHIFT;
        let end = (second & MAPPING_PAGE_MASK) << PAGE_SHIFT;
        if end <= start {
            return Err(Error::CAPABILITY_ERROR);
        }
        Ok(Descriptor::Mapping(AddressMapping {
            address: start,
            size: end - start,
            writable: first & MAPPING_FLAG == 0,
            unk_flag: second & MAPPING_FLAG != 0,
        }))
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<Descriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = *self.words.next()?;
            let (ones, kind) = self.table.classify(raw);
            let data = payload(raw, ones);

            let desc = match kind {
                None => Descriptor::Unknown(raw),
                Some(Kind::Unused) => continue,
                Some(Kind::Interrupts) => {
                    let mut ids = [0; 4];
                    for (i, id) in ids.iter_mut().enumerate() {
                        *id = ((data >> (7 * i)) & 0x7F) as u8;
                    }
                    Descriptor::Interrupts(ids)
                }
                Some(Kind::SvcMask) => Descriptor::SvcMask {
                    window: (data >> SVC_WINDOW_BITS) & 0x7,
                    bits: data & ((1 << SVC_WINDOW_BITS) - 1),
                },
                Some(Kind::KernelVersion) => Descriptor::KernelVersion(data as u16),
                Some(Kind::HandleTableSize) => Descriptor::HandleTableSize(data & 0x3FF),
                Some(Kind::KernelFlags) => {
                    Descriptor::KernelFlags(RawProcessFlags::from_raw(data as u16))
                }
                Some(Kind::MappedRange) => return Some(self.decode_range(data)),
                Some(Kind::MappedPage) => Descriptor::Mapping(AddressMapping {
                    address: (data & MAPPING_PAGE_MASK) << PAGE_SHIFT,
                    size: PAGE_SIZE,
                    writable: true,
                    unk_flag: false,
                }),
            };
            return Some(Ok(desc));
        }
    }
}

/// The security and resource attributes a process is granted.
#[derive(Debug, Clone)]
pub struct Capabilities {
    svc_access_mask: SvcMask,
    allowed_interrupts: InterruptMask,
    handle_table_size: u32,
    kernel_version: u16,
    flags: ProcessFlags,
    address_mappings: Vec<AddressMapping>,
}

impl Capabilities {
    pub fn new() -> Self {
        Capabilities {
            svc_access_mask: SvcMask::ZERO,
            allowed_interrupts: InterruptMask::ZERO,
            handle_table_size: DEFAULT_HANDLE_TABLE_SIZE,
            kernel_version: 0,
            flags: ProcessFlags::default(),
            address_mappings: Vec::new(),
        }
    }

    #[inline]
    pub fn svc_access_mask(&self) -> &SvcMask {
        &self.svc_access_mask
    }

    #[inline]
    pub fn svc_allowed(&self, svc: usize) -> bool {
        svc < NR_SVCS && self.svc_access_mask[svc]
    }

    #[inline]
    pub fn allowed_interrupts(&self) -> &InterruptMask {
        &self.allowed_interrupts
    }

    #[inline]
    pub fn handle_table_size(&self) -> u32 {
        self.handle_table_size
    }

    #[inline]
    pub fn kernel_version(&self) -> u16 {
        self.kernel_version
    }

    #[inline]
    pub fn flags(&self) -> &ProcessFlags {
        &self.flags
    }

    #[inline]
    pub fn address_mappings(&self) -> &[AddressMapping] {
        &self.address_mappings
    }

    /// Apply one decoded descriptor.
    pub fn apply(&mut self, desc: Descriptor, max_handle_table_size: u32) -> Result {
        match desc {
            Descriptor::Interrupts(ids) => {
                // Zero marks an unused slot.
                for id in ids.into_iter().filter(|&id| id != 0) {
                    self.allowed_interrupts.set(usize::from(id), true);
                }
            }
            Descriptor::SvcMask { window, bits } => {
                let base = (window * SVC_WINDOW_BITS) as usize;
                for i in bits.view_bits::<Lsb0>()[..SVC_WINDOW_BITS as usize].iter_ones() {
                    if base + i < NR_SVCS {
                        self.svc_access_mask.set(base + i, true);
                    }
                }
            }
            Descriptor::KernelVersion(version) => {
                log::debug!("kernel version {}.{}", version >> 8, version & 0xFF);
                self.kernel_version = version;
            }
            Descriptor::HandleTableSize(size) => {
                self.handle_table_size = size.min(max_handle_table_size);
            }
            Descriptor::KernelFlags(raw) => {
                self.flags = ProcessFlags::try_from(raw)?;
            }
            Descriptor::Mapping(mapping) => {
                if self.address_mappings.len() >= MAX_ADDRESS_MAPPINGS {
                    log::warn!("too many address mappings, dropping {:#x?}", mapping);
                    return Err(Error::CAPABILITY_ERROR);
                }
                self.address_mappings.push(mapping);
            }
            Descriptor::Unknown(raw) => log::warn!("unknown kernel capability {:#010x}", raw),
        }
        Ok(())
    }

    /// Decode `words` with `table` and apply every descriptor in order.
    ///
    /// Stops at the first error, keeping what was applied before it.
    pub fn parse(
        &mut self,
        table: DescriptorTable,
        words: &[u32],
        max_handle_table_size: u32,
    ) -> Result {
        for desc in Decoder::new(table, words) {
            self.apply(desc?, max_handle_table_size)?;
        }
        Ok(())
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new()
    }
}
