//! # Processes and what they are made of.

pub mod caps;
pub mod codeset;
pub mod flags;
pub mod hdl;
pub mod pid;
pub mod prio;
pub mod process;
pub mod tls;

pub use self::{
    caps::{AddressMapping, Capabilities, DescriptorTable},
    codeset::{CodeSet, CodeSetBuilder, Segment, SegmentKind},
    flags::{ProcessFlags, RawProcessFlags},
    hdl::{HandleType, Object},
    pid::IdGen,
    prio::Priority,
    process::{Launcher, MainThread, Process, State},
    tls::SlotBitmap,
};
