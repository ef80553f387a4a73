#![cfg_attr(not(test), no_std)]

pub mod range_map;

pub use range_map::RangeMap;

extern crate alloc;
