//! The process core of a high-level emulated kernel.
//!
//! A loader builds a [`CodeSet`](task::CodeSet), the [`Kernel`] wraps it into
//! a [`Process`](task::Process), whose kernel capabilities are then parsed
//! before it is run. Guest memory requests of a running process are served by
//! its heap, linear heap and TLS allocators.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod error;
pub mod kernel;
pub mod logger;
pub mod mem;
pub mod task;

#[cfg(test)]
mod mock;

extern crate alloc;

pub use self::{
    config::{KernelConfig, KernelConfigBuilder},
    error::{Error, Result},
    kernel::Kernel,
};
