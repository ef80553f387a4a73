use core::fmt::{Debug, Display, Formatter};

pub type Result<T = ()> = core::result::Result<T, Error>;

/// The failure kinds reported by the process core.
///
/// The guest-visible result code is derived from these by the SVC layer.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Error(i32);

impl Error {
    /// Misaligned, out-of-bounds or already occupied virtual range.
    pub const INVALID_ADDRESS: Error = Error(1);
    /// Zero or non-page-aligned size.
    pub const INVALID_SIZE: Error = Error(2);
    /// No free run large enough, or the memory region is exhausted.
    pub const OUT_OF_MEMORY: Error = Error(3);
    /// TLS slots, handle table or resource-limit quota exhausted.
    pub const RESOURCE_EXHAUSTED: Error = Error(4);
    /// A capability or process flag forbids the request.
    pub const PERMISSION_DENIED: Error = Error(5);
    /// Malformed kernel capability descriptor sequence.
    pub const CAPABILITY_ERROR: Error = Error(6);
    /// Out-of-range index, count or state.
    pub const INVALID_ARGUMENT: Error = Error(7);

    #[inline]
    pub fn raw(self) -> i32 {
        self.0
    }

    pub fn desc(&self) -> &'static str {
        ERRC_DESC.get(self.0 as usize).copied().unwrap_or("Unknown error")
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "Error: {}", self.desc())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.desc())
    }
}

const ERRC_DESC: [&str; 8] = [
    "OK",
    "Invalid address",
    "Invalid size",
    "Out of memory",
    "Resource exhausted",
    "Permission denied",
    "Invalid capability descriptor",
    "Invalid argument",
];
