use core::ops::RangeInclusive;

use crate::error::{Error, Result};

/// Thread priorities, lower is more urgent.
pub type Priority = u32;

pub const PRIO_RANGE: RangeInclusive<Priority> = 0..=0x3F;
/// The most urgent priority an unprivileged process may request.
pub const UNPRIVILEGED_CEILING: Priority = 0x18;

/// Check a main-thread priority against the process' privilege.
pub fn check(prio: Priority, privileged: bool) -> Result {
    if !PRIO_RANGE.contains(&prio) {
        return Err(Error::INVALID_ARGUMENT);
    }
    if prio < UNPRIVILEGED_CEILING && !privileged {
        return Err(Error::PERMISSION_DENIED);
    }
    Ok(())
}
