#![cfg_attr(not(test), no_std)]

use num_traits::{PrimInt, WrappingSub};

pub trait BitOpEx: PrimInt + WrappingSub {
    #[inline]
    fn low_mask(bit: u32) -> Self {
        (Self::one() << bit as usize).wrapping_sub(&Self::one())
    }

    /// Whether any of the bits below `bit` is set, i.e. the value is not aligned
    /// to `1 << bit`.
    #[inline]
    fn contains_bit(&self, bit: u32) -> bool {
        *self & Self::low_mask(bit) != Self::zero()
    }
}

impl<T> BitOpEx for T where T: PrimInt + WrappingSub {}
