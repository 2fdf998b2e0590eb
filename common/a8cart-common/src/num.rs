pub trait GetBit {
    #[must_use]
    fn bit(self, i: u8) -> bool;
}

macro_rules! impl_get_bit {
    ($($t:ty),* $(,)?) => {
        $(
            impl GetBit for $t {
                #[inline]
                fn bit(self, i: u8) -> bool {
                    debug_assert!(i < (<$t>::BITS as u8));
                    self & (1 << i) != 0
                }
            }
        )*
    };
}

impl_get_bit!(u8, u16, u32, u64, usize);

/// Packed binary-coded decimal conversions, as used by RTC chip registers.
pub trait Bcd {
    /// Values of 100 or more are truncated to their last two decimal digits.
    #[must_use]
    fn to_bcd(self) -> u8;
}

impl Bcd for u8 {
    #[inline]
    fn to_bcd(self) -> u8 {
        let value = self % 100;
        ((value / 10) << 4) | (value % 10)
    }
}
