//! Wrapper around `Box<[u8; LEN]>` with a custom `bincode::Decode` implementation that deserializes
//! directly into heap memory.
//!
//! The implementation that `#[derive(Decode)]` generates for `Box<[u8; LEN]>` deserializes into
//! stack memory and then moves to the heap, which overflows the stack for cartridge RAM sized arrays.

use bincode::de::read::Reader;
use bincode::de::{BorrowDecoder, Decoder};
use bincode::error::DecodeError;
use bincode::{BorrowDecode, Decode, Encode};
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, PartialEq, Eq, Encode)]
pub struct BoxedByteArray<const LEN: usize>(Box<[u8; LEN]>);

fn new_boxed_array<const LEN: usize>(fill: u8) -> Box<[u8; LEN]> {
    let boxed_slice = vec![fill; LEN].into_boxed_slice();

    // Length always matches LEN
    match boxed_slice.try_into() {
        Ok(array) => array,
        Err(_) => unreachable!("boxed slice of length {LEN} must convert to [u8; {LEN}]"),
    }
}

impl<const LEN: usize> BoxedByteArray<LEN> {
    #[must_use]
    pub fn new() -> Self {
        Self(new_boxed_array(0))
    }

    /// Create an array with every byte set to `fill`, e.g. 0xFF for erased flash.
    #[must_use]
    pub fn filled(fill: u8) -> Self {
        Self(new_boxed_array(fill))
    }

    /// Copy `bytes` into the start of the array. Returns the number of bytes copied, which is the
    /// smaller of the two lengths.
    pub fn copy_from(&mut self, bytes: &[u8]) -> usize {
        let len = bytes.len().min(LEN);
        self.0[..len].copy_from_slice(&bytes[..len]);
        len
    }
}

impl<const LEN: usize> Default for BoxedByteArray<LEN> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const LEN: usize> From<Box<[u8; LEN]>> for BoxedByteArray<LEN> {
    fn from(value: Box<[u8; LEN]>) -> Self {
        Self(value)
    }
}

impl<const LEN: usize> Deref for BoxedByteArray<LEN> {
    type Target = Box<[u8; LEN]>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<const LEN: usize> DerefMut for BoxedByteArray<LEN> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<const LEN: usize, Context> Decode<Context> for BoxedByteArray<LEN> {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let mut array = new_boxed_array::<LEN>(0);
        decoder.reader().read(array.as_mut())?;
        Ok(Self(array))
    }
}

impl<'de, const LEN: usize, Context> BorrowDecode<'de, Context> for BoxedByteArray<LEN> {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        let mut array = new_boxed_array::<LEN>(0);
        decoder.reader().read(array.as_mut())?;
        Ok(Self(array))
    }
}
