//! Public error types

use a8cart_config::CartridgeType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CartLoadError {
    #[error("Invalid {cartridge_type} image; expected length of {expected} bytes, was {actual} bytes")]
    InvalidImageLength { cartridge_type: CartridgeType, expected: usize, actual: usize },
    #[error("Cartridge image is empty")]
    EmptyImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NvramError {
    #[error("Invalid {device} save data; expected length of {expected} bytes, was {actual} bytes")]
    InvalidLength { device: &'static str, expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum CartridgeError<SErr> {
    #[error("Error persisting save file: {0}")]
    SaveWrite(SErr),
}
