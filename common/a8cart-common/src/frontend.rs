use bincode::{Decode, Encode};
use std::collections::HashMap;

pub trait SaveWriter {
    type Err;

    /// Read an array of bytes using the given extension.
    ///
    /// # Errors
    ///
    /// Will propagate any errors encountered while reading the file.
    fn load_bytes(&mut self, extension: &str) -> Result<Vec<u8>, Self::Err>;

    /// Write a slice of bytes using the given extension.
    ///
    /// # Errors
    ///
    /// Will propagate any errors encountered while writing the file.
    fn persist_bytes(&mut self, extension: &str, bytes: &[u8]) -> Result<(), Self::Err>;

    /// Load a serialized value using the given extension.
    ///
    /// For loading raw bytes, use `load_bytes` instead which does not assume that the length is serialized.
    ///
    /// # Errors
    ///
    /// Will propagate any errors encountered while reading the file or deserializing the data.
    fn load_serialized<D: Decode<()>>(&mut self, extension: &str) -> Result<D, Self::Err>;

    /// Write a serialized value using the given extension.
    ///
    /// For writing raw bytes, use `persist_bytes` instead which does not serialize the slice length.
    ///
    /// # Errors
    ///
    /// Will propagate any errors encountered while writing the file or serializing the data.
    fn persist_serialized<E: Encode>(&mut self, extension: &str, data: E) -> Result<(), Self::Err>;
}

/// In-memory save writer keyed by extension. Loading an extension that was never persisted
/// returns [`MemorySaveError::NotFound`].
#[derive(Debug, Clone, Default)]
pub struct MemorySaveWriter {
    files: HashMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemorySaveError {
    NotFound(String),
    Decode(String),
}

impl std::fmt::Display for MemorySaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(extension) => write!(f, "no saved data with extension '{extension}'"),
            Self::Decode(err) => write!(f, "error decoding saved data: {err}"),
        }
    }
}

impl std::error::Error for MemorySaveError {}

impl MemorySaveWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, extension: &str) -> Option<&[u8]> {
        self.files.get(extension).map(Vec::as_slice)
    }
}

impl SaveWriter for MemorySaveWriter {
    type Err = MemorySaveError;

    fn load_bytes(&mut self, extension: &str) -> Result<Vec<u8>, Self::Err> {
        self.files
            .get(extension)
            .cloned()
            .ok_or_else(|| MemorySaveError::NotFound(extension.into()))
    }

    fn persist_bytes(&mut self, extension: &str, bytes: &[u8]) -> Result<(), Self::Err> {
        self.files.insert(extension.into(), bytes.to_vec());
        Ok(())
    }

    fn load_serialized<D: Decode<()>>(&mut self, extension: &str) -> Result<D, Self::Err> {
        let bytes = self.load_bytes(extension)?;
        let (value, _) = bincode::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|err| MemorySaveError::Decode(err.to_string()))?;
        Ok(value)
    }

    fn persist_serialized<E: Encode>(&mut self, extension: &str, data: E) -> Result<(), Self::Err> {
        let bytes = bincode::encode_to_vec(data, bincode::config::standard())
            .map_err(|err| MemorySaveError::Decode(err.to_string()))?;
        self.files.insert(extension.into(), bytes);
        Ok(())
    }
}
