/// Binary and JSON serialization facade.
///
/// Replica RPCs and the durable maps use bincode's standard configuration
/// (little-endian, varint lengths); the client and admin surfaces use JSON.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub struct Serializer;

impl Serializer {
    pub fn to_binary<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(value, bincode::config::standard())?)
    }

    pub fn from_binary<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(value)
    }

    /// Empty input decodes to the default value. Handoff records are read
    /// through this so a first append starts from an empty record.
    pub fn from_binary_or_default<T: DeserializeOwned + Default>(bytes: &[u8]) -> Result<T> {
        if bytes.is_empty() {
            return Ok(T::default());
        }
        Self::from_binary(bytes)
    }

    pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    pub fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
        Ok(serde_json::from_str(json)?)
    }
}
