//! CBOR codec for payloads, entries and buffered events.
//!
//! Every value that crosses a process boundary or lands in a store goes
//! through these two functions, so the encoding stays uniform.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CoreError, Result};

/// Encode a value to CBOR bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::Encoding(e.to_string()))?;
    Ok(buf)
}

/// Decode a value from CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::Decoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode::<BTreeMap<String, u64>>(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, CoreError::Decoding(_)));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let bytes = encode(&"just a string").unwrap();
        assert!(decode::<Vec<u64>>(&bytes).is_err());
    }
}
