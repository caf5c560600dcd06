use std::fmt::Debug;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, RosterError};

/// Converts application status values to and from the directory's string
/// payload. The engine treats the payload as opaque.
pub trait StatusSerializer: Send + Sync + 'static {
    /// The application's status type.
    type Value: Clone + Debug + Send + Sync + 'static;

    /// Encode a status value.
    fn serialize(&self, value: &Self::Value) -> Result<String>;

    /// Decode a status payload.
    fn deserialize(&self, raw: &str) -> Result<Self::Value>;
}

/// JSON encoding for any serde type.
pub struct JsonStatusSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStatusSerializer<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonStatusSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StatusSerializer for JsonStatusSerializer<T>
where
    T: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static,
{
    type Value = T;

    fn serialize(&self, value: &T) -> Result<String> {
        serde_json::to_string(value).map_err(|e| RosterError::Serialization(e.to_string()))
    }

    fn deserialize(&self, raw: &str) -> Result<T> {
        serde_json::from_str(raw).map_err(|e| RosterError::Deserialization(e.to_string()))
    }
}

/// Passes status strings through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringStatusSerializer;

impl StatusSerializer for StringStatusSerializer {
    type Value = String;

    fn serialize(&self, value: &String) -> Result<String> {
        Ok(value.clone())
    }

    fn deserialize(&self, raw: &str) -> Result<String> {
        Ok(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Load {
        actors: u32,
        draining: bool,
    }

    #[test]
    fn test_json_serializer() {
        let serializer = JsonStatusSerializer::<Load>::new();
        let value = Load {
            actors: 12,
            draining: false,
        };

        let raw = serializer.serialize(&value).unwrap();
        assert_eq!(raw, r#"{"actors":12,"draining":false}"#);
        assert_eq!(serializer.deserialize(&raw).unwrap(), value);
    }

    #[test]
    fn test_json_serializer_rejects_garbage() {
        let serializer = JsonStatusSerializer::<Load>::new();
        let err = serializer.deserialize("not json").unwrap_err();
        assert!(matches!(err, RosterError::Deserialization(_)));
    }
}
