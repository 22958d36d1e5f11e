//! Helpers for (de)serializing JSON-RPC request shapes that carry no
//! meaningful parameters.

use serde::{de::Error as _, ser::SerializeSeq, Deserialize, Deserializer, Serialize, Serializer};

/// A marker that (de)serializes as an empty JSON array, for methods like
/// `eth_gasPrice` that take no parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct EmptyParams;

impl Serialize for EmptyParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_seq(Some(0))?.end()
    }
}

impl<'de> Deserialize<'de> for EmptyParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let seq = Option::<Vec<()>>::deserialize(deserializer)?.unwrap_or_default();
        if !seq.is_empty() {
            return Err(D::Error::custom(format!(
                "expected an empty params array, got {} elements",
                seq.len()
            )));
        }
        Ok(EmptyParams)
    }
}
