use alloy_primitives::B256;
use serde::{Serialize, Serializer};

use crate::serde_helpers::EmptyParams;

/// The block selector accepted by `eth_getBlockByNumber`. Only `latest` and
/// an explicit height are needed; block tags like `pending` or `earliest`
/// are out of scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockSpec {
    Latest,
    Number(u64),
}

impl Serialize for BlockSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BlockSpec::Latest => serializer.serialize_str("latest"),
            BlockSpec::Number(number) => serializer.serialize_str(&format!("0x{number:x}")),
        }
    }
}

/// Methods for requests to a remote Ethereum node. Only contains the methods
/// supported by [`crate::jsonrpc`] and used by the estimators.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum RequestMethod {
    /// `eth_getBlockByNumber`
    #[serde(rename = "eth_getBlockByNumber")]
    GetBlockByNumber(
        BlockSpec,
        /// include transaction data
        bool,
    ),
    /// `eth_getBlockByHash`
    #[serde(rename = "eth_getBlockByHash")]
    GetBlockByHash(
        B256,
        /// include transaction data
        bool,
    ),
    /// `eth_gasPrice`
    #[serde(rename = "eth_gasPrice")]
    GasPrice(EmptyParams),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_spec_serializes_latest_as_string() {
        let json = serde_json::to_value(BlockSpec::Latest).unwrap();
        assert_eq!(json, serde_json::json!("latest"));
    }

    #[test]
    fn block_spec_serializes_number_as_hex() {
        let json = serde_json::to_value(BlockSpec::Number(255)).unwrap();
        assert_eq!(json, serde_json::json!("0xff"));
    }

    #[test]
    fn get_block_by_number_serializes_with_tag_and_params() {
        let method = RequestMethod::GetBlockByNumber(BlockSpec::Number(1), true);
        let json = serde_json::to_value(&method).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"method": "eth_getBlockByNumber", "params": ["0x1", true]})
        );
    }

    #[test]
    fn gas_price_serializes_with_empty_params() {
        let method = RequestMethod::GasPrice(EmptyParams);
        let json = serde_json::to_value(&method).unwrap();
        assert_eq!(json, serde_json::json!({"method": "eth_gasPrice", "params": []}));
    }
}
