use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// A signed transaction, narrowed to the fields the estimators consume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: B256,
    /// Recovered sender, as reported by the node. Used for coinbase
    /// exclusion instead of local signature recovery (see naive estimator).
    #[serde(default)]
    pub from: Option<Address>,
    pub gas_price: U256,
}

/// A mined block, narrowed to the fields the estimators consume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub parent_hash: B256,
    pub hash: B256,
    pub miner: Address,
    #[serde(with = "alloy_serde::quantity")]
    pub number: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

/// A block header: number and timestamp only. Deserializes from the same
/// wire payload as [`Block`] when transactions are omitted from the
/// request (`eth_getBlockByNumber` with `includeTransactions = false`);
/// unused fields in the response are simply ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    #[serde(with = "alloy_serde::quantity")]
    pub number: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
}

impl Block {
    /// Sorts this block's transactions ascending by gas price in place.
    pub fn sort_transactions_by_gas_price(&mut self) {
        self.transactions.sort_by(|a, b| a.gas_price.cmp(&b.gas_price));
    }
}
