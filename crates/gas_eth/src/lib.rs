//! Wire types and JSON-RPC request shapes for the subset of the Ethereum
//! JSON-RPC surface this estimator depends on.

pub mod jsonrpc;
pub mod request;
pub mod serde_helpers;
pub mod types;

pub use alloy_primitives::{Address, B256, U256};
pub use request::{BlockSpec, RequestMethod};
pub use types::{Block, Header, Transaction};
