//! A thin JSON-RPC client for the subset of the Ethereum node API the
//! estimators depend on: `eth_getBlockByNumber`, `eth_getBlockByHash` and
//! `eth_gasPrice`.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use gas_eth::{
    jsonrpc,
    request::{BlockSpec, RequestMethod},
    Block, Header, B256,
};
use reqwest::Client as HttpClient;
use reqwest_middleware::{ClientBuilder as HttpClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;

// Retry parameters for transient transport failures (connection reset,
// 5xx, timeout). A JSON-RPC-level error response is never retried here;
// the server has already answered.
const EXPONENT_BASE: u32 = 2;
const MIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(32);
const MAX_RETRIES: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum RpcClientError {
    #[error("failed to send request to the node: {0}")]
    FailedToSend(#[from] reqwest_middleware::Error),

    #[error("the node returned an error status code: {0}")]
    HttpStatus(#[source] reqwest::Error),

    #[error("the response body could not be read: {0}")]
    CorruptedResponse(#[source] reqwest::Error),

    #[error("the request could not be serialized: {0}")]
    InvalidJsonRequest(#[source] serde_json::Error),

    #[error("response '{response}' failed to parse as '{expected_type}': {error}")]
    InvalidResponse {
        response: String,
        expected_type: &'static str,
        error: serde_json::Error,
    },

    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),

    #[error("the node returned a JSON-RPC error: {0}")]
    JsonRpcError(#[from] jsonrpc::Error),
}

/// A client for executing JSON-RPC methods against a remote Ethereum node.
#[derive(Debug)]
pub struct RpcClient {
    url: url::Url,
    client: ClientWithMiddleware,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Creates a new client for the given node URL.
    pub fn new(url: &str) -> Result<Self, RpcClientError> {
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(MIN_RETRY_INTERVAL, MAX_RETRY_INTERVAL)
            .base(EXPONENT_BASE)
            .build_with_max_retries(MAX_RETRIES);
        Self::with_retry_policy(url, retry_policy)
    }

    fn with_retry_policy(url: &str, retry_policy: ExponentialBackoff) -> Result<Self, RpcClientError> {
        let client = HttpClient::builder()
            .build()
            .expect("default reqwest client construction never fails");
        let client = HttpClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(RpcClient {
            url: url.parse()?,
            client,
            next_id: AtomicU64::new(0),
        })
    }

    /// Fetches the latest block, including its transactions. Never cached by
    /// the client itself — callers that need memoization wrap this in a
    /// block cache.
    pub async fn latest_block(&self) -> Result<Block, RpcClientError> {
        self.call(RequestMethod::GetBlockByNumber(BlockSpec::Latest, true))
            .await
    }

    /// Fetches a block by number, including its transactions. Returns `None`
    /// if the node has not yet mined that block.
    pub async fn block_by_number(&self, number: u64) -> Result<Option<Block>, RpcClientError> {
        self.call(RequestMethod::GetBlockByNumber(
            BlockSpec::Number(number),
            true,
        ))
        .await
    }

    /// Fetches a block by hash, including its transactions.
    pub async fn block_by_hash(&self, hash: B256) -> Result<Option<Block>, RpcClientError> {
        self.call(RequestMethod::GetBlockByHash(hash, true)).await
    }

    /// Fetches only the number and timestamp of a block.
    pub async fn header_by_number(&self, number: u64) -> Result<Option<Header>, RpcClientError> {
        self.call(RequestMethod::GetBlockByNumber(
            BlockSpec::Number(number),
            false,
        ))
        .await
    }

    /// Probes the node's own gas price suggestion. Not used by any
    /// estimator directly; exposed for completeness and diagnostics.
    pub async fn gas_price(&self) -> Result<gas_eth::U256, RpcClientError> {
        self.call(RequestMethod::GasPrice(gas_eth::serde_helpers::EmptyParams))
            .await
    }

    async fn call<SuccessT: DeserializeOwned>(
        &self,
        method: RequestMethod,
    ) -> Result<SuccessT, RpcClientError> {
        let id = jsonrpc::Id::Num(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = jsonrpc::Request {
            jsonrpc: jsonrpc::Version::V2_0,
            id,
            method: &method,
        };
        let body =
            serde_json::to_string(&request).map_err(RpcClientError::InvalidJsonRequest)?;

        log::debug!("calling {}", self.url);
        let response = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|error| {
                log::warn!("transport retries exhausted calling {}: {error}", self.url);
                RpcClientError::FailedToSend(error)
            })?
            .error_for_status()
            .map_err(|error| {
                log::warn!("transport retries exhausted calling {}: {error}", self.url);
                RpcClientError::HttpStatus(error)
            })?;

        let response_text = response.text().await.map_err(RpcClientError::CorruptedResponse)?;

        let response: jsonrpc::Response<SuccessT> = serde_json::from_str(&response_text)
            .map_err(|error| RpcClientError::InvalidResponse {
                response: response_text,
                expected_type: std::any::type_name::<SuccessT>(),
                error,
            })?;

        Ok(response.into_result()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_url() {
        let result = RpcClient::new("not a url");
        assert!(matches!(result, Err(RpcClientError::InvalidUrl(_))));
    }

    /// A transient 500 is retried rather than surfaced immediately: the node
    /// sees more than one attempt before the client gives up.
    #[tokio::test]
    async fn transient_failures_are_retried() {
        let mut server = mockito::Server::new_async().await;

        const TEST_MAX_RETRIES: u32 = 3;
        let mock = server
            .mock("POST", "/")
            .with_status(500)
            .expect(usize::try_from(TEST_MAX_RETRIES).unwrap() + 1)
            .create_async()
            .await;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(1), Duration::from_millis(5))
            .base(EXPONENT_BASE)
            .build_with_max_retries(TEST_MAX_RETRIES);
        let client = RpcClient::with_retry_policy(&server.url(), retry_policy).unwrap();

        let result = client.gas_price().await;
        assert!(matches!(result, Err(RpcClientError::HttpStatus(_))));

        mock.assert_async().await;
    }
}
