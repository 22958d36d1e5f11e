//! An in-memory, TTL-evicting cache in front of the JSON-RPC block provider.
//!
//! Blocks are immutable once mined, so concurrent cache misses on the same
//! key are tolerated: at most a handful of redundant RPCs may be issued, but
//! the cache converges to a single entry per block hash.

use std::{collections::HashMap, sync::Arc, time::Duration};

use gas_eth::{Block, Header, B256};
use gas_rpc_client::{RpcClient, RpcClientError};
use parking_lot::RwLock;
use tokio::time::Instant;

/// Default time-to-live for a cached block.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60 * 60);
/// Interval at which the sweeper thread scans for expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The requested block has not been mined yet (or does not exist).
    #[error("block not found")]
    BlockNotFound,

    #[error(transparent)]
    Rpc(#[from] RpcClientError),
}

struct CacheEntry {
    block: Block,
    expires_at: Instant,
}

/// Caches blocks by hash, with a `number -> hash` convenience index.
///
/// The `number -> hash` index is intentionally never swept: it is a small,
/// bounded-by-distinct-blocks-observed index, and re-architecting it into an
/// LRU is a larger redesign than this cache's contract calls for. See
/// DESIGN.md for the rationale.
pub struct BlockCache {
    rpc: Arc<RpcClient>,
    blocks: RwLock<HashMap<B256, CacheEntry>>,
    number_to_hash: RwLock<HashMap<u64, B256>>,
    ttl: Duration,
}

impl BlockCache {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self::with_ttl(rpc, DEFAULT_TTL)
    }

    pub fn with_ttl(rpc: Arc<RpcClient>, ttl: Duration) -> Self {
        BlockCache {
            rpc,
            blocks: RwLock::new(HashMap::new()),
            number_to_hash: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Always a round trip: the chain head advances, so this is never
    /// cached.
    pub async fn latest(&self) -> Result<Block, CacheError> {
        Ok(self.rpc.latest_block().await?)
    }

    /// Consults the `number -> hash` index, then the hash map; on miss,
    /// fetches from the node and inserts under the canonical hash.
    pub async fn by_number(&self, number: u64) -> Result<Block, CacheError> {
        if let Some(hash) = self.number_to_hash.read().get(&number).copied() {
            if let Some(block) = self.fresh_block(&hash) {
                log::trace!("cache hit for block {number}");
                return Ok(block);
            }
        }

        log::debug!("cache miss for block {number}, fetching from node");
        let block = self
            .rpc
            .block_by_number(number)
            .await?
            .ok_or(CacheError::BlockNotFound)?;
        self.insert(block.clone());
        Ok(block)
    }

    /// Hash map only; negative results (not found) are never cached.
    pub async fn by_hash(&self, hash: B256) -> Result<Block, CacheError> {
        if let Some(block) = self.fresh_block(&hash) {
            log::trace!("cache hit for block {hash}");
            return Ok(block);
        }

        log::debug!("cache miss for block {hash}, fetching from node");
        let block = self.rpc.block_by_hash(hash).await?.ok_or(CacheError::BlockNotFound)?;
        self.insert(block.clone());
        Ok(block)
    }

    /// Header lookups are uncached: only number and timestamp are used, so
    /// the cost of a round trip is not worth a second cache structure.
    pub async fn header_by_number(&self, number: u64) -> Result<Header, CacheError> {
        log::debug!("fetching header for block {number}");
        self.rpc
            .header_by_number(number)
            .await?
            .ok_or(CacheError::BlockNotFound)
    }

    fn fresh_block(&self, hash: &B256) -> Option<Block> {
        let blocks = self.blocks.read();
        let entry = blocks.get(hash)?;
        if entry.expires_at > Instant::now() {
            Some(entry.block.clone())
        } else {
            None
        }
    }

    fn insert(&self, block: Block) {
        let expires_at = Instant::now() + self.ttl;
        let hash = block.hash;
        let number = block.number;
        self.blocks.write().insert(hash, CacheEntry { block, expires_at });
        self.number_to_hash.write().insert(number, hash);
    }

    /// Removes entries whose TTL has passed. Called by the sweeper; exposed
    /// for tests that want to assert eviction without waiting on a timer.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.blocks.write().retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A handle to the background sweeper task. Dropping it does not stop the
/// sweeper; call [`Sweeper::close`] for a graceful shutdown.
pub struct Sweeper {
    stop: Option<tokio::sync::oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Sweeper {
    /// Spawns a task that calls [`BlockCache::sweep`] every
    /// [`SWEEP_INTERVAL`] until stopped.
    pub fn spawn(cache: Arc<BlockCache>) -> Self {
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = interval.tick() => cache.sweep(),
                    _ = &mut stop_rx => break,
                }
            }
        });

        Sweeper {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Signals the sweeper to stop and joins it.
    pub async fn close(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block(number: u64) -> Block {
        Block {
            parent_hash: B256::ZERO,
            hash: B256::with_last_byte(number as u8),
            miner: gas_eth::Address::ZERO,
            number,
            timestamp: 0,
            transactions: Vec::new(),
        }
    }

    #[test]
    fn insert_then_sweep_respects_ttl() {
        let rpc = Arc::new(RpcClient::new("http://localhost:1").unwrap());
        let cache = BlockCache::with_ttl(rpc, Duration::from_secs(0));
        cache.insert(sample_block(1));
        assert_eq!(cache.len(), 1);
        // TTL of zero means the entry is already expired relative to "now".
        std::thread::sleep(Duration::from_millis(1));
        cache.sweep();
        assert!(cache.is_empty());
    }

    #[test]
    fn fresh_entries_survive_a_sweep() {
        let rpc = Arc::new(RpcClient::new("http://localhost:1").unwrap());
        let cache = BlockCache::with_ttl(rpc, Duration::from_secs(3600));
        cache.insert(sample_block(1));
        cache.sweep();
        assert_eq!(cache.len(), 1);
    }

    /// Two concurrent misses on the same block number race at most two RPCs
    /// and converge to a single cache entry.
    #[tokio::test]
    async fn concurrent_misses_on_the_same_block_converge_to_one_entry() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 0,
            "result": {
                "parentHash": format!("0x{}", "00".repeat(32)),
                "hash": format!("0x{}", "11".repeat(32)),
                "miner": format!("0x{}", "22".repeat(20)),
                "number": "0x64",
                "timestamp": "0x0",
                "transactions": [],
            },
        });
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .expect_at_most(2)
            .create_async()
            .await;

        let rpc = Arc::new(RpcClient::new(&server.url()).unwrap());
        let cache = Arc::new(BlockCache::new(rpc));

        let (first, second) = tokio::join!(cache.by_number(100), cache.by_number(100));
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(cache.len(), 1);

        mock.assert_async().await;
    }
}
