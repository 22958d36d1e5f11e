//! Naive percentile gas price estimator: per-block minimum gas prices,
//! percentile-aggregated across a recent window.

use std::{path::Path, sync::Arc};

use gas_cache::{BlockCache, CacheError};
use gas_eth::Block;
use gas_scoring::{ScoringError, ScoringPipeline};

/// 500 Gwei, in wei. A compile-time ceiling on the recommended price.
pub const MAX_PRICE_WEI: u128 = 500_000_000_000;

#[derive(Debug, Clone, Copy)]
pub struct NaiveConfig {
    /// Window size: how many recent blocks to sample.
    pub blocks: u64,
    /// Percentile (1-100) of the collected per-block minimums to recommend.
    pub percentile: u32,
}

impl Default for NaiveConfig {
    fn default() -> Self {
        NaiveConfig {
            blocks: 20,
            percentile: 60,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NaiveError {
    /// Every sampled block was empty (or unreachable) and no price could be
    /// formed. The tick reports this but does not crash the estimator.
    #[error("not enough blocks to form a prediction")]
    NotEnoughBlocks,

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),
}

pub struct NaiveEstimator {
    config: NaiveConfig,
    cache: Arc<BlockCache>,
    scoring: ScoringPipeline,
    last_observed: Option<u64>,
}

impl NaiveEstimator {
    pub fn new(config: NaiveConfig, cache: Arc<BlockCache>) -> Self {
        let scoring = ScoringPipeline::new(cache.clone(), "naive", vec!["standard".to_string()]);
        NaiveEstimator {
            config,
            cache,
            scoring,
            last_observed: None,
        }
    }

    /// Runs one tick: skip if the head hasn't advanced, otherwise suggest a
    /// price, record the prediction, and grade/flush outstanding ones.
    pub async fn tick(&mut self, output_dir: &Path) -> Result<(), NaiveError> {
        let latest = self.cache.latest().await?;
        if let Some(last) = self.last_observed {
            if latest.number <= last {
                log::info!("already predicted");
                return Ok(());
            }
        }

        let price = self.suggest_gas_price(latest.number).await?;
        self.last_observed = Some(latest.number);
        log::info!("naive estimation complete: {} wei at block {}", price, latest.number);

        self.scoring.add_prediction(latest.number, vec![price]);
        self.scoring.grade_and_flush(output_dir).await?;
        Ok(())
    }

    /// Fetches `config.blocks` blocks ending at `current_block_number`,
    /// descending, in parallel, and recommends the configured percentile of
    /// their per-block minimum non-coinbase gas price.
    pub async fn suggest_gas_price(&self, current_block_number: u64) -> Result<u128, NaiveError> {
        let mut fetches = Vec::new();
        let mut block_number = current_block_number;
        let mut sent = 0u64;
        while sent < self.config.blocks && block_number > 0 {
            let cache = self.cache.clone();
            let number = block_number;
            fetches.push(async move { cache.by_number(number).await });
            sent += 1;
            block_number -= 1;
        }

        let results = futures::future::join_all(fetches).await;

        // maxEmpty is tracked for parity with the reference design but does
        // not actually gate the tick: any number of empty blocks is
        // tolerated, and the tick only fails if *no* price could be formed
        // at all (see NotEnoughBlocks below).
        let _max_empty = (self.config.blocks / 2) as usize;

        let mut prices = Vec::new();
        for result in results {
            match result {
                Ok(block) => {
                    if let Some(price) = lowest_non_coinbase_price(&block) {
                        prices.push(price);
                    }
                }
                Err(CacheError::BlockNotFound) => {}
                Err(error) => return Err(error.into()),
            }
        }

        if prices.is_empty() {
            return Err(NaiveError::NotEnoughBlocks);
        }

        prices.sort_unstable();
        let index = gas_numeric::percentile_index(prices.len(), self.config.percentile);
        Ok(prices[index].min(MAX_PRICE_WEI))
    }
}

#[async_trait::async_trait]
impl gas_driver::Tick for NaiveEstimator {
    async fn tick(&mut self, output_dir: &Path) -> Result<(), gas_driver::TickError> {
        NaiveEstimator::tick(self, output_dir).await.map_err(Into::into)
    }
}

/// Lowest gas price among transactions whose sender is not the block's
/// miner. `None` if no qualifying transaction exists.
fn lowest_non_coinbase_price(block: &Block) -> Option<u128> {
    let mut transactions = block.transactions.clone();
    transactions.sort_by(|a, b| a.gas_price.cmp(&b.gas_price));
    transactions
        .iter()
        .find(|tx| tx.from != Some(block.miner))
        .map(|tx| tx.gas_price.try_into().unwrap_or(u128::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gas_eth::{Address, Transaction, B256, U256};

    fn block(number: u64, miner: Address, prices: &[(u64, Option<Address>)]) -> Block {
        Block {
            parent_hash: B256::ZERO,
            hash: B256::with_last_byte(number as u8),
            miner,
            number,
            timestamp: 0,
            transactions: prices
                .iter()
                .map(|(gwei, from)| Transaction {
                    hash: B256::ZERO,
                    from: *from,
                    gas_price: U256::from(*gwei) * U256::from(1_000_000_000u64),
                })
                .collect(),
        }
    }

    #[test]
    fn lowest_price_excludes_coinbase_transaction() {
        let miner = Address::with_last_byte(1);
        let other = Address::with_last_byte(2);
        let b = block(
            1,
            miner,
            &[(1, Some(miner)), (3, Some(other)), (5, Some(other))],
        );
        let price = lowest_non_coinbase_price(&b).unwrap();
        assert_eq!(price, 3_000_000_000);
    }

    #[test]
    fn all_coinbase_block_has_no_qualifying_price() {
        let miner = Address::with_last_byte(1);
        let b = block(1, miner, &[(1, Some(miner))]);
        assert!(lowest_non_coinbase_price(&b).is_none());
    }

    #[test]
    fn percentile_recommendation_matches_worked_example() {
        // 3 blocks, percentile 50, per-block minimums [3, 5, 7] Gwei -> 5 Gwei.
        let mut prices = vec![3_000_000_000u128, 5_000_000_000, 7_000_000_000];
        prices.sort_unstable();
        let idx = gas_numeric::percentile_index(prices.len(), 50);
        assert_eq!(prices[idx], 5_000_000_000);
    }
}
