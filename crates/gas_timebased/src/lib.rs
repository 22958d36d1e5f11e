//! Time-based probability estimator: derives, per acceptance profile, the
//! price at which a transaction is likely to be mined within a target wait
//! time with a target probability, from each miner's recent low-percentile
//! gas price.

use std::{collections::HashMap, collections::HashSet, path::Path, sync::Arc};

use gas_cache::{BlockCache, CacheError};
use gas_eth::Address;
use gas_scoring::{ScoringError, ScoringPipeline};

/// Desired probability that a transaction is mined within the wait window.
const DESIRED_PROBABILITY: f64 = 0.98;

#[derive(Debug, Clone, Copy)]
struct Profile {
    name: &'static str,
    max_wait_seconds: u64,
    sample_size: u64,
}

const PROFILES: [Profile; 4] = [
    Profile { name: "fast", max_wait_seconds: 60, sample_size: 120 },
    Profile { name: "medium", max_wait_seconds: 600, sample_size: 120 },
    Profile { name: "slow", max_wait_seconds: 60 * 60, sample_size: 120 },
    Profile { name: "glacial", max_wait_seconds: 60 * 60 * 24, sample_size: 720 },
];

#[derive(Debug, thiserror::Error)]
pub enum TimeBasedError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error("sample window is empty at the current chain height")]
    EmptySampleWindow,

    /// The reference design treats this as an unreachable panic; we keep it
    /// recoverable since a caller-visible invariant violation should not
    /// take the whole process down.
    #[error("probabilities were not sorted correctly, or a desired probability fell outside a gap the loop should have covered")]
    Invariant,
}

struct CleanTx {
    miner: Address,
    block_hash: gas_eth::B256,
    gas_price: u128,
}

#[derive(Debug, Clone, Copy)]
struct MinerData {
    blocks: usize,
    min_gas_price: u128,
    low_percentile_gas_price: u128,
}

#[derive(Debug, Clone, Copy)]
struct Probability {
    gas_price: u128,
    probability: f64,
}

pub struct TimeBasedEstimator {
    cache: Arc<BlockCache>,
    scoring: ScoringPipeline,
    last_observed: Option<u64>,
}

impl TimeBasedEstimator {
    pub fn new(cache: Arc<BlockCache>) -> Self {
        let scoring = ScoringPipeline::new(
            cache.clone(),
            "timebased",
            PROFILES.iter().map(|p| p.name.to_string()).collect(),
        );
        TimeBasedEstimator {
            cache,
            scoring,
            last_observed: None,
        }
    }

    pub async fn tick(&mut self, output_dir: &Path) -> Result<(), TimeBasedError> {
        let latest = self.cache.latest().await?;
        if let Some(last) = self.last_observed {
            if latest.number <= last {
                log::info!("already predicted");
                return Ok(());
            }
        }

        let mut prices = Vec::with_capacity(PROFILES.len());
        for profile in PROFILES {
            let price = self.estimate_for_profile(profile).await?;
            log::info!("{} gas price: {} wei", profile.name, price);
            prices.push(price);
        }
        self.last_observed = Some(latest.number);

        self.scoring.add_prediction(latest.number, prices);
        self.scoring.grade_and_flush(output_dir).await?;
        Ok(())
    }

    async fn estimate_for_profile(&self, profile: Profile) -> Result<u128, TimeBasedError> {
        let avg_block_time = self.avg_block_time(profile.sample_size).await?;
        let wait_blocks = (profile.max_wait_seconds as f64 / avg_block_time).ceil();

        let raw = self.raw_miner_data(profile.sample_size).await?;
        let aggregated = aggregate_miner_data(&raw);
        let probabilities = compute_probabilities(aggregated, wait_blocks, profile.sample_size as f64);
        compute_gas_price(&probabilities, DESIRED_PROBABILITY)
    }

    /// Average seconds per block over the `sample_size` most recent blocks
    /// (or fewer, if the chain is shorter).
    async fn avg_block_time(&self, sample_size: u64) -> Result<f64, TimeBasedError> {
        let latest = self.cache.latest().await?;
        let constrained = sample_size.min(latest.number);
        if constrained == 0 {
            return Err(TimeBasedError::EmptySampleWindow);
        }

        let oldest_number = latest.number - constrained;
        let oldest = self.cache.header_by_number(oldest_number).await?;
        let diff = latest.timestamp.saturating_sub(oldest.timestamp);
        Ok(diff as f64 / constrained as f64)
    }

    /// Walks backwards from the head by parent hash (not block number, so
    /// the per-hash block cache can serve repeated walks) collecting one
    /// `CleanTx` per transaction in up to `sample_size` blocks.
    async fn raw_miner_data(&self, sample_size: u64) -> Result<Vec<CleanTx>, TimeBasedError> {
        let mut block = self.cache.latest().await?;
        let mut txs = Vec::new();
        for tx in &block.transactions {
            txs.push(CleanTx {
                miner: block.miner,
                block_hash: block.hash,
                gas_price: tx.gas_price.try_into().unwrap_or(u128::MAX),
            });
        }

        for _ in 0..sample_size.saturating_sub(1) {
            if block.number == 0 {
                break;
            }
            block = self.cache.by_hash(block.parent_hash).await?;
            for tx in &block.transactions {
                txs.push(CleanTx {
                    miner: block.miner,
                    block_hash: block.hash,
                    gas_price: tx.gas_price.try_into().unwrap_or(u128::MAX),
                });
            }
        }

        Ok(txs)
    }
}

#[async_trait::async_trait]
impl gas_driver::Tick for TimeBasedEstimator {
    async fn tick(&mut self, output_dir: &Path) -> Result<(), gas_driver::TickError> {
        TimeBasedEstimator::tick(self, output_dir).await.map_err(Into::into)
    }
}

/// Groups transactions by miner, computing each miner's block count, minimum
/// gas price, and 20th-percentile gas price among its transactions.
fn aggregate_miner_data(txs: &[CleanTx]) -> Vec<MinerData> {
    let mut by_miner: HashMap<Address, Vec<&CleanTx>> = HashMap::new();
    for tx in txs {
        by_miner.entry(tx.miner).or_default().push(tx);
    }

    by_miner
        .into_values()
        .map(|group| {
            let mut gas_prices: Vec<u128> = group.iter().map(|tx| tx.gas_price).collect();
            gas_prices.sort_unstable();

            let blocks: HashSet<gas_eth::B256> = group.iter().map(|tx| tx.block_hash).collect();
            let percentile_index = gas_numeric::percentile_index(gas_prices.len(), 20);

            MinerData {
                blocks: blocks.len(),
                min_gas_price: gas_prices[0],
                low_percentile_gas_price: gas_prices[percentile_index],
            }
        })
        .collect()
}

/// Sorts miners by descending low-percentile gas price, then for each miner
/// computes the probability of acceptance within `wait_blocks` given the
/// fraction of sampled blocks mined by miners accepting that price or lower
/// (a cumulative sum over the descending order: the miner's own blocks plus
/// every miner priced above it).
fn compute_probabilities(mut miners: Vec<MinerData>, wait_blocks: f64, sample_size: f64) -> Vec<Probability> {
    miners.sort_by(|a, b| b.low_percentile_gas_price.cmp(&a.low_percentile_gas_price));

    let mut probabilities = Vec::with_capacity(miners.len());
    for (idx, miner) in miners.iter().enumerate() {
        let blocks_accepting: usize = miners[..=idx].iter().map(|m| m.blocks).sum();
        let inv_prob_per_block = (sample_size - blocks_accepting as f64) / sample_size;
        let probability_accepted = 1.0 - inv_prob_per_block.powf(wait_blocks);
        debug_assert!(
            probabilities
                .last()
                .is_none_or(|prev: &Probability| probability_accepted >= prev.probability),
            "probability must be non-decreasing as gas price descends",
        );
        probabilities.push(Probability {
            gas_price: miner.low_percentile_gas_price,
            probability: probability_accepted,
        });
    }
    probabilities
}

/// Interpolates a gas price from a descending-probability curve: clamps to
/// the curve's endpoints outside its range, otherwise linearly interpolates
/// within the bracketing pair.
fn compute_gas_price(probabilities: &[Probability], desired_probability: f64) -> Result<u128, TimeBasedError> {
    let first = probabilities.first().ok_or(TimeBasedError::Invariant)?;
    let last = probabilities.last().ok_or(TimeBasedError::Invariant)?;

    if desired_probability >= first.probability {
        return Ok(first.gas_price);
    }
    if desired_probability <= last.probability {
        return Ok(last.gas_price);
    }

    for window in probabilities.windows(2) {
        let left = window[0];
        let right = window[1];
        if desired_probability < right.probability {
            continue;
        }
        if desired_probability > left.probability {
            return Err(TimeBasedError::Invariant);
        }

        let adjusted = desired_probability - right.probability;
        let window_size = left.probability - right.probability;
        let position = adjusted / window_size;
        let gas_window_size = left.gas_price as f64 - right.gas_price as f64;
        let gas_price = (right.gas_price as f64 + gas_window_size * position).ceil();
        return Ok(gas_price as u128);
    }

    Err(TimeBasedError::Invariant)
}
