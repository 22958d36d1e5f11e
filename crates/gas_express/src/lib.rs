//! Hash-power / "gas-station express" estimator: builds an acceptance
//! curve from recently mined blocks and reads off safe-low / standard /
//! fast / fastest price levels.

use std::{collections::HashMap, path::Path, sync::Arc};

use gas_cache::{BlockCache, CacheError};
use gas_eth::{B256, U256};
use gas_numeric::{bucket_to_wei, quantize_to_10gwei};
use gas_scoring::{ScoringError, ScoringPipeline};

/// How many of the newest blocks to fetch and clean per tick.
const INSPECTED_BLOCKS: u64 = 100;
/// Cap on how many of the most recently observed clean-blocks feed the
/// hash-power table.
const RECENT_BLOCK_CAP: usize = 200;

const SAFE_LOW_THRESHOLD: u64 = 35;
const STANDARD_THRESHOLD: u64 = 60;
const FAST_THRESHOLD: u64 = 90;

#[derive(Debug, thiserror::Error)]
pub enum ExpressError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    /// The hash-power table was empty, so no prediction could be derived.
    /// Only possible before any clean-blocks have been observed.
    #[error("not enough clean blocks to build a hash-power table")]
    NotEnoughBlocks,
}

#[derive(Debug, Clone)]
struct CleanBlock {
    hash: B256,
    number: u64,
    min_gas_price_bucket: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct HashpowerEntry {
    bucket: u64,
    hashp_pct: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct GasPricePredictions {
    pub safe_low: u128,
    pub standard: u128,
    pub fast: u128,
    pub fastest: u128,
    pub block_number: u64,
    pub block_time_seconds: i64,
}

pub struct ExpressEstimator {
    cache: Arc<BlockCache>,
    scoring: ScoringPipeline,
    clean_blocks: HashMap<B256, CleanBlock>,
    last_observed_block_number: u64,
}

impl ExpressEstimator {
    pub fn new(cache: Arc<BlockCache>) -> Self {
        let scoring = ScoringPipeline::new(
            cache.clone(),
            "express",
            vec![
                "safeLow".to_string(),
                "standard".to_string(),
                "fast".to_string(),
                "fastest".to_string(),
            ],
        );
        ExpressEstimator {
            cache,
            scoring,
            clean_blocks: HashMap::new(),
            last_observed_block_number: 0,
        }
    }

    pub async fn tick(&mut self, output_dir: &Path) -> Result<(), ExpressError> {
        let latest = self.cache.latest().await?;
        let block_number = latest.number;
        if block_number <= self.last_observed_block_number {
            log::info!("already predicted");
            return Ok(());
        }

        let first_new = block_number
            .saturating_sub(INSPECTED_BLOCKS)
            .max(self.last_observed_block_number + 1);
        log::info!("getting blocks {first_new}..={block_number}");
        for number in first_new..=block_number {
            let clean = self.process_block(number).await?;
            self.clean_blocks.insert(clean.hash, clean);
        }
        self.last_observed_block_number = block_number;

        let predictions = self.estimate_fees()?;
        log::info!(
            "express estimation complete: standard {} wei at block {}",
            predictions.standard, predictions.block_number
        );

        self.scoring.add_prediction(
            predictions.block_number,
            vec![
                predictions.safe_low,
                predictions.standard,
                predictions.fast,
                predictions.fastest,
            ],
        );
        self.scoring.grade_and_flush(output_dir).await?;
        Ok(())
    }

    async fn process_block(&self, number: u64) -> Result<CleanBlock, ExpressError> {
        let mut block = self.cache.by_number(number).await?;
        block.sort_transactions_by_gas_price();

        let min_gas_price = block
            .transactions
            .iter()
            .map(|tx| tx.gas_price)
            .find(|price| *price != U256::ZERO);

        if min_gas_price.is_none() && !block.transactions.is_empty() {
            log::warn!("gas price was 0 for every transaction in block {number}");
        }

        Ok(CleanBlock {
            hash: block.hash,
            number: block.number,
            min_gas_price_bucket: min_gas_price.map(quantize_to_10gwei),
        })
    }

    fn estimate_fees(&self) -> Result<GasPricePredictions, ExpressError> {
        if self.clean_blocks.is_empty() {
            return Err(ExpressError::NotEnoughBlocks);
        }

        let mut by_number: Vec<&CleanBlock> = self.clean_blocks.values().collect();
        by_number.sort_by_key(|b| b.number);

        // Most recent blocks first, capped at RECENT_BLOCK_CAP, then drop
        // the oldest element of that window. This preserves the reference
        // design's `blocks[0 : recentBlockIndex - 1]` slice, whose off-by-one
        // is a deliberate-or-bug open question (see DESIGN.md); we do not
        // silently "fix" it, only keep it from also discarding recency.
        let mut recent: Vec<&CleanBlock> = by_number.iter().rev().copied().collect();
        recent.truncate(RECENT_BLOCK_CAP);
        if recent.len() > 1 {
            recent.pop();
        }

        let hashpower = build_hashpower_table(&recent);
        let block_time_seconds = average_block_time(&by_number);

        let table = build_prediction_table(&hashpower);
        let safe_low = smallest_probe_at_or_above(&table, SAFE_LOW_THRESHOLD);
        let standard = smallest_probe_at_or_above(&table, STANDARD_THRESHOLD);
        let fast = smallest_probe_at_or_above(&table, FAST_THRESHOLD);
        let max_hpa = table.iter().map(|(_, hpa)| *hpa).max().unwrap_or(0);
        let fastest = table
            .iter()
            .find(|(_, hpa)| *hpa == max_hpa)
            .map(|(probe, _)| *probe)
            .unwrap_or(0);

        Ok(GasPricePredictions {
            safe_low: bucket_to_wei(safe_low).try_into().unwrap_or(u128::MAX),
            standard: bucket_to_wei(standard).try_into().unwrap_or(u128::MAX),
            fast: bucket_to_wei(fast).try_into().unwrap_or(u128::MAX),
            fastest: bucket_to_wei(fastest).try_into().unwrap_or(u128::MAX),
            block_number: self.last_observed_block_number,
            block_time_seconds,
        })
    }
}

#[async_trait::async_trait]
impl gas_driver::Tick for ExpressEstimator {
    async fn tick(&mut self, output_dir: &Path) -> Result<(), gas_driver::TickError> {
        ExpressEstimator::tick(self, output_dir).await.map_err(Into::into)
    }
}

/// Groups clean-blocks by bucket, returning entries sorted ascending by
/// bucket with running `hashpPct`. Blocks with no minimum gas price (every
/// transaction was zero-priced, or the block was empty) are excluded from
/// the aggregation rather than folded into bucket 0.
fn build_hashpower_table(blocks: &[&CleanBlock]) -> Vec<HashpowerEntry> {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for block in blocks {
        let Some(bucket) = block.min_gas_price_bucket else {
            continue;
        };
        *counts.entry(bucket).or_insert(0) += 1;
    }

    let mut buckets: Vec<u64> = counts.keys().copied().collect();
    buckets.sort_unstable();

    let total: usize = counts.values().sum();
    let mut cumulative = 0usize;
    buckets
        .into_iter()
        .map(|bucket| {
            cumulative += counts[&bucket];
            HashpowerEntry {
                bucket,
                hashp_pct: cumulative as f64 / total as f64 * 100.0,
            }
        })
        .collect()
}

/// Average gap, in block numbers, between consecutive blocks whose numbers
/// differ by exactly one; falls back to 15 seconds if no such pair exists.
fn average_block_time(blocks_ascending: &[&CleanBlock]) -> i64 {
    let mut sum = 0i64;
    let mut count = 0i64;
    for window in blocks_ascending.windows(2) {
        let diff = window[1].number as i64 - window[0].number as i64;
        if (0..=1).contains(&diff) {
            sum += diff;
            count += 1;
        }
    }
    if count == 0 {
        15
    } else {
        sum / count
    }
}

/// `hashpowerAccepting(probe)`: 100 above the top bucket, 0 below the
/// bottom bucket, otherwise the max `hashpPct` of any bucket `<= probe`.
fn hashpower_accepting(probe: u64, table: &[HashpowerEntry]) -> u64 {
    let max_bucket = table.iter().map(|e| e.bucket).max().unwrap_or(0);
    let min_bucket = table.iter().map(|e| e.bucket).min().unwrap_or(0);

    if probe > max_bucket {
        100
    } else if probe < min_bucket {
        0
    } else {
        table
            .iter()
            .filter(|e| e.bucket <= probe)
            .map(|e| e.hashp_pct as u64)
            .max()
            .unwrap_or(0)
    }
}

fn build_prediction_table(hashpower: &[HashpowerEntry]) -> Vec<(u64, u64)> {
    let mut probes: Vec<u64> = (0..=10).chain((10..=1010).step_by(10)).collect();
    probes.sort_unstable();
    probes.dedup();
    probes
        .into_iter()
        .map(|probe| (probe, hashpower_accepting(probe, hashpower)))
        .collect()
}

fn smallest_probe_at_or_above(table: &[(u64, u64)], threshold: u64) -> u64 {
    table
        .iter()
        .find(|(_, hpa)| *hpa >= threshold)
        .map(|(probe, _)| *probe)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(number: u64, bucket: Option<u64>) -> CleanBlock {
        CleanBlock {
            hash: B256::with_last_byte(number as u8),
            number,
            min_gas_price_bucket: bucket,
        }
    }

    #[test]
    fn two_blocks_same_bucket_all_thresholds_equal() {
        let blocks = vec![clean(1, Some(10)), clean(2, Some(10))];
        let refs: Vec<&CleanBlock> = blocks.iter().collect();
        let hashpower = build_hashpower_table(&refs);
        let table = build_prediction_table(&hashpower);
        let safe_low = smallest_probe_at_or_above(&table, SAFE_LOW_THRESHOLD);
        let standard = smallest_probe_at_or_above(&table, STANDARD_THRESHOLD);
        let fast = smallest_probe_at_or_above(&table, FAST_THRESHOLD);
        assert_eq!(safe_low, 10);
        assert_eq!(standard, 10);
        assert_eq!(fast, 10);
        assert_eq!(bucket_to_wei(10), U256::from(1_000_000_000u64));
    }

    #[test]
    fn four_buckets_match_worked_example() {
        let blocks = vec![
            clean(1, Some(10)),
            clean(2, Some(20)),
            clean(3, Some(30)),
            clean(4, Some(40)),
        ];
        let refs: Vec<&CleanBlock> = blocks.iter().collect();
        let hashpower = build_hashpower_table(&refs);
        let table = build_prediction_table(&hashpower);

        assert_eq!(smallest_probe_at_or_above(&table, SAFE_LOW_THRESHOLD), 20);
        assert_eq!(smallest_probe_at_or_above(&table, STANDARD_THRESHOLD), 30);
        assert_eq!(smallest_probe_at_or_above(&table, FAST_THRESHOLD), 40);

        let max_hpa = table.iter().map(|(_, hpa)| *hpa).max().unwrap();
        let fastest = table.iter().find(|(_, hpa)| *hpa == max_hpa).unwrap().0;
        assert_eq!(fastest, 40);
    }

    #[test]
    fn hashpower_accepting_is_monotonic_non_decreasing() {
        let blocks = vec![
            clean(1, Some(10)),
            clean(2, Some(20)),
            clean(3, Some(30)),
        ];
        let refs: Vec<&CleanBlock> = blocks.iter().collect();
        let hashpower = build_hashpower_table(&refs);
        let table = build_prediction_table(&hashpower);
        let mut last = 0u64;
        for (_, hpa) in &table {
            assert!(*hpa >= last);
            last = *hpa;
        }
    }

    #[test]
    fn block_time_falls_back_to_fifteen_seconds_with_no_adjacent_pairs() {
        let blocks = vec![clean(1, Some(10)), clean(100, Some(10))];
        let refs: Vec<&CleanBlock> = blocks.iter().collect();
        assert_eq!(average_block_time(&refs), 15);
    }

    #[test]
    fn block_time_averages_adjacent_pairs() {
        let blocks = vec![
            clean(1, Some(10)),
            clean(2, Some(10)),
            clean(3, Some(10)),
        ];
        let refs: Vec<&CleanBlock> = blocks.iter().collect();
        assert_eq!(average_block_time(&refs), 1);
    }

    #[test]
    fn blocks_with_no_minimum_gas_price_are_excluded_from_hashpower() {
        let blocks = vec![clean(1, None), clean(2, Some(10)), clean(3, Some(10))];
        let refs: Vec<&CleanBlock> = blocks.iter().collect();
        let hashpower = build_hashpower_table(&refs);
        assert_eq!(hashpower.len(), 1);
        assert_eq!(hashpower[0].bucket, 10);
        assert_eq!(hashpower[0].hashp_pct, 100.0);
    }
}
