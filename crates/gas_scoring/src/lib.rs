//! Grades outstanding predictions against subsequently mined blocks and
//! flushes them to a CSV sink.
//!
//! Generalizes the per-algorithm scoring types (naive has one price level,
//! express and the time-based estimator have four) into a single pipeline
//! parameterized by the set of level names, since the grading and flush
//! logic is identical across all three.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::Arc,
};

use alloy_primitives::U256;
use gas_cache::{BlockCache, CacheError};

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("failed to write scores: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write scores: {0}")]
    Csv(#[from] csv::Error),
}

/// How many future blocks a prediction is graded against.
const GRADING_WINDOW: u64 = 10;
/// Sentinel written for a score column whose block has not yet been fetched.
const MISSING_SCORE: i64 = -1;

struct Prediction {
    predicted_at: u64,
    /// Predicted prices, in wei, aligned with [`ScoringPipeline::level_names`].
    levels: Vec<u128>,
    /// block number -> per-level score, aligned with `levels`.
    scores: BTreeMap<u64, Vec<f64>>,
}

/// Grades predictions produced by a single estimator and periodically
/// flushes them to `<estimator_name>scores<timestamp>.csv`.
pub struct ScoringPipeline {
    cache: Arc<BlockCache>,
    estimator_name: String,
    level_names: Vec<String>,
    predictions: HashMap<u64, Prediction>,
}

impl ScoringPipeline {
    pub fn new(cache: Arc<BlockCache>, estimator_name: impl Into<String>, level_names: Vec<String>) -> Self {
        ScoringPipeline {
            cache,
            estimator_name: estimator_name.into(),
            level_names,
            predictions: HashMap::new(),
        }
    }

    /// Records a prediction at `predicted_at`, if one does not already
    /// exist for that block number. `levels` must align with the level
    /// names passed to [`ScoringPipeline::new`].
    pub fn add_prediction(&mut self, predicted_at: u64, levels: Vec<u128>) {
        debug_assert_eq!(levels.len(), self.level_names.len());
        self.predictions.entry(predicted_at).or_insert_with(|| Prediction {
            predicted_at,
            levels,
            scores: BTreeMap::new(),
        });
    }

    /// Grades every outstanding prediction against blocks it hasn't yet been
    /// scored against, then flushes all predictions (graded or not) to a
    /// fresh CSV file.
    pub async fn grade_and_flush(&mut self, output_dir: &Path) -> Result<(), ScoringError> {
        for prediction in self.predictions.values_mut() {
            Self::grade(prediction, &self.cache).await?;
        }
        self.flush(output_dir)
    }

    async fn grade(prediction: &mut Prediction, cache: &BlockCache) -> Result<(), ScoringError> {
        for block_number in (prediction.predicted_at + 1)..=(prediction.predicted_at + GRADING_WINDOW) {
            if prediction.scores.contains_key(&block_number) {
                continue;
            }

            let mut block = match cache.by_number(block_number).await {
                Ok(block) => block,
                Err(CacheError::BlockNotFound) => break, // not yet mined; try again next tick
                Err(error) => return Err(error.into()),
            };

            block.sort_transactions_by_gas_price();
            let tx_count = block.transactions.len();
            let row: Vec<f64> = prediction
                .levels
                .iter()
                .map(|level| score_against_block(&block.transactions, *level, tx_count))
                .collect();
            prediction.scores.insert(block_number, row);
        }
        Ok(())
    }

    fn flush(&self, output_dir: &Path) -> Result<(), ScoringError> {
        std::fs::create_dir_all(output_dir)?;
        let timestamp = chrono::Utc::now().to_rfc3339();
        let file_name = format!("{}scores{timestamp}.csv", self.estimator_name);
        let path = output_dir.join(file_name);
        let mut writer = csv::Writer::from_path(path)?;

        writer.write_record(self.header())?;
        for prediction in self.predictions.values() {
            writer.write_record(self.record(prediction))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn header(&self) -> Vec<String> {
        let mut header = vec!["block_number".to_string()];
        for name in &self.level_names {
            header.push(format!("price_{name}"));
        }
        for offset in 1..=GRADING_WINDOW {
            for name in &self.level_names {
                header.push(format!("score_{name}_plus{offset}"));
            }
        }
        header
    }

    fn record(&self, prediction: &Prediction) -> Vec<String> {
        let mut record = vec![prediction.predicted_at.to_string()];
        for level in &prediction.levels {
            record.push(level.to_string());
        }
        for offset in 1..=GRADING_WINDOW {
            let block_number = prediction.predicted_at + offset;
            match prediction.scores.get(&block_number) {
                Some(scores) => {
                    for score in scores {
                        record.push(format!("{score:.3}"));
                    }
                }
                None => {
                    for _ in 0..self.level_names.len() {
                        record.push(MISSING_SCORE.to_string());
                    }
                }
            }
        }
        record
    }
}

/// Percentage of transactions whose gas price strictly exceeds `level`,
/// assuming `transactions` is sorted ascending by gas price.
fn score_against_block(transactions: &[gas_eth::Transaction], level: u128, tx_count: usize) -> f64 {
    if tx_count == 0 {
        return 0.0;
    }
    let level = U256::from(level);
    match transactions.iter().position(|tx| tx.gas_price > level) {
        Some(idx) => (1.0 - (idx as f64 / tx_count as f64)) * 100.0,
        None => 0.0,
    }
}
