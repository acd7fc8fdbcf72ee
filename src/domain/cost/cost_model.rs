//! Exponentially-weighted cost model per (venue, operation type)

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{store, CostEstimate, CostRecord, CostSample, OperationType};
use crate::shared::errors::AppError;
use crate::shared::types::VenueId;

/// Protocol-declared base costs used to seed keys with no history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseCosts {
    pub swap: f64,
    pub borrow: f64,
    pub repay: f64,
    pub submission: f64,
}

impl Default for BaseCosts {
    fn default() -> Self {
        Self {
            swap: 0.0,
            borrow: 0.0,
            repay: 0.0,
            submission: 0.0,
        }
    }
}

impl BaseCosts {
    pub fn for_operation(&self, operation: OperationType) -> f64 {
        match operation {
            OperationType::Swap => self.swap,
            OperationType::Borrow => self.borrow,
            OperationType::Repay => self.repay,
            OperationType::Submission => self.submission,
        }
    }
}

/// Base cost override for a single venue and operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueBaseCost {
    pub venue: VenueId,
    pub operation: OperationType,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModelConfig {
    /// EWMA weight of the newest observation
    pub alpha: f64,
    /// Margin width in standard deviations of observed cost
    pub margin_sigmas: f64,
    /// Extra margin (fraction of expected) while a key has fewer than `warmup_samples`
    pub cold_start_margin_ratio: f64,
    pub warmup_samples: u64,
    pub retention_secs: u64,
    pub max_samples: usize,
    pub base_costs: BaseCosts,
    pub venue_base_costs: Vec<VenueBaseCost>,
    pub store_path: Option<String>,
}

impl Default for CostModelConfig {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            margin_sigmas: 2.0,
            cold_start_margin_ratio: 0.25,
            warmup_samples: 5,
            retention_secs: 24 * 60 * 60,
            max_samples: 10_000,
            base_costs: BaseCosts::default(),
            venue_base_costs: Vec::new(),
            store_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CostStats {
    expected: f64,
    variance: f64,
    sample_count: u64,
    last_updated: DateTime<Utc>,
}

/// Read-only summary for the dashboard snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CostModelSummary {
    pub tracked_keys: usize,
    pub retained_samples: usize,
    pub failed_samples: usize,
    pub mean_abs_prediction_error: f64,
    pub entries: Vec<CostRecord>,
}

/// Single writer of historical cost statistics. Reads are concurrent.
pub struct CostModel {
    config: CostModelConfig,
    stats: RwLock<HashMap<(VenueId, OperationType), CostStats>>,
    samples: RwLock<VecDeque<CostSample>>,
}

impl CostModel {
    pub fn new(config: CostModelConfig) -> Self {
        Self {
            config,
            stats: RwLock::new(HashMap::new()),
            samples: RwLock::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &CostModelConfig {
        &self.config
    }

    fn seed(&self, venue: &str, operation: OperationType) -> f64 {
        self.config
            .venue_base_costs
            .iter()
            .find(|o| o.venue == venue && o.operation == operation)
            .map(|o| o.cost)
            .unwrap_or_else(|| self.config.base_costs.for_operation(operation))
    }

    fn margin(&self, expected: f64, variance: f64, sample_count: u64) -> f64 {
        let variance_margin = self.config.margin_sigmas * variance.max(0.0).sqrt();
        let cold_start = if sample_count < self.config.warmup_samples && self.config.warmup_samples > 0 {
            let remaining = (self.config.warmup_samples - sample_count) as f64 / self.config.warmup_samples as f64;
            self.config.cold_start_margin_ratio * expected.abs() * remaining
        } else {
            0.0
        };
        variance_margin + cold_start
    }

    /// Expected cost for one operation on one venue
    pub fn estimate(&self, venue: &str, operation: OperationType) -> CostEstimate {
        let stats = self.stats.read();
        match stats.get(&(venue.to_string(), operation)) {
            Some(s) => CostEstimate {
                expected: s.expected,
                safety_margin: self.margin(s.expected, s.variance, s.sample_count),
            },
            None => {
                let expected = self.seed(venue, operation);
                CostEstimate {
                    expected,
                    safety_margin: self.margin(expected, 0.0, 0),
                }
            }
        }
    }

    /// Fold one observation into the statistics
    pub fn record(&self, sample: CostSample) {
        if !sample.actual.is_finite() || sample.actual < 0.0 {
            warn!(venue = %sample.venue, operation = sample.operation.as_str(), actual = sample.actual, "ignoring invalid cost sample");
            return;
        }

        let alpha = self.config.alpha.clamp(0.0, 1.0);
        {
            let mut stats = self.stats.write();
            let key = (sample.venue.clone(), sample.operation);
            let seed = self.seed(&sample.venue, sample.operation);
            let entry = stats.entry(key).or_insert_with(|| CostStats {
                expected: seed,
                variance: 0.0,
                sample_count: 0,
                last_updated: sample.observed_at,
            });

            let delta = sample.actual - entry.expected;
            entry.expected += alpha * delta;
            entry.variance = (1.0 - alpha) * (entry.variance + alpha * delta * delta);
            entry.sample_count += 1;
            entry.last_updated = sample.observed_at;

            debug!(
                venue = %sample.venue,
                operation = sample.operation.as_str(),
                predicted = sample.predicted,
                actual = sample.actual,
                expected = entry.expected,
                success = sample.success,
                "cost model updated"
            );
        }

        let mut samples = self.samples.write();
        samples.push_back(sample);
        while samples.len() > self.config.max_samples {
            samples.pop_front();
        }
        drop(samples);
        self.prune(Utc::now());
    }

    /// Drop samples older than the retention window
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - ChronoDuration::seconds(self.config.retention_secs as i64);
        let mut samples = self.samples.write();
        let before = samples.len();
        samples.retain(|s| s.observed_at >= cutoff);
        before - samples.len()
    }

    pub fn retained_samples(&self) -> Vec<CostSample> {
        self.samples.read().iter().cloned().collect()
    }

    /// Keyed record set, sorted for stable output
    pub fn records(&self) -> Vec<CostRecord> {
        let stats = self.stats.read();
        let mut records: Vec<CostRecord> = stats
            .iter()
            .map(|((venue, operation), s)| CostRecord {
                venue: venue.clone(),
                operation_type: *operation,
                expected_cost: s.expected,
                variance: s.variance,
                sample_count: s.sample_count,
                last_updated: s.last_updated,
            })
            .collect();
        records.sort_by(|a, b| (&a.venue, a.operation_type).cmp(&(&b.venue, b.operation_type)));
        records
    }

    /// Replace statistics with a persisted record set
    pub fn restore(&self, records: Vec<CostRecord>) {
        let mut stats = self.stats.write();
        stats.clear();
        for r in records {
            stats.insert(
                (r.venue, r.operation_type),
                CostStats {
                    expected: r.expected_cost,
                    variance: r.variance,
                    sample_count: r.sample_count,
                    last_updated: r.last_updated,
                },
            );
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AppError> {
        store::save_records(path, &self.records())
    }

    pub fn load(config: CostModelConfig, path: impl AsRef<Path>) -> Result<Self, AppError> {
        let model = Self::new(config);
        model.restore(store::load_records(path)?);
        Ok(model)
    }

    pub fn summary(&self) -> CostModelSummary {
        let samples = self.samples.read();
        let failed_samples = samples.iter().filter(|s| !s.success).count();
        let mean_abs_prediction_error = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|s| (s.actual - s.predicted).abs()).sum::<f64>() / samples.len() as f64
        };
        let entries = self.records();
        CostModelSummary {
            tracked_keys: entries.len(),
            retained_samples: samples.len(),
            failed_samples,
            mean_abs_prediction_error,
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_seed(swap: f64) -> CostModel {
        CostModel::new(CostModelConfig {
            base_costs: BaseCosts {
                swap,
                ..BaseCosts::default()
            },
            ..CostModelConfig::default()
        })
    }

    #[test]
    fn test_seeded_estimate_before_samples() {
        let model = model_with_seed(0.01);
        let estimate = model.estimate("uni-weth-usdc-5", OperationType::Swap);
        assert_eq!(estimate.expected, 0.01);
        // cold start margin: 25% of expected with zero samples
        assert!((estimate.safety_margin - 0.0025).abs() < 1e-12);
    }

    #[test]
    fn test_venue_override_takes_precedence() {
        let model = CostModel::new(CostModelConfig {
            base_costs: BaseCosts {
                swap: 0.01,
                ..BaseCosts::default()
            },
            venue_base_costs: vec![VenueBaseCost {
                venue: "curve-3pool".to_string(),
                operation: OperationType::Swap,
                cost: 0.02,
            }],
            ..CostModelConfig::default()
        });
        assert_eq!(model.estimate("curve-3pool", OperationType::Swap).expected, 0.02);
        assert_eq!(model.estimate("other", OperationType::Swap).expected, 0.01);
    }

    #[test]
    fn test_estimate_moves_toward_actuals() {
        let model = model_with_seed(0.01);
        for _ in 0..20 {
            model.record(CostSample::new("v", OperationType::Swap, 0.01, 0.02, true));
        }
        let estimate = model.estimate("v", OperationType::Swap);
        assert!(estimate.expected > 0.019 && estimate.expected <= 0.02);
    }

    #[test]
    fn test_high_variance_widens_margin() {
        let stable = model_with_seed(0.01);
        let noisy = model_with_seed(0.01);
        for i in 0..30 {
            stable.record(CostSample::new("v", OperationType::Swap, 0.01, 0.01, true));
            let actual = if i % 2 == 0 { 0.001 } else { 0.03 };
            noisy.record(CostSample::new("v", OperationType::Swap, 0.01, actual, i % 3 != 0));
        }
        let stable_margin = stable.estimate("v", OperationType::Swap).safety_margin;
        let noisy_margin = noisy.estimate("v", OperationType::Swap).safety_margin;
        assert!(noisy_margin > stable_margin * 10.0);
    }

    #[test]
    fn test_estimate_is_idempotent_without_new_samples() {
        let model = model_with_seed(0.005);
        model.record(CostSample::new("v", OperationType::Borrow, 0.005, 0.007, true));
        let first = model.estimate("v", OperationType::Borrow);
        let second = model.estimate("v", OperationType::Borrow);
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_samples_are_ignored() {
        let model = model_with_seed(0.01);
        model.record(CostSample::new("v", OperationType::Swap, 0.01, f64::NAN, true));
        model.record(CostSample::new("v", OperationType::Swap, 0.01, -1.0, true));
        assert!(model.records().is_empty());
        assert!(model.retained_samples().is_empty());
    }

    #[test]
    fn test_prune_drops_old_samples() {
        let model = CostModel::new(CostModelConfig {
            retention_secs: 60,
            ..CostModelConfig::default()
        });
        let mut old = CostSample::new("v", OperationType::Swap, 0.0, 0.01, true);
        old.observed_at = Utc::now() - ChronoDuration::seconds(120);
        model.record(old);
        model.record(CostSample::new("v", OperationType::Swap, 0.0, 0.01, true));
        assert_eq!(model.retained_samples().len(), 1);
        // statistics survive sample retention
        assert_eq!(model.records()[0].sample_count, 2);
    }
}
