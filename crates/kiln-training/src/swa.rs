//! Streaming weight averaging (SWA) across sub-epochs.
//!
//! With scale `s`, every update decays the running sums by `1 - 1/s` and adds
//! the current parameters with weight `1/s`. The accumulated weight follows the
//! same recurrence, so after `k` updates it equals `1 - (1 - 1/s)^k`, and the
//! averaged parameters are `sum / weight`.

use crate::error::{TrainingError, TrainingResult};
use crate::trainer::{ParameterSet, TrainingBackend};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SwaAccumulator {
    scale: f64,
    weight: f64,
    updates: u64,
    sums: BTreeMap<String, Vec<f64>>,
}

impl SwaAccumulator {
    pub fn new(scale: f64) -> TrainingResult<Self> {
        if !scale.is_finite() || scale <= 1.0 {
            return Err(TrainingError::Averaging(format!("scale must be a finite value > 1, got {scale}")));
        }
        Ok(Self { scale, weight: 0.0, updates: 0, sums: BTreeMap::new() })
    }

    #[must_use]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    #[must_use]
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Fold the backend's current parameters into the average.
    pub fn accumulate<B: TrainingBackend + ?Sized>(&mut self, backend: &B) -> TrainingResult<()> {
        let mut params = ParameterSet::new();
        for name in backend.parameter_names() {
            let value = backend.parameter(&name)?;
            params.insert(name, value);
        }
        self.update(&params)
    }

    /// Fold one parameter set into the average.
    ///
    /// Every parameter must keep its length across updates. A parameter seen
    /// for the first time starts from a zero sum.
    pub fn update(&mut self, params: &ParameterSet) -> TrainingResult<()> {
        for (name, value) in params {
            if let Some(sum) = self.sums.get(name) {
                if sum.len() != value.len() {
                    return Err(TrainingError::Averaging(format!(
                        "parameter {name} changed length from {} to {}",
                        sum.len(),
                        value.len()
                    )));
                }
            }
        }

        let new_factor = 1.0 / self.scale;
        let old_factor = 1.0 - new_factor;

        for (name, value) in params {
            let sum = self.sums.entry(name.clone()).or_insert_with(|| vec![0.0; value.len()]);
            for (acc, &v) in sum.iter_mut().zip(value) {
                *acc = *acc * old_factor + f64::from(v) * new_factor;
            }
        }
        self.weight = self.weight * old_factor + new_factor;
        self.updates += 1;

        debug!(weight = self.weight, updates = self.updates, "Accumulated SWA parameters");
        Ok(())
    }

    /// Averaged parameters, or `None` before the first update.
    #[must_use]
    pub fn averaged(&self) -> Option<ParameterSet> {
        if self.weight <= 0.0 {
            return None;
        }
        Some(
            self.sums
                .iter()
                .map(|(name, sum)| {
                    let avg = sum.iter().map(|s| (s / self.weight) as f32).collect();
                    (name.clone(), avg)
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: f32) -> ParameterSet {
        let mut set = ParameterSet::new();
        set.insert("conv1/w".to_string(), vec![value; 4]);
        set.insert("fc/b".to_string(), vec![value * 2.0]);
        set
    }

    #[test]
    fn test_rejects_scale_not_above_one() {
        assert!(SwaAccumulator::new(0.0).is_err());
        assert!(SwaAccumulator::new(0.5).is_err());
        assert!(SwaAccumulator::new(f64::NAN).is_err());
        assert!(SwaAccumulator::new(1.0).is_err());
        assert!(SwaAccumulator::new(1.5).is_ok());
    }

    #[test]
    fn test_weight_stays_below_one() {
        let mut swa = SwaAccumulator::new(1.5).unwrap();
        for _ in 0..20 {
            swa.update(&params(3.0)).unwrap();
            assert!(swa.weight() > 0.0 && swa.weight() < 1.0);
        }
    }

    #[test]
    fn test_no_average_before_first_update() {
        let swa = SwaAccumulator::new(10.0).unwrap();
        assert_eq!(swa.weight(), 0.0);
        assert!(swa.averaged().is_none());
    }

    #[test]
    fn test_single_update_recovers_raw_value() {
        let mut swa = SwaAccumulator::new(10.0).unwrap();
        swa.update(&params(3.5)).unwrap();

        assert!((swa.weight() - 0.1).abs() < 1e-12);
        let avg = swa.averaged().unwrap();
        assert!(avg["conv1/w"].iter().all(|v| (v - 3.5).abs() < 1e-6));
        assert!((avg["fc/b"][0] - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_weight_follows_closed_form() {
        let scale = 4.0;
        let mut swa = SwaAccumulator::new(scale).unwrap();
        for k in 1..=25 {
            swa.update(&params(1.0)).unwrap();
            let expected = 1.0 - (1.0 - 1.0 / scale).powi(k);
            assert!((swa.weight() - expected).abs() < 1e-12, "k={k}");
            assert!(swa.weight() < 1.0);
        }
        assert_eq!(swa.updates(), 25);
    }

    #[test]
    fn test_average_converges_to_constant_input() {
        let mut swa = SwaAccumulator::new(5.0).unwrap();
        swa.update(&params(-10.0)).unwrap();
        for _ in 0..200 {
            swa.update(&params(2.0)).unwrap();
        }
        let avg = swa.averaged().unwrap();
        assert!(avg["conv1/w"].iter().all(|v| (v - 2.0).abs() < 1e-4));
    }

    #[test]
    fn test_recent_values_weigh_more() {
        let mut swa = SwaAccumulator::new(2.0).unwrap();
        swa.update(&params(0.0)).unwrap();
        swa.update(&params(1.0)).unwrap();
        // sums: 0.5 * 0 * 0.5 + 1 * 0.5 = 0.5; weight 0.75.
        let avg = swa.averaged().unwrap();
        assert!((avg["conv1/w"][0] - 0.5 / 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_length_change_is_rejected_without_partial_update() {
        let mut swa = SwaAccumulator::new(3.0).unwrap();
        swa.update(&params(1.0)).unwrap();

        let mut bad = params(2.0);
        bad.insert("conv1/w".to_string(), vec![0.0; 5]);
        assert!(matches!(swa.update(&bad), Err(TrainingError::Averaging(_))));
        assert_eq!(swa.updates(), 1);
        assert!((swa.averaged().unwrap()["fc/b"][0] - 2.0).abs() < 1e-6);
    }
}
