// Volatility Regime Classifier
// Derives a regime label from the dispersion of the imbalance history.
// Stateless per call: the label is recomputed from the full history every
// time, with no hysteresis or smoothing.

use std::collections::VecDeque;

use crate::core::config::RegimeThresholds;
use crate::core::types::Regime;

pub struct RegimeClassifier {
    thresholds: RegimeThresholds,
    min_samples: usize,
}

impl RegimeClassifier {
    pub fn new(thresholds: RegimeThresholds, min_samples: usize) -> Self {
        Self {
            thresholds,
            min_samples,
        }
    }

    /// Classify the current imbalance history. Stays in `Calculating` until
    /// strictly more than `min_samples` samples have accumulated.
    pub fn classify(&self, history: &VecDeque<f64>) -> Regime {
        if history.len() <= self.min_samples {
            return Regime::Calculating;
        }

        let volatility = match Self::volatility(history) {
            Some(v) => v,
            None => return Regime::Calculating,
        };

        if volatility < self.thresholds.low {
            Regime::Stagnant
        } else if volatility > self.thresholds.high {
            Regime::Volatile
        } else {
            Regime::Stable
        }
    }

    /// Population standard deviation over the full history
    pub fn volatility(history: &VecDeque<f64>) -> Option<f64> {
        if history.is_empty() {
            return None;
        }
        let n = history.len() as f64;
        let mean = history.iter().sum::<f64>() / n;
        let variance = history.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        Some(variance.sqrt())
    }
}
