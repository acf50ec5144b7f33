//! Running loss / accuracy accounting for one pass over a split

use burn::tensor::{backend::Backend, ElementConversion, Int, Tensor};
use serde::{Deserialize, Serialize};

/// Rows of `output` whose argmax equals the target label
pub fn count_correct<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [rows, _] = output.dims();
    let predictions = output.argmax(1).reshape([rows]);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

/// Accumulates per-batch results over one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochMetrics {
    /// Sum of per-batch mean losses
    pub loss: f64,
    /// Number of batches seen
    pub batches: usize,
    /// Correct predictions
    pub correct: usize,
    /// Rows seen, counting a trailing partial batch at its real size
    pub total: usize,
}

impl EpochMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one batch: its mean loss, correct count and row count
    pub fn update(&mut self, batch_loss: f64, correct: usize, rows: usize) {
        self.loss += batch_loss;
        self.batches += 1;
        self.correct += correct;
        self.total += rows;
    }

    /// Accuracy in percent, `100 * correct / total`
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.correct as f64 / self.total as f64
    }

    /// Mean of the per-batch losses
    pub fn average_loss(&self) -> f64 {
        if self.batches == 0 {
            return 0.0;
        }
        self.loss / self.batches as f64
    }

    pub fn summary(&self, epoch: usize) -> EpochSummary {
        EpochSummary {
            epoch,
            loss: self.average_loss(),
            accuracy: self.accuracy(),
            samples: self.total,
        }
    }
}

/// Result of one pass, as reported
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}
