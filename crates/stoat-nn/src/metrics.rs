// Metrics — report-only reductions of (output, target) pairs.
//
// Like losses, metrics return batch-summed values; the net divides by
// the inferenced-sample count when reporting. Metrics never contribute
// to gradients.

use stoat_core::{Error, Result, Tensor};

/// The supported reporting metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Count of rows whose argmax matches the target argmax.
    CategoricalAccuracy,
    MeanSquaredError,
    MeanAbsoluteError,
    /// Placeholder for outputs that only need a loss.
    None,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::CategoricalAccuracy => "categorical_accuracy",
            Metric::MeanSquaredError => "mean_squared_error",
            Metric::MeanAbsoluteError => "mean_absolute_error",
            Metric::None => "none",
        }
    }

    /// Batch-summed metric of (output, target).
    pub fn value(&self, output: &Tensor, target: &Tensor) -> Result<f64> {
        if output.shape() != target.shape() {
            return Err(Error::ShapeMismatch {
                expected: output.shape().clone(),
                got: target.shape().clone(),
            });
        }
        match self {
            Metric::CategoricalAccuracy => {
                let pred = output.row_argmax()?;
                let truth = target.row_argmax()?;
                Ok(pred
                    .iter()
                    .zip(&truth)
                    .filter(|(p, t)| p == t)
                    .count() as f64)
            }
            Metric::MeanSquaredError => Ok(output
                .data()
                .iter()
                .zip(target.data())
                .map(|(&o, &t)| {
                    let d = (o - t) as f64;
                    d * d
                })
                .sum()),
            Metric::MeanAbsoluteError => Ok(output
                .data()
                .iter()
                .zip(target.data())
                .map(|(&o, &t)| ((o - t) as f64).abs())
                .sum()),
            Metric::None => Ok(0.0),
        }
    }
}
