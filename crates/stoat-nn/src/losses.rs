// Loss functions — stateless (value, delta) pairs bound per output layer.
//
// `value` returns the batch-summed loss; the net accumulates these into
// its fiterr counters and divides by the number of inferenced samples
// when reporting, so replicas can sum their contributions directly.
//
// `delta` writes the gradient contribution into the output layer's delta
// (accumulating — the delta was zeroed at reset and a shared output
// layer may receive several contributions). Deltas are scaled by
// 1/batch so optimizer steps are invariant to batch size.
//
// Cross-entropy writes −t/(o+ε): composed with the softmax layer's
// row-Jacobian backward this yields the usual o − t at the logits.

use stoat_core::{Error, Result, Tensor};

const EPS: f32 = 1e-8;

/// The supported loss functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    MeanSquaredError,
    CategoricalCrossEntropy,
    BinaryCrossEntropy,
}

impl Loss {
    pub fn name(&self) -> &'static str {
        match self {
            Loss::MeanSquaredError => "mean_squared_error",
            Loss::CategoricalCrossEntropy => "categorical_cross_entropy",
            Loss::BinaryCrossEntropy => "binary_cross_entropy",
        }
    }

    /// Batch-summed loss of (output, target).
    pub fn value(&self, output: &Tensor, target: &Tensor) -> Result<f64> {
        check_pair(output, target)?;
        let v = match self {
            Loss::MeanSquaredError => output
                .data()
                .iter()
                .zip(target.data())
                .map(|(&o, &t)| {
                    let d = (o - t) as f64;
                    d * d
                })
                .sum(),
            Loss::CategoricalCrossEntropy => output
                .data()
                .iter()
                .zip(target.data())
                .map(|(&o, &t)| -(t as f64) * ((o + EPS) as f64).ln())
                .sum(),
            Loss::BinaryCrossEntropy => output
                .data()
                .iter()
                .zip(target.data())
                .map(|(&o, &t)| {
                    -((t as f64) * ((o + EPS) as f64).ln()
                        + ((1.0 - t) as f64) * ((1.0 - o + EPS) as f64).ln())
                })
                .sum(),
        };
        Ok(v)
    }

    /// Accumulate the loss gradient w.r.t. `output` into `delta`,
    /// scaled by 1/batch.
    pub fn delta(&self, output: &Tensor, target: &Tensor, delta: &mut Tensor) -> Result<()> {
        check_pair(output, target)?;
        let inv_b = 1.0 / output.batch() as f32;
        let dd = delta.data_mut();
        match self {
            Loss::MeanSquaredError => {
                for ((d, &o), &t) in dd.iter_mut().zip(output.data()).zip(target.data()) {
                    *d += 2.0 * (o - t) * inv_b;
                }
            }
            Loss::CategoricalCrossEntropy => {
                for ((d, &o), &t) in dd.iter_mut().zip(output.data()).zip(target.data()) {
                    *d += -(t / (o + EPS)) * inv_b;
                }
            }
            Loss::BinaryCrossEntropy => {
                for ((d, &o), &t) in dd.iter_mut().zip(output.data()).zip(target.data()) {
                    *d += (o - t) / (o * (1.0 - o) + EPS) * inv_b;
                }
            }
        }
        Ok(())
    }
}

fn check_pair(output: &Tensor, target: &Tensor) -> Result<()> {
    if output.shape() != target.shape() {
        return Err(Error::ShapeMismatch {
            expected: output.shape().clone(),
            got: target.shape().clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stoat_core::Device;

    #[test]
    fn mse_value_and_delta() {
        let o = Tensor::from_vec(vec![1.0, 2.0], vec![1, 2], Device::Cpu).unwrap();
        let t = Tensor::from_vec(vec![0.0, 0.0], vec![1, 2], Device::Cpu).unwrap();
        let loss = Loss::MeanSquaredError;
        assert!((loss.value(&o, &t).unwrap() - 5.0).abs() < 1e-9);

        let mut d = Tensor::zeros(vec![1, 2], Device::Cpu);
        loss.delta(&o, &t, &mut d).unwrap();
        assert_eq!(d.data(), &[2.0, 4.0]);
    }

    #[test]
    fn cross_entropy_prefers_correct_class() {
        let good = Tensor::from_vec(vec![0.9, 0.05, 0.05], vec![1, 3], Device::Cpu).unwrap();
        let bad = Tensor::from_vec(vec![0.05, 0.9, 0.05], vec![1, 3], Device::Cpu).unwrap();
        let t = Tensor::from_vec(vec![1.0, 0.0, 0.0], vec![1, 3], Device::Cpu).unwrap();
        let ce = Loss::CategoricalCrossEntropy;
        assert!(ce.value(&good, &t).unwrap() < ce.value(&bad, &t).unwrap());
    }

    #[test]
    fn delta_accumulates_not_overwrites() {
        let o = Tensor::from_vec(vec![1.0], vec![1, 1], Device::Cpu).unwrap();
        let t = Tensor::from_vec(vec![0.0], vec![1, 1], Device::Cpu).unwrap();
        let mut d = Tensor::full(vec![1, 1], Device::Cpu, 10.0);
        Loss::MeanSquaredError.delta(&o, &t, &mut d).unwrap();
        assert!((d.data()[0] - 12.0).abs() < 1e-6);
    }
}
