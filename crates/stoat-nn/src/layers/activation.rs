// Activation layers — element-wise nonlinearities plus row softmax.
//
// Softmax is the one non-element-wise case: it normalizes over the last
// dimension of a 2-D tensor and its backward contracts the full row
// Jacobian, which is what lets a −t/o cross-entropy delta compose into
// the usual o − t gradient at the softmax input.

use stoat_core::{Error, Result, Tensor};

/// The supported activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    ReLU,
    Sigmoid,
    Tanh,
    Softmax,
}

impl Activation {
    pub fn name(&self) -> &'static str {
        match self {
            Activation::ReLU => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Softmax => "softmax",
        }
    }
}

pub(crate) fn forward(act: Activation, x: &Tensor, out: &mut Tensor) -> Result<()> {
    match act {
        Activation::ReLU => Tensor::map_into(x, out, |v| v.max(0.0)),
        Activation::Sigmoid => Tensor::map_into(x, out, |v| 1.0 / (1.0 + (-v).exp())),
        Activation::Tanh => Tensor::map_into(x, out, f32::tanh),
        Activation::Softmax => softmax_rows(x, out),
    }
}

/// parent δ += δ ⊙ f'(x), with the softmax row-Jacobian special case.
pub(crate) fn backward(
    act: Activation,
    x: &Tensor,
    out: &Tensor,
    delta: &Tensor,
    parent_delta: &mut Tensor,
) -> Result<()> {
    match act {
        Activation::ReLU => {
            for ((pd, &d), &xin) in parent_delta
                .data_mut()
                .iter_mut()
                .zip(delta.data())
                .zip(x.data())
            {
                if xin > 0.0 {
                    *pd += d;
                }
            }
            Ok(())
        }
        Activation::Sigmoid => {
            for ((pd, &d), &o) in parent_delta
                .data_mut()
                .iter_mut()
                .zip(delta.data())
                .zip(out.data())
            {
                *pd += d * o * (1.0 - o);
            }
            Ok(())
        }
        Activation::Tanh => {
            for ((pd, &d), &o) in parent_delta
                .data_mut()
                .iter_mut()
                .zip(delta.data())
                .zip(out.data())
            {
                *pd += d * (1.0 - o * o);
            }
            Ok(())
        }
        Activation::Softmax => {
            let n = row_width(out)?;
            for ((pd_row, d_row), o_row) in parent_delta
                .data_mut()
                .chunks_mut(n)
                .zip(delta.data().chunks(n))
                .zip(out.data().chunks(n))
            {
                let dot: f32 = d_row.iter().zip(o_row).map(|(d, o)| d * o).sum();
                for ((pd, &d), &o) in pd_row.iter_mut().zip(d_row).zip(o_row) {
                    *pd += o * (d - dot);
                }
            }
            Ok(())
        }
    }
}

fn softmax_rows(x: &Tensor, out: &mut Tensor) -> Result<()> {
    let n = row_width(x)?;
    for (o_row, x_row) in out.data_mut().chunks_mut(n).zip(x.data().chunks(n)) {
        let max = x_row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0;
        for (o, &v) in o_row.iter_mut().zip(x_row) {
            *o = (v - max).exp();
            sum += *o;
        }
        for o in o_row.iter_mut() {
            *o /= sum;
        }
    }
    Ok(())
}

fn row_width(t: &Tensor) -> Result<usize> {
    if t.rank() != 2 {
        return Err(Error::RankMismatch {
            op: "softmax",
            expected: 2,
            got: t.rank(),
        });
    }
    Ok(t.dims()[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use stoat_core::Device;

    #[test]
    fn relu_clamps_negatives() {
        let x = Tensor::from_vec(vec![-1.0, 2.0], vec![1, 2], Device::Cpu).unwrap();
        let mut out = Tensor::zeros(vec![1, 2], Device::Cpu);
        forward(Activation::ReLU, &x, &mut out).unwrap();
        assert_eq!(out.data(), &[0.0, 2.0]);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0], vec![2, 3], Device::Cpu)
            .unwrap();
        let mut out = Tensor::zeros(vec![2, 3], Device::Cpu);
        forward(Activation::Softmax, &x, &mut out).unwrap();
        for row in out.data().chunks(3) {
            let s: f32 = row.iter().sum();
            assert!((s - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn softmax_backward_composes_to_output_minus_target() {
        // With δ = -t/o (categorical cross-entropy), the softmax backward
        // must produce o - t at the softmax input.
        let x = Tensor::from_vec(vec![0.2, 1.1, -0.3], vec![1, 3], Device::Cpu).unwrap();
        let mut out = Tensor::zeros(vec![1, 3], Device::Cpu);
        forward(Activation::Softmax, &x, &mut out).unwrap();
        let t = [0.0f32, 1.0, 0.0];
        let delta = Tensor::from_vec(
            out.data().iter().zip(&t).map(|(&o, &ti)| -ti / o).collect(),
            vec![1, 3],
            Device::Cpu,
        )
        .unwrap();
        let mut pd = Tensor::zeros(vec![1, 3], Device::Cpu);
        backward(Activation::Softmax, &x, &out, &delta, &mut pd).unwrap();
        for ((&g, &o), &ti) in pd.data().iter().zip(out.data()).zip(&t) {
            assert!((g - (o - ti)).abs() < 1e-5, "got {g}, want {}", o - ti);
        }
    }
}
