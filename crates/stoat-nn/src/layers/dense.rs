// Dense — fully-connected layer: y = xW + b
//
// weight: [in_features, units], bias: [units].
// Backward accumulates into the parameter gradient slots and into the
// parent delta; it never overwrites either.

use stoat_core::{init, Device, Error, Result, Shape, Tensor};

/// Hyperparameters of a dense layer.
#[derive(Debug, Clone)]
pub struct DenseCfg {
    pub units: usize,
}

pub(crate) fn infer_shape(cfg: &DenseCfg, parent: &Shape) -> Result<Shape> {
    if parent.rank() != 2 {
        return Err(Error::RankMismatch {
            op: "dense",
            expected: 2,
            got: parent.rank(),
        });
    }
    Ok(Shape::new(vec![parent.batch(), cfg.units]))
}

pub(crate) fn init_params(cfg: &DenseCfg, parent: &Shape, device: Device) -> Vec<Tensor> {
    let fan_in = parent.dims()[1];
    vec![
        init::glorot_uniform(vec![fan_in, cfg.units], device, fan_in, cfg.units),
        Tensor::zeros(vec![cfg.units], device),
    ]
}

/// y = xW + b
pub(crate) fn forward(x: &Tensor, w: &Tensor, b: &Tensor, out: &mut Tensor) -> Result<()> {
    Tensor::matmul_into(x, false, w, false, out, false)?;
    out.add_bias_rows(b)
}

/// gW += xᵀδ, gb += colsum(δ), parent δ += δWᵀ
pub(crate) fn backward(
    x: &Tensor,
    delta: &Tensor,
    w: &Tensor,
    gw: &mut Tensor,
    gb: &mut Tensor,
    parent_delta: &mut Tensor,
) -> Result<()> {
    Tensor::matmul_into(x, true, delta, false, gw, true)?;
    Tensor::sum_rows_into(delta, gb, true)?;
    Tensor::matmul_into(delta, false, w, true, parent_delta, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_matches_reference() {
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2], Device::Cpu).unwrap();
        let w = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2], Device::Cpu).unwrap();
        let b = Tensor::from_vec(vec![0.5, -0.5], vec![2], Device::Cpu).unwrap();
        let mut out = Tensor::zeros(vec![2, 2], Device::Cpu);
        forward(&x, &w, &b, &mut out).unwrap();
        assert_eq!(out.data(), &[1.5, 1.5, 3.5, 3.5]);
    }

    #[test]
    fn backward_accumulates_everywhere() {
        let x = Tensor::ones(vec![3, 2], Device::Cpu);
        let delta = Tensor::ones(vec![3, 2], Device::Cpu);
        let w = Tensor::ones(vec![2, 2], Device::Cpu);
        let mut gw = Tensor::ones(vec![2, 2], Device::Cpu);
        let mut gb = Tensor::zeros(vec![2], Device::Cpu);
        let mut pd = Tensor::zeros(vec![3, 2], Device::Cpu);
        backward(&x, &delta, &w, &mut gw, &mut gb, &mut pd).unwrap();
        // xᵀδ = 3 everywhere, plus the existing 1
        assert!(gw.data().iter().all(|&v| (v - 4.0).abs() < 1e-6));
        assert!(gb.data().iter().all(|&v| (v - 3.0).abs() < 1e-6));
        // δWᵀ = 2 everywhere
        assert!(pd.data().iter().all(|&v| (v - 2.0).abs() < 1e-6));
    }
}
