// Pool2d — max and average pooling over NCHW inputs.
//
// Max pooling records the winning input index per output cell in a
// descriptor-held buffer; backward scatters the delta straight to those
// indices. The buffer is batch-sized and is reallocated by resize along
// with the output/delta tensors.

use stoat_core::{Error, Result, Shape, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Max,
    Avg,
}

/// Hyperparameters plus the argmax scratch buffer of a pooling layer.
#[derive(Debug, Clone)]
pub struct Pool2dCfg {
    pub kind: PoolKind,
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    /// Winning input index per output cell (max pooling only).
    pub indices: Vec<usize>,
}

impl Pool2dCfg {
    pub fn new(kind: PoolKind, kernel: (usize, usize), stride: (usize, usize)) -> Self {
        Pool2dCfg {
            kind,
            kernel,
            stride,
            indices: Vec::new(),
        }
    }
}

pub(crate) fn infer_shape(cfg: &Pool2dCfg, parent: &Shape) -> Result<Shape> {
    if parent.rank() != 4 {
        return Err(Error::RankMismatch {
            op: "pool2d",
            expected: 4,
            got: parent.rank(),
        });
    }
    let d = parent.dims();
    let (kh, kw) = cfg.kernel;
    let (sh, sw) = cfg.stride;
    if kh > d[2] || kw > d[3] {
        return Err(Error::msg(format!(
            "pool2d: kernel {kh}x{kw} larger than input {}x{}",
            d[2], d[3]
        )));
    }
    let oh = (d[2] - kh) / sh + 1;
    let ow = (d[3] - kw) / sw + 1;
    Ok(Shape::new(vec![d[0], d[1], oh, ow]))
}

pub(crate) fn resize_indices(cfg: &mut Pool2dCfg, out_elems: usize) {
    cfg.indices.clear();
    cfg.indices.resize(out_elems, 0);
}

pub(crate) fn forward(cfg: &mut Pool2dCfg, x: &Tensor, out: &mut Tensor) -> Result<()> {
    let d = x.dims();
    let (b, c, h, w) = (d[0], d[1], d[2], d[3]);
    let (kh, kw) = cfg.kernel;
    let (sh, sw) = cfg.stride;
    let od = out.dims();
    let (oh, ow) = (od[2], od[3]);

    if cfg.indices.len() != out.elem_count() {
        resize_indices(cfg, out.elem_count());
    }

    let xd = x.data();
    let outd = out.data_mut();
    let inv = 1.0 / (kh * kw) as f32;

    for bi in 0..b {
        for ci in 0..c {
            for oi in 0..oh {
                for oj in 0..ow {
                    let oidx = ((bi * c + ci) * oh + oi) * ow + oj;
                    match cfg.kind {
                        PoolKind::Max => {
                            let mut best = f32::NEG_INFINITY;
                            let mut best_idx = 0;
                            for ki in 0..kh {
                                for kj in 0..kw {
                                    let xi = ((bi * c + ci) * h + oi * sh + ki) * w
                                        + oj * sw
                                        + kj;
                                    if xd[xi] > best {
                                        best = xd[xi];
                                        best_idx = xi;
                                    }
                                }
                            }
                            outd[oidx] = best;
                            cfg.indices[oidx] = best_idx;
                        }
                        PoolKind::Avg => {
                            let mut sum = 0.0;
                            for ki in 0..kh {
                                for kj in 0..kw {
                                    sum += xd[((bi * c + ci) * h + oi * sh + ki) * w
                                        + oj * sw
                                        + kj];
                                }
                            }
                            outd[oidx] = sum * inv;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn backward(
    cfg: &Pool2dCfg,
    delta: &Tensor,
    parent_delta: &mut Tensor,
) -> Result<()> {
    match cfg.kind {
        PoolKind::Max => {
            let pd = parent_delta.data_mut();
            for (&d, &idx) in delta.data().iter().zip(&cfg.indices) {
                pd[idx] += d;
            }
        }
        PoolKind::Avg => {
            let d = delta.dims();
            let (b, c, oh, ow) = (d[0], d[1], d[2], d[3]);
            let pdims = parent_delta.dims();
            let (h, w) = (pdims[2], pdims[3]);
            let (kh, kw) = cfg.kernel;
            let (sh, sw) = cfg.stride;
            let inv = 1.0 / (kh * kw) as f32;
            let dd = delta.data();
            let pd = parent_delta.data_mut();
            for bi in 0..b {
                for ci in 0..c {
                    for oi in 0..oh {
                        for oj in 0..ow {
                            let g = dd[((bi * c + ci) * oh + oi) * ow + oj] * inv;
                            for ki in 0..kh {
                                for kj in 0..kw {
                                    pd[((bi * c + ci) * h + oi * sh + ki) * w + oj * sw + kj] +=
                                        g;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stoat_core::Device;

    #[test]
    fn max_pool_picks_window_max_and_routes_delta() {
        let mut cfg = Pool2dCfg::new(PoolKind::Max, (2, 2), (2, 2));
        let x = Tensor::from_vec(
            vec![
                1.0, 2.0, 5.0, 6.0, //
                3.0, 4.0, 7.0, 8.0, //
                0.0, 0.0, 1.0, 0.0, //
                0.0, 9.0, 0.0, 0.0,
            ],
            vec![1, 1, 4, 4],
            Device::Cpu,
        )
        .unwrap();
        let mut out = Tensor::zeros(vec![1, 1, 2, 2], Device::Cpu);
        forward(&mut cfg, &x, &mut out).unwrap();
        assert_eq!(out.data(), &[4.0, 8.0, 9.0, 1.0]);

        let delta = Tensor::ones(vec![1, 1, 2, 2], Device::Cpu);
        let mut pd = Tensor::zeros(vec![1, 1, 4, 4], Device::Cpu);
        backward(&cfg, &delta, &mut pd).unwrap();
        // Only the four argmax positions receive gradient.
        let total: f32 = pd.data().iter().sum();
        assert!((total - 4.0).abs() < 1e-6);
        assert!((pd.data()[5] - 1.0).abs() < 1e-6); // the 4.0
        assert!((pd.data()[13] - 1.0).abs() < 1e-6); // the 9.0
    }

    #[test]
    fn avg_pool_spreads_delta() {
        let mut cfg = Pool2dCfg::new(PoolKind::Avg, (2, 2), (2, 2));
        let x = Tensor::ones(vec![1, 1, 2, 2], Device::Cpu);
        let mut out = Tensor::zeros(vec![1, 1, 1, 1], Device::Cpu);
        forward(&mut cfg, &x, &mut out).unwrap();
        assert!((out.data()[0] - 1.0).abs() < 1e-6);

        let delta = Tensor::ones(vec![1, 1, 1, 1], Device::Cpu);
        let mut pd = Tensor::zeros(vec![1, 1, 2, 2], Device::Cpu);
        backward(&cfg, &delta, &mut pd).unwrap();
        assert!(pd.data().iter().all(|&v| (v - 0.25).abs() < 1e-6));
    }
}
