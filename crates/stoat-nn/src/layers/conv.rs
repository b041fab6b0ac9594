// Conv2d — NCHW convolution with stride and valid/same padding.
//
// The kernels are plain reference loops; tuning them is explicitly out
// of scope for the engine. weight: [filters, channels, kh, kw],
// bias: [filters].

use stoat_core::{init, Device, Error, Result, Shape, Tensor};

/// Zero-padding policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// No padding; the window stays fully inside the input.
    Valid,
    /// Output spatial size = ceil(input / stride).
    Same,
}

/// Hyperparameters of a 2-D convolution.
#[derive(Debug, Clone)]
pub struct Conv2dCfg {
    pub filters: usize,
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub padding: Padding,
}

impl Conv2dCfg {
    /// Output spatial dims plus top/left padding for the given input dims.
    fn geometry(&self, h: usize, w: usize) -> (usize, usize, usize, usize) {
        let (kh, kw) = self.kernel;
        let (sh, sw) = self.stride;
        match self.padding {
            Padding::Valid => ((h - kh) / sh + 1, (w - kw) / sw + 1, 0, 0),
            Padding::Same => {
                let oh = h.div_ceil(sh);
                let ow = w.div_ceil(sw);
                let ph = ((oh - 1) * sh + kh).saturating_sub(h);
                let pw = ((ow - 1) * sw + kw).saturating_sub(w);
                (oh, ow, ph / 2, pw / 2)
            }
        }
    }
}

pub(crate) fn infer_shape(cfg: &Conv2dCfg, parent: &Shape) -> Result<Shape> {
    if parent.rank() != 4 {
        return Err(Error::RankMismatch {
            op: "conv2d",
            expected: 4,
            got: parent.rank(),
        });
    }
    let d = parent.dims();
    let (h, w) = (d[2], d[3]);
    let (kh, kw) = cfg.kernel;
    if cfg.padding == Padding::Valid && (kh > h || kw > w) {
        return Err(Error::msg(format!(
            "conv2d: kernel {kh}x{kw} larger than input {h}x{w}"
        )));
    }
    let (oh, ow, _, _) = cfg.geometry(h, w);
    Ok(Shape::new(vec![d[0], cfg.filters, oh, ow]))
}

pub(crate) fn init_params(cfg: &Conv2dCfg, parent: &Shape, device: Device) -> Vec<Tensor> {
    let c = parent.dims()[1];
    let (kh, kw) = cfg.kernel;
    let fan_in = c * kh * kw;
    let fan_out = cfg.filters * kh * kw;
    vec![
        init::glorot_uniform(vec![cfg.filters, c, kh, kw], device, fan_in, fan_out),
        Tensor::zeros(vec![cfg.filters], device),
    ]
}

pub(crate) fn forward(
    cfg: &Conv2dCfg,
    x: &Tensor,
    w: &Tensor,
    bias: &Tensor,
    out: &mut Tensor,
) -> Result<()> {
    let [b, c, h, wd] = in_dims(x)?;
    let (kh, kw) = cfg.kernel;
    let (sh, sw) = cfg.stride;
    let (oh, ow, pt, pl) = cfg.geometry(h, wd);
    let xd = x.data();
    let wdta = w.data();
    let bd = bias.data();
    let od = out.data_mut();

    for bi in 0..b {
        for fi in 0..cfg.filters {
            for oi in 0..oh {
                for oj in 0..ow {
                    let mut sum = bd[fi];
                    for ci in 0..c {
                        for ki in 0..kh {
                            let ii = (oi * sh + ki) as isize - pt as isize;
                            if ii < 0 || ii as usize >= h {
                                continue;
                            }
                            for kj in 0..kw {
                                let jj = (oj * sw + kj) as isize - pl as isize;
                                if jj < 0 || jj as usize >= wd {
                                    continue;
                                }
                                let xi = ((bi * c + ci) * h + ii as usize) * wd + jj as usize;
                                let wi = ((fi * c + ci) * kh + ki) * kw + kj;
                                sum += xd[xi] * wdta[wi];
                            }
                        }
                    }
                    od[((bi * cfg.filters + fi) * oh + oi) * ow + oj] = sum;
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn backward(
    cfg: &Conv2dCfg,
    x: &Tensor,
    delta: &Tensor,
    w: &Tensor,
    gw: &mut Tensor,
    gb: &mut Tensor,
    parent_delta: &mut Tensor,
) -> Result<()> {
    let [b, c, h, wd] = in_dims(x)?;
    let (kh, kw) = cfg.kernel;
    let (sh, sw) = cfg.stride;
    let (oh, ow, pt, pl) = cfg.geometry(h, wd);
    let xd = x.data();
    let dd = delta.data();
    let wdta = w.data();

    for bi in 0..b {
        for fi in 0..cfg.filters {
            for oi in 0..oh {
                for oj in 0..ow {
                    let d = dd[((bi * cfg.filters + fi) * oh + oi) * ow + oj];
                    if d == 0.0 {
                        continue;
                    }
                    gb.data_mut()[fi] += d;
                    for ci in 0..c {
                        for ki in 0..kh {
                            let ii = (oi * sh + ki) as isize - pt as isize;
                            if ii < 0 || ii as usize >= h {
                                continue;
                            }
                            for kj in 0..kw {
                                let jj = (oj * sw + kj) as isize - pl as isize;
                                if jj < 0 || jj as usize >= wd {
                                    continue;
                                }
                                let xi = ((bi * c + ci) * h + ii as usize) * wd + jj as usize;
                                let wi = ((fi * c + ci) * kh + ki) * kw + kj;
                                gw.data_mut()[wi] += xd[xi] * d;
                                parent_delta.data_mut()[xi] += wdta[wi] * d;
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn in_dims(x: &Tensor) -> Result<[usize; 4]> {
    if x.rank() != 4 {
        return Err(Error::RankMismatch {
            op: "conv2d",
            expected: 4,
            got: x.rank(),
        });
    }
    let d = x.dims();
    Ok([d[0], d[1], d[2], d[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(kernel: usize, stride: usize, padding: Padding) -> Conv2dCfg {
        Conv2dCfg {
            filters: 1,
            kernel: (kernel, kernel),
            stride: (stride, stride),
            padding,
        }
    }

    #[test]
    fn valid_shape() {
        let s = infer_shape(&cfg(3, 1, Padding::Valid), &Shape::new(vec![2, 1, 5, 5])).unwrap();
        assert_eq!(s.dims(), &[2, 1, 3, 3]);
    }

    #[test]
    fn same_shape_with_stride() {
        let s = infer_shape(&cfg(3, 2, Padding::Same), &Shape::new(vec![1, 1, 5, 5])).unwrap();
        assert_eq!(s.dims(), &[1, 1, 3, 3]);
    }

    #[test]
    fn box_filter_counts_window() {
        // All-ones 3x3 kernel over an all-ones 4x4 input, valid: every
        // output equals 9.
        let c = cfg(3, 1, Padding::Valid);
        let x = Tensor::ones(vec![1, 1, 4, 4], Device::Cpu);
        let w = Tensor::ones(vec![1, 1, 3, 3], Device::Cpu);
        let b = Tensor::zeros(vec![1], Device::Cpu);
        let mut out = Tensor::zeros(vec![1, 1, 2, 2], Device::Cpu);
        forward(&c, &x, &w, &b, &mut out).unwrap();
        assert!(out.data().iter().all(|&v| (v - 9.0).abs() < 1e-6));
    }

    #[test]
    fn backward_routes_gradient_through_weights() {
        let c = cfg(2, 1, Padding::Valid);
        let x = Tensor::ones(vec![1, 1, 3, 3], Device::Cpu);
        let w = Tensor::full(vec![1, 1, 2, 2], Device::Cpu, 0.5);
        let delta = Tensor::ones(vec![1, 1, 2, 2], Device::Cpu);
        let mut gw = Tensor::zeros(vec![1, 1, 2, 2], Device::Cpu);
        let mut gb = Tensor::zeros(vec![1], Device::Cpu);
        let mut pd = Tensor::zeros(vec![1, 1, 3, 3], Device::Cpu);
        backward(&c, &x, &delta, &w, &mut gw, &mut gb, &mut pd).unwrap();
        // Each weight sees all 4 output positions with input 1.
        assert!(gw.data().iter().all(|&v| (v - 4.0).abs() < 1e-6));
        assert!((gb.data()[0] - 4.0).abs() < 1e-6);
        // Center input cell is covered by all 4 windows: 4 * 0.5.
        assert!((pd.data()[4] - 2.0).abs() < 1e-6);
    }
}
