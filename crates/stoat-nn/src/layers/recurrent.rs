// Recurrent cells — RNN (Elman, tanh) and LSTM.
//
// A cell layer computes ONE timestep; the unrolled network wires per-step
// copies together, passing the previous step's copy as an extra parent.
// Parent convention: parents[0] is the step input x_t, parents[1] (when
// present) is the previous step's cell layer, whose output is h_{t-1} and,
// for LSTM, whose cache holds c_{t-1} and receives the cell-state delta.
//
// LSTM gates are packed column-wise as [i | f | g | o] (input, forget,
// candidate, output), so each step is two matmuls regardless of gate
// count. All caches are descriptor-held buffers resized with the batch.

use stoat_core::{init, Device, Error, Result, Shape, Tensor};

/// Hyperparameters of a vanilla RNN cell: h' = tanh(x·Wx + h·Wh + b).
#[derive(Debug, Clone)]
pub struct RnnCfg {
    pub units: usize,
}

/// Hyperparameters plus step caches of an LSTM cell.
#[derive(Debug, Clone)]
pub struct LstmCfg {
    pub units: usize,
    pub cache: LstmCache,
}

/// Per-step LSTM buffers.
///
/// `delta_c` is the cell-state gradient flowing in from the NEXT step's
/// backward pass; it is zeroed on reset and accumulated, mirroring the
/// delta-accumulation rule for hidden state.
#[derive(Debug, Clone)]
pub struct LstmCache {
    /// Activated gates, packed [i | f | g | o], shape [batch, 4*units].
    pub gates: Tensor,
    /// Cell state c_t, shape [batch, units].
    pub c: Tensor,
    /// tanh(c_t), shape [batch, units].
    pub tanh_c: Tensor,
    /// Incoming cell-state gradient, shape [batch, units].
    pub delta_c: Tensor,
}

impl LstmCfg {
    pub fn new(units: usize, batch: usize, device: Device) -> Self {
        LstmCfg {
            units,
            cache: LstmCache {
                gates: Tensor::zeros(vec![batch, 4 * units], device),
                c: Tensor::zeros(vec![batch, units], device),
                tanh_c: Tensor::zeros(vec![batch, units], device),
                delta_c: Tensor::zeros(vec![batch, units], device),
            },
        }
    }
}

fn require_2d(op: &'static str, s: &Shape) -> Result<()> {
    if s.rank() != 2 {
        return Err(Error::RankMismatch {
            op,
            expected: 2,
            got: s.rank(),
        });
    }
    Ok(())
}

pub(crate) fn rnn_infer_shape(cfg: &RnnCfg, parent: &Shape) -> Result<Shape> {
    require_2d("rnn", parent)?;
    Ok(Shape::new(vec![parent.batch(), cfg.units]))
}

pub(crate) fn lstm_infer_shape(cfg: &LstmCfg, parent: &Shape) -> Result<Shape> {
    require_2d("lstm", parent)?;
    Ok(Shape::new(vec![parent.batch(), cfg.units]))
}

pub(crate) fn rnn_init_params(cfg: &RnnCfg, parent: &Shape, device: Device) -> Vec<Tensor> {
    let input = parent.dims()[1];
    vec![
        init::kaiming_uniform(vec![input, cfg.units], device, cfg.units),
        init::kaiming_uniform(vec![cfg.units, cfg.units], device, cfg.units),
        Tensor::zeros(vec![cfg.units], device),
    ]
}

pub(crate) fn lstm_init_params(cfg: &LstmCfg, parent: &Shape, device: Device) -> Vec<Tensor> {
    let input = parent.dims()[1];
    vec![
        init::kaiming_uniform(vec![input, 4 * cfg.units], device, cfg.units),
        init::kaiming_uniform(vec![cfg.units, 4 * cfg.units], device, cfg.units),
        Tensor::zeros(vec![4 * cfg.units], device),
    ]
}

// RNN

/// h' = tanh(x·Wx + h_prev·Wh + b); a missing h_prev is all-zero state.
pub(crate) fn rnn_forward(
    x: &Tensor,
    h_prev: Option<&Tensor>,
    wx: &Tensor,
    wh: &Tensor,
    b: &Tensor,
    out: &mut Tensor,
) -> Result<()> {
    Tensor::matmul_into(x, false, wx, false, out, false)?;
    out.add_bias_rows(b)?;
    if let Some(h) = h_prev {
        Tensor::matmul_into(h, false, wh, false, out, true)?;
    }
    out.map_inplace(f32::tanh);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn rnn_backward(
    x: &Tensor,
    h_prev: Option<&Tensor>,
    out: &Tensor,
    delta: &Tensor,
    wx: &Tensor,
    wh: &Tensor,
    gwx: &mut Tensor,
    gwh: &mut Tensor,
    gb: &mut Tensor,
    parent_delta: &mut Tensor,
    prev_delta: Option<&mut Tensor>,
) -> Result<()> {
    // dpre = δ ⊙ (1 - h'²)
    let mut dpre = Tensor::zeros(delta.dims().to_vec(), delta.device());
    Tensor::zip_into(delta, out, &mut dpre, |d, o| d * (1.0 - o * o))?;

    Tensor::matmul_into(x, true, &dpre, false, gwx, true)?;
    Tensor::sum_rows_into(&dpre, gb, true)?;
    Tensor::matmul_into(&dpre, false, wx, true, parent_delta, true)?;

    if let Some(h) = h_prev {
        Tensor::matmul_into(h, true, &dpre, false, gwh, true)?;
        if let Some(pd) = prev_delta {
            Tensor::matmul_into(&dpre, false, wh, true, pd, true)?;
        }
    }
    Ok(())
}

// LSTM

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// One LSTM step. `prev` carries (h_{t-1}, c_{t-1}) from the previous
/// step's cell layer; both default to zero state.
pub(crate) fn lstm_forward(
    cfg: &mut LstmCfg,
    x: &Tensor,
    prev: Option<(&Tensor, &Tensor)>,
    wx: &Tensor,
    wh: &Tensor,
    b: &Tensor,
    out: &mut Tensor,
) -> Result<()> {
    let u = cfg.units;
    let cache = &mut cfg.cache;

    // Pre-activations of all four gates in one buffer.
    Tensor::matmul_into(x, false, wx, false, &mut cache.gates, false)?;
    cache.gates.add_bias_rows(b)?;
    if let Some((h, _)) = prev {
        Tensor::matmul_into(h, false, wh, false, &mut cache.gates, true)?;
    }

    let batch = x.batch();
    let gd = cache.gates.data_mut();
    for row in gd.chunks_mut(4 * u) {
        for v in &mut row[..2 * u] {
            *v = sigmoid(*v); // i, f
        }
        for v in &mut row[2 * u..3 * u] {
            *v = v.tanh(); // g
        }
        for v in &mut row[3 * u..] {
            *v = sigmoid(*v); // o
        }
    }

    let gd = cache.gates.data();
    let cd = cache.c.data_mut();
    let td = cache.tanh_c.data_mut();
    let od = out.data_mut();
    for r in 0..batch {
        let row = &gd[r * 4 * u..(r + 1) * 4 * u];
        for j in 0..u {
            let (i, f, g, o) = (row[j], row[u + j], row[2 * u + j], row[3 * u + j]);
            let c_prev = match prev {
                Some((_, c)) => c.data()[r * u + j],
                None => 0.0,
            };
            let c = f * c_prev + i * g;
            cd[r * u + j] = c;
            td[r * u + j] = c.tanh();
            od[r * u + j] = o * td[r * u + j];
        }
    }
    Ok(())
}

/// LSTM backward through one step.
///
/// `delta` is dh_t from downstream; `cfg.cache.delta_c` already holds the
/// cell-state gradient contributed by step t+1. `prev_deltas`, when the
/// step has a predecessor, receives (dh_{t-1}, dc_{t-1}) accumulation
/// targets: the predecessor's `delta` tensor and its cache's `delta_c`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn lstm_backward(
    cfg: &LstmCfg,
    x: &Tensor,
    prev: Option<(&Tensor, &Tensor)>,
    delta: &Tensor,
    wx: &Tensor,
    wh: &Tensor,
    gwx: &mut Tensor,
    gwh: &mut Tensor,
    gb: &mut Tensor,
    parent_delta: &mut Tensor,
    prev_deltas: Option<(&mut Tensor, &mut Tensor)>,
) -> Result<()> {
    let u = cfg.units;
    let cache = &cfg.cache;
    let batch = x.batch();

    // Pre-activation gate gradients, packed like the gates.
    let mut da = Tensor::zeros(vec![batch, 4 * u], x.device());
    // dc_t for each row/unit, kept for the c_{t-1} chain below.
    let mut dc_all = Tensor::zeros(vec![batch, u], x.device());

    {
        let gd = cache.gates.data();
        let td = cache.tanh_c.data();
        let dcd_in = cache.delta_c.data();
        let dd = delta.data();
        let dad = da.data_mut();
        let dcout = dc_all.data_mut();
        for r in 0..batch {
            let row = &gd[r * 4 * u..(r + 1) * 4 * u];
            for j in 0..u {
                let (i, f, g, o) = (row[j], row[u + j], row[2 * u + j], row[3 * u + j]);
                let tc = td[r * u + j];
                let dh = dd[r * u + j];
                let dc = dcd_in[r * u + j] + dh * o * (1.0 - tc * tc);
                dcout[r * u + j] = dc;

                let c_prev = match prev {
                    Some((_, c)) => c.data()[r * u + j],
                    None => 0.0,
                };
                let di = dc * g;
                let df = dc * c_prev;
                let dg = dc * i;
                let do_ = dh * tc;

                let out_row = &mut dad[r * 4 * u..(r + 1) * 4 * u];
                out_row[j] = di * i * (1.0 - i);
                out_row[u + j] = df * f * (1.0 - f);
                out_row[2 * u + j] = dg * (1.0 - g * g);
                out_row[3 * u + j] = do_ * o * (1.0 - o);
            }
        }
    }

    Tensor::matmul_into(x, true, &da, false, gwx, true)?;
    Tensor::sum_rows_into(&da, gb, true)?;
    Tensor::matmul_into(&da, false, wx, true, parent_delta, true)?;

    if let Some((h_prev, _)) = prev {
        Tensor::matmul_into(h_prev, true, &da, false, gwh, true)?;
    }
    if let Some((prev_dh, prev_dc)) = prev_deltas {
        Tensor::matmul_into(&da, false, wh, true, prev_dh, true)?;
        // dc_{t-1} += dc_t ⊙ f
        let gd = cache.gates.data();
        let dcd = dc_all.data();
        let pd = prev_dc.data_mut();
        for r in 0..batch {
            for j in 0..u {
                pd[r * u + j] += dcd[r * u + j] * gd[r * 4 * u + u + j];
            }
        }
    }
    Ok(())
}
