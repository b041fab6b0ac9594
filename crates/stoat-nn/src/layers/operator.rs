// Operator layers — element-wise unary/binary math and axis reductions.
//
// Binary operators require identical parent shapes (no broadcasting in
// the graph; merge layers handle multi-input combination). Reductions
// keep the reduced axis with size 1 so batch resizing stays uniform.

use stoat_core::{Error, Result, Shape, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    // unary
    Abs,
    Exp,
    Log,
    // binary
    Add,
    Sub,
    Mult,
    Div,
}

impl OperatorKind {
    pub fn arity(&self) -> usize {
        match self {
            OperatorKind::Abs | OperatorKind::Exp | OperatorKind::Log => 1,
            _ => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Abs => "abs",
            OperatorKind::Exp => "exp",
            OperatorKind::Log => "log",
            OperatorKind::Add => "add",
            OperatorKind::Sub => "sub",
            OperatorKind::Mult => "mult",
            OperatorKind::Div => "div",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    Mean,
}

/// Axis reduction descriptor. The reduced axis keeps size 1.
#[derive(Debug, Clone)]
pub struct ReduceCfg {
    pub kind: ReduceKind,
    pub axis: usize,
}

pub(crate) fn infer_shape(kind: OperatorKind, parents: &[&Shape]) -> Result<Shape> {
    if parents.len() != kind.arity() {
        bail_arity(kind.name(), kind.arity(), parents.len())?;
    }
    if kind.arity() == 2 && parents[0] != parents[1] {
        return Err(Error::ShapeMismatch {
            expected: (*parents[0]).clone(),
            got: (*parents[1]).clone(),
        });
    }
    Ok((*parents[0]).clone())
}

fn bail_arity(name: &str, expected: usize, got: usize) -> Result<()> {
    Err(Error::msg(format!(
        "operator {name}: expected {expected} parents, got {got}"
    )))
}

pub(crate) fn forward(kind: OperatorKind, a: &Tensor, b: Option<&Tensor>, out: &mut Tensor) -> Result<()> {
    match kind {
        OperatorKind::Abs => Tensor::map_into(a, out, f32::abs),
        OperatorKind::Exp => Tensor::map_into(a, out, f32::exp),
        OperatorKind::Log => Tensor::map_into(a, out, f32::ln),
        OperatorKind::Add => Tensor::zip_into(a, required(b)?, out, |x, y| x + y),
        OperatorKind::Sub => Tensor::zip_into(a, required(b)?, out, |x, y| x - y),
        OperatorKind::Mult => Tensor::zip_into(a, required(b)?, out, |x, y| x * y),
        OperatorKind::Div => Tensor::zip_into(a, required(b)?, out, |x, y| x / y),
    }
}

fn required(b: Option<&Tensor>) -> Result<&Tensor> {
    b.ok_or_else(|| Error::msg("binary operator missing second parent"))
}

/// Accumulate gradient contributions into one or both parent deltas.
pub(crate) fn backward(
    kind: OperatorKind,
    a: &Tensor,
    b: Option<&Tensor>,
    delta: &Tensor,
    out: &Tensor,
    pd_a: &mut Tensor,
    pd_b: Option<&mut Tensor>,
) -> Result<()> {
    match kind {
        OperatorKind::Abs => {
            for ((pd, &d), &x) in pd_a.data_mut().iter_mut().zip(delta.data()).zip(a.data()) {
                *pd += d * x.signum();
            }
        }
        OperatorKind::Exp => {
            for ((pd, &d), &o) in pd_a.data_mut().iter_mut().zip(delta.data()).zip(out.data()) {
                *pd += d * o;
            }
        }
        OperatorKind::Log => {
            for ((pd, &d), &x) in pd_a.data_mut().iter_mut().zip(delta.data()).zip(a.data()) {
                *pd += d / x;
            }
        }
        OperatorKind::Add => {
            pd_a.accumulate(delta)?;
            if let Some(pd) = pd_b {
                pd.accumulate(delta)?;
            }
        }
        OperatorKind::Sub => {
            pd_a.accumulate(delta)?;
            if let Some(pd) = pd_b {
                pd.axpy(-1.0, delta)?;
            }
        }
        OperatorKind::Mult => {
            let y = required(b)?;
            for ((pd, &d), &yv) in pd_a.data_mut().iter_mut().zip(delta.data()).zip(y.data()) {
                *pd += d * yv;
            }
            if let Some(pd) = pd_b {
                for ((pd, &d), &xv) in pd.data_mut().iter_mut().zip(delta.data()).zip(a.data()) {
                    *pd += d * xv;
                }
            }
        }
        OperatorKind::Div => {
            let y = required(b)?;
            for ((pd, &d), &yv) in pd_a.data_mut().iter_mut().zip(delta.data()).zip(y.data()) {
                *pd += d / yv;
            }
            if let Some(pd) = pd_b {
                for (((pd, &d), &xv), &yv) in pd
                    .data_mut()
                    .iter_mut()
                    .zip(delta.data())
                    .zip(a.data())
                    .zip(y.data())
                {
                    *pd -= d * xv / (yv * yv);
                }
            }
        }
    }
    Ok(())
}

// Reductions

pub(crate) fn reduce_infer_shape(cfg: &ReduceCfg, parent: &Shape) -> Result<Shape> {
    if cfg.axis == 0 {
        return Err(Error::msg(
            "reduce: axis 0 is the batch dimension and cannot be reduced",
        ));
    }
    if cfg.axis >= parent.rank() {
        return Err(Error::DimOutOfRange {
            dim: cfg.axis,
            rank: parent.rank(),
        });
    }
    let mut dims = parent.dims().to_vec();
    dims[cfg.axis] = 1;
    Ok(Shape::new(dims))
}

/// Decompose a shape around `axis` into (outer, axis, inner) extents.
fn split_axis(dims: &[usize], axis: usize) -> (usize, usize, usize) {
    let outer: usize = dims[..axis].iter().product::<usize>().max(1);
    let inner: usize = dims[axis + 1..].iter().product::<usize>().max(1);
    (outer, dims[axis], inner)
}

pub(crate) fn reduce_forward(cfg: &ReduceCfg, x: &Tensor, out: &mut Tensor) -> Result<()> {
    let (outer, n, inner) = split_axis(x.dims(), cfg.axis);
    let xd = x.data();
    let od = out.data_mut();
    let scale = match cfg.kind {
        ReduceKind::Sum => 1.0,
        ReduceKind::Mean => 1.0 / n as f32,
    };
    for o in 0..outer {
        for i in 0..inner {
            let mut sum = 0.0;
            for k in 0..n {
                sum += xd[(o * n + k) * inner + i];
            }
            od[o * inner + i] = sum * scale;
        }
    }
    Ok(())
}

pub(crate) fn reduce_backward(
    cfg: &ReduceCfg,
    delta: &Tensor,
    parent_delta: &mut Tensor,
) -> Result<()> {
    let (outer, n, inner) = split_axis(parent_delta.dims(), cfg.axis);
    let dd = delta.data();
    let pd = parent_delta.data_mut();
    let scale = match cfg.kind {
        ReduceKind::Sum => 1.0,
        ReduceKind::Mean => 1.0 / n as f32,
    };
    for o in 0..outer {
        for i in 0..inner {
            let g = dd[o * inner + i] * scale;
            for k in 0..n {
                pd[(o * n + k) * inner + i] += g;
            }
        }
    }
    Ok(())
}
