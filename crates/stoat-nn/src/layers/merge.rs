// Merge layers — n-ary combination of parent outputs.
//
// Concat stitches parents along a feature axis; Add sums them
// element-wise. Backward splits (or copies) the delta back to every
// parent, always accumulating.

use stoat_core::{Error, Result, Shape, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// Concatenate along `axis` (axis 0, the batch, is not allowed).
    Concat { axis: usize },
    /// Element-wise sum of identically shaped parents.
    Add,
}

pub(crate) fn infer_shape(kind: MergeKind, parents: &[&Shape]) -> Result<Shape> {
    if parents.len() < 2 {
        return Err(Error::msg(format!(
            "merge: expected at least 2 parents, got {}",
            parents.len()
        )));
    }
    match kind {
        MergeKind::Add => {
            for p in &parents[1..] {
                if *p != parents[0] {
                    return Err(Error::ShapeMismatch {
                        expected: (*parents[0]).clone(),
                        got: (**p).clone(),
                    });
                }
            }
            Ok((*parents[0]).clone())
        }
        MergeKind::Concat { axis } => {
            if axis == 0 {
                return Err(Error::msg("concat: axis 0 is the batch dimension"));
            }
            let rank = parents[0].rank();
            if axis >= rank {
                return Err(Error::DimOutOfRange { dim: axis, rank });
            }
            let mut dims = parents[0].dims().to_vec();
            for p in &parents[1..] {
                if p.rank() != rank {
                    return Err(Error::RankMismatch {
                        op: "concat",
                        expected: rank,
                        got: p.rank(),
                    });
                }
                for (d, (a, b)) in parents[0].dims().iter().zip(p.dims()).enumerate() {
                    if d != axis && a != b {
                        return Err(Error::ShapeMismatch {
                            expected: (*parents[0]).clone(),
                            got: (**p).clone(),
                        });
                    }
                }
                dims[axis] += p.dims()[axis];
            }
            Ok(Shape::new(dims))
        }
    }
}

/// (outer, axis, inner) extents of `dims` around `axis`.
fn split_axis(dims: &[usize], axis: usize) -> (usize, usize, usize) {
    let outer: usize = dims[..axis].iter().product::<usize>().max(1);
    let inner: usize = dims[axis + 1..].iter().product::<usize>().max(1);
    (outer, dims[axis], inner)
}

pub(crate) fn forward(kind: MergeKind, parents: &[&Tensor], out: &mut Tensor) -> Result<()> {
    match kind {
        MergeKind::Add => {
            out.zero_();
            for p in parents {
                out.accumulate(p)?;
            }
            Ok(())
        }
        MergeKind::Concat { axis } => {
            let (outer, total, inner) = split_axis(out.dims(), axis);
            let od = out.data_mut();
            let mut offset = 0;
            for p in parents {
                let (_, n, _) = split_axis(p.dims(), axis);
                let pd = p.data();
                for o in 0..outer {
                    let src = &pd[o * n * inner..(o + 1) * n * inner];
                    let dst_start = (o * total + offset) * inner;
                    od[dst_start..dst_start + n * inner].copy_from_slice(src);
                }
                offset += n;
            }
            Ok(())
        }
    }
}

/// Accumulate the delta slice belonging to parent `which` into `pd`.
pub(crate) fn backward_into(
    kind: MergeKind,
    delta: &Tensor,
    parent_dims: &[&[usize]],
    which: usize,
    pd: &mut Tensor,
) -> Result<()> {
    match kind {
        MergeKind::Add => pd.accumulate(delta),
        MergeKind::Concat { axis } => {
            let (outer, total, inner) = split_axis(delta.dims(), axis);
            let offset: usize = parent_dims[..which].iter().map(|d| d[axis]).sum();
            let n = parent_dims[which][axis];
            let dd = delta.data();
            let pdd = pd.data_mut();
            for o in 0..outer {
                let src_start = (o * total + offset) * inner;
                for k in 0..n * inner {
                    pdd[o * n * inner + k] += dd[src_start + k];
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stoat_core::Device;

    #[test]
    fn concat_roundtrip() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2], Device::Cpu).unwrap();
        let b = Tensor::from_vec(vec![5.0, 6.0], vec![2, 1], Device::Cpu).unwrap();
        let kind = MergeKind::Concat { axis: 1 };
        let shape = infer_shape(kind, &[a.shape(), b.shape()]).unwrap();
        assert_eq!(shape.dims(), &[2, 3]);

        let mut out = Tensor::zeros(vec![2, 3], Device::Cpu);
        forward(kind, &[&a, &b], &mut out).unwrap();
        assert_eq!(out.data(), &[1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);

        let delta = out.clone();
        let dims: Vec<&[usize]> = vec![a.dims(), b.dims()];
        let mut pa = Tensor::zeros(vec![2, 2], Device::Cpu);
        let mut pb = Tensor::zeros(vec![2, 1], Device::Cpu);
        backward_into(kind, &delta, &dims, 0, &mut pa).unwrap();
        backward_into(kind, &delta, &dims, 1, &mut pb).unwrap();
        assert_eq!(pa.data(), a.data());
        assert_eq!(pb.data(), b.data());
    }

    #[test]
    fn add_merge_sums_and_fans_back() {
        let a = Tensor::ones(vec![2, 2], Device::Cpu);
        let b = Tensor::full(vec![2, 2], Device::Cpu, 2.0);
        let mut out = Tensor::zeros(vec![2, 2], Device::Cpu);
        forward(MergeKind::Add, &[&a, &b], &mut out).unwrap();
        assert!(out.data().iter().all(|&v| (v - 3.0).abs() < 1e-6));
    }
}
