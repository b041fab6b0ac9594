use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

use crate::bail;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::shape::Shape;

/// Minimum number of rows before a matmul fans out across the rayon pool.
const PAR_ROWS: usize = 64;

/// An n-dimensional array of f32 with a device placement tag.
///
/// The buffer is flat, row-major, and owned: cloning produces an
/// independent tensor, and no two layers ever alias one buffer. The
/// leading dimension is the batch dimension for every layer-facing
/// operation.
///
/// Invariant: `data.len() == shape.elem_count()`. All constructors and
/// `resize_batch` maintain it.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    device: Device,
    data: Vec<f32>,
}

impl Tensor {
    // Constructors

    /// A tensor of zeros.
    pub fn zeros(shape: impl Into<Shape>, device: Device) -> Self {
        let shape = shape.into();
        let data = vec![0.0; shape.elem_count()];
        Tensor {
            shape,
            device,
            data,
        }
    }

    /// A tensor filled with a constant.
    pub fn full(shape: impl Into<Shape>, device: Device, value: f32) -> Self {
        let shape = shape.into();
        let data = vec![value; shape.elem_count()];
        Tensor {
            shape,
            device,
            data,
        }
    }

    /// A tensor of ones.
    pub fn ones(shape: impl Into<Shape>, device: Device) -> Self {
        Self::full(shape, device, 1.0)
    }

    /// Build a tensor from an existing buffer.
    pub fn from_vec(data: Vec<f32>, shape: impl Into<Shape>, device: Device) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: data.len(),
                shape,
            });
        }
        Ok(Tensor {
            shape,
            device,
            data,
        })
    }

    /// A tensor with entries drawn from N(mean, std²).
    pub fn randn(shape: impl Into<Shape>, device: Device, mean: f32, std: f32) -> Self {
        let shape = shape.into();
        let normal = Normal::new(mean, std).expect("std must be finite and positive");
        let mut rng = rand::thread_rng();
        let data = (0..shape.elem_count())
            .map(|_| normal.sample(&mut rng))
            .collect();
        Tensor {
            shape,
            device,
            data,
        }
    }

    /// A tensor with entries drawn uniformly from [lo, hi).
    pub fn rand_uniform(shape: impl Into<Shape>, device: Device, lo: f32, hi: f32) -> Self {
        let shape = shape.into();
        let mut rng = rand::thread_rng();
        let data = (0..shape.elem_count())
            .map(|_| rng.gen_range(lo..hi))
            .collect();
        Tensor {
            shape,
            device,
            data,
        }
    }

    // Accessors

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.data.len()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// The batch (leading) dimension.
    pub fn batch(&self) -> usize {
        self.shape.batch()
    }

    /// Elements per sample (product of non-batch dimensions).
    pub fn sample_size(&self) -> usize {
        self.shape.sample_size()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Retag the tensor onto another device. The buffer stays host-side;
    /// the tag drives replica placement and synchronization policy.
    pub fn set_device(&mut self, device: Device) {
        self.device = device;
    }

    // In-place mutation

    pub fn fill_(&mut self, value: f32) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    pub fn zero_(&mut self) {
        self.fill_(0.0);
    }

    pub fn scale_(&mut self, s: f32) {
        self.data.iter_mut().for_each(|v| *v *= s);
    }

    pub fn map_inplace(&mut self, f: impl Fn(f32) -> f32) {
        self.data.iter_mut().for_each(|v| *v = f(*v));
    }

    /// Overwrite this tensor's contents with `src`'s. Shapes must match.
    pub fn copy_from(&mut self, src: &Tensor) -> Result<()> {
        self.check_same_shape(src)?;
        self.data.copy_from_slice(&src.data);
        Ok(())
    }

    /// `self += src`, element-wise.
    ///
    /// This is THE gradient-accumulation primitive: every backward pass
    /// adds into a downstream delta through here, never overwrites, so a
    /// layer with several children ends up with the sum of their
    /// contributions.
    pub fn accumulate(&mut self, src: &Tensor) -> Result<()> {
        self.check_same_shape(src)?;
        for (d, s) in self.data.iter_mut().zip(&src.data) {
            *d += s;
        }
        Ok(())
    }

    /// `self += s * src`, element-wise.
    pub fn axpy(&mut self, s: f32, src: &Tensor) -> Result<()> {
        self.check_same_shape(src)?;
        for (d, x) in self.data.iter_mut().zip(&src.data) {
            *d += s * x;
        }
        Ok(())
    }

    /// Reallocate the leading dimension to `batch`, zeroing the buffer.
    /// Feature dimensions are untouched; idempotent for a fixed `batch`.
    pub fn resize_batch(&mut self, batch: usize) {
        self.shape = self.shape.with_batch(batch);
        self.data = vec![0.0; self.shape.elem_count()];
    }

    // Element-wise combinators used by the operator/activation layers

    pub fn map_into(src: &Tensor, dst: &mut Tensor, f: impl Fn(f32) -> f32) -> Result<()> {
        dst.check_same_shape(src)?;
        for (d, s) in dst.data.iter_mut().zip(&src.data) {
            *d = f(*s);
        }
        Ok(())
    }

    pub fn zip_into(
        a: &Tensor,
        b: &Tensor,
        dst: &mut Tensor,
        f: impl Fn(f32, f32) -> f32,
    ) -> Result<()> {
        a.check_same_shape(b)?;
        dst.check_same_shape(a)?;
        for ((d, x), y) in dst.data.iter_mut().zip(&a.data).zip(&b.data) {
            *d = f(*x, *y);
        }
        Ok(())
    }

    // Matrix kernels (2-D, row-major)

    /// `c = a^(ta) · b^(tb)`, or `c += …` when `acc` is set.
    ///
    /// The transpose flags address the operands in place, so dense and
    /// recurrent backward passes need no materialized transposes. Shapes
    /// are validated against the effective (post-transpose) dimensions.
    pub fn matmul_into(
        a: &Tensor,
        ta: bool,
        b: &Tensor,
        tb: bool,
        c: &mut Tensor,
        acc: bool,
    ) -> Result<()> {
        let (m, k) = a.mat_dims("matmul lhs", ta)?;
        let (kb, n) = b.mat_dims("matmul rhs", tb)?;
        if k != kb {
            bail!("matmul: inner dimensions differ, {k} vs {kb}");
        }
        let (cm, cn) = c.mat_dims("matmul out", false)?;
        if (cm, cn) != (m, n) {
            return Err(Error::ShapeMismatch {
                expected: Shape::new(vec![m, n]),
                got: c.shape.clone(),
            });
        }

        let a_cols = a.dims()[1];
        let b_cols = b.dims()[1];
        let ad = &a.data;
        let bd = &b.data;

        let row = |i: usize, out: &mut [f32]| {
            for (j, o) in out.iter_mut().enumerate() {
                let mut sum = 0.0f32;
                for l in 0..k {
                    let av = if ta { ad[l * a_cols + i] } else { ad[i * a_cols + l] };
                    let bv = if tb { bd[j * b_cols + l] } else { bd[l * b_cols + j] };
                    sum += av * bv;
                }
                if acc {
                    *o += sum;
                } else {
                    *o = sum;
                }
            }
        };

        if m >= PAR_ROWS {
            c.data
                .par_chunks_mut(n)
                .enumerate()
                .for_each(|(i, out)| row(i, out));
        } else {
            for (i, out) in c.data.chunks_mut(n).enumerate() {
                row(i, out);
            }
        }
        Ok(())
    }

    /// Add a bias vector to every row of a 2-D tensor.
    pub fn add_bias_rows(&mut self, bias: &Tensor) -> Result<()> {
        let (_, n) = self.mat_dims("add_bias_rows", false)?;
        if bias.elem_count() != n {
            return Err(Error::ShapeMismatch {
                expected: Shape::new(vec![n]),
                got: bias.shape.clone(),
            });
        }
        for row in self.data.chunks_mut(n) {
            for (v, b) in row.iter_mut().zip(&bias.data) {
                *v += b;
            }
        }
        Ok(())
    }

    /// Column sums of a 2-D tensor: `dst[j] (+)= Σ_i src[i, j]`.
    pub fn sum_rows_into(src: &Tensor, dst: &mut Tensor, acc: bool) -> Result<()> {
        let (_, n) = src.mat_dims("sum_rows", false)?;
        if dst.elem_count() != n {
            return Err(Error::ShapeMismatch {
                expected: Shape::new(vec![n]),
                got: dst.shape.clone(),
            });
        }
        if !acc {
            dst.zero_();
        }
        for row in src.data.chunks(n) {
            for (d, v) in dst.data.iter_mut().zip(row) {
                *d += v;
            }
        }
        Ok(())
    }

    // Batch plumbing

    /// Gather rows of `src` by index into `dst` (the batch-shard copy).
    ///
    /// `dst` must already be sized to `indices.len()` rows with the same
    /// sample size; this is the only point where data crosses from host
    /// batch storage into replica-private storage.
    pub fn select_rows_into(src: &Tensor, dst: &mut Tensor, indices: &[usize]) -> Result<()> {
        let row = src.sample_size();
        if dst.sample_size() != row || dst.batch() != indices.len() {
            return Err(Error::ShapeMismatch {
                expected: {
                    let mut dims = vec![indices.len()];
                    dims.extend_from_slice(&src.dims()[1..]);
                    Shape::new(dims)
                },
                got: dst.shape.clone(),
            });
        }
        let n = src.batch();
        for (out, &i) in dst.data.chunks_mut(row).zip(indices) {
            if i >= n {
                bail!("select_rows: index {i} out of range for {n} samples");
            }
            out.copy_from_slice(&src.data[i * row..(i + 1) * row]);
        }
        Ok(())
    }

    /// Copy all rows of `src` into `self` starting at row `offset`
    /// (used to collect replica shard outputs into a full-batch tensor).
    pub fn copy_rows_from(&mut self, src: &Tensor, offset: usize) -> Result<()> {
        let row = self.sample_size();
        if src.sample_size() != row {
            return Err(Error::ShapeMismatch {
                expected: self.shape.with_batch(src.batch()),
                got: src.shape.clone(),
            });
        }
        let end = offset + src.batch();
        if end > self.batch() {
            bail!(
                "copy_rows: rows {offset}..{end} out of range for {} rows",
                self.batch()
            );
        }
        self.data[offset * row..end * row].copy_from_slice(&src.data);
        Ok(())
    }

    /// Extract timestep `t` of a time-major-second tensor:
    /// `[batch, steps, d…] -> [batch, d…]`.
    pub fn timestep(&self, t: usize) -> Result<Tensor> {
        if self.rank() < 2 {
            return Err(Error::RankMismatch {
                op: "timestep",
                expected: 3,
                got: self.rank(),
            });
        }
        let b = self.batch();
        let steps = self.dims()[1];
        if t >= steps {
            bail!("timestep {t} out of range for {steps} steps");
        }
        let inner: usize = self.dims()[2..].iter().product::<usize>().max(1);
        let mut dims = vec![b];
        dims.extend_from_slice(&self.dims()[2..]);
        let mut out = Tensor::zeros(dims, self.device);
        for s in 0..b {
            let src = &self.data[(s * steps + t) * inner..(s * steps + t + 1) * inner];
            out.data[s * inner..(s + 1) * inner].copy_from_slice(src);
        }
        Ok(out)
    }

    /// Stack per-timestep tensors `[batch, d…]` into `[batch, steps, d…]`.
    pub fn stack_timesteps(steps: &[&Tensor]) -> Result<Tensor> {
        if steps.is_empty() {
            bail!("stack_timesteps: empty step list");
        }
        let b = steps[0].batch();
        let inner = steps[0].sample_size();
        let t = steps.len();
        let mut dims = vec![b, t];
        dims.extend_from_slice(&steps[0].dims()[1..]);
        let mut out = Tensor::zeros(dims, steps[0].device);
        for (ti, step) in steps.iter().enumerate() {
            if step.batch() != b || step.sample_size() != inner {
                return Err(Error::ShapeMismatch {
                    expected: steps[0].shape.clone(),
                    got: step.shape.clone(),
                });
            }
            for s in 0..b {
                let dst = &mut out.data[(s * t + ti) * inner..(s * t + ti + 1) * inner];
                dst.copy_from_slice(&step.data[s * inner..(s + 1) * inner]);
            }
        }
        Ok(out)
    }

    /// Per-row argmax of a 2-D tensor.
    pub fn row_argmax(&self) -> Result<Vec<usize>> {
        let (_, n) = self.mat_dims("row_argmax", false)?;
        Ok(self
            .data
            .chunks(n)
            .map(|row| {
                row.iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0)
            })
            .collect())
    }

    // Internal helpers

    fn check_same_shape(&self, other: &Tensor) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        Ok(())
    }

    fn mat_dims(&self, op: &'static str, transpose: bool) -> Result<(usize, usize)> {
        if self.rank() != 2 {
            return Err(Error::RankMismatch {
                op,
                expected: 2,
                got: self.rank(),
            });
        }
        let (r, c) = (self.dims()[0], self.dims()[1]);
        Ok(if transpose { (c, r) } else { (r, c) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t2(data: Vec<f32>, r: usize, c: usize) -> Tensor {
        Tensor::from_vec(data, vec![r, c], Device::Cpu).unwrap()
    }

    #[test]
    fn from_vec_checks_element_count() {
        assert!(Tensor::from_vec(vec![1.0; 5], vec![2, 3], Device::Cpu).is_err());
    }

    #[test]
    fn matmul_plain() {
        let a = t2(vec![1.0, 2.0, 3.0, 4.0], 2, 2);
        let b = t2(vec![5.0, 6.0, 7.0, 8.0], 2, 2);
        let mut c = Tensor::zeros(vec![2, 2], Device::Cpu);
        Tensor::matmul_into(&a, false, &b, false, &mut c, false).unwrap();
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn matmul_transposes_and_accumulate() {
        // a^T · b where a is [2,3] -> effective [3,2]
        let a = t2(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3);
        let b = t2(vec![1.0, 0.0, 0.0, 1.0], 2, 2);
        let mut c = Tensor::ones(vec![3, 2], Device::Cpu);
        Tensor::matmul_into(&a, true, &b, false, &mut c, true).unwrap();
        // a^T = [[1,4],[2,5],[3,6]]; a^T·I = a^T; +1 everywhere
        assert_eq!(c.data(), &[2.0, 5.0, 3.0, 6.0, 4.0, 7.0]);
    }

    #[test]
    fn accumulate_sums_contributions() {
        let mut d = Tensor::zeros(vec![2, 2], Device::Cpu);
        let c1 = Tensor::full(vec![2, 2], Device::Cpu, 1.5);
        let c2 = Tensor::full(vec![2, 2], Device::Cpu, 2.0);
        d.accumulate(&c1).unwrap();
        d.accumulate(&c2).unwrap();
        assert!(d.data().iter().all(|&v| (v - 3.5).abs() < 1e-6));
    }

    #[test]
    fn resize_batch_is_idempotent() {
        let mut t = Tensor::ones(vec![8, 3], Device::Cpu);
        t.resize_batch(4);
        let first = t.shape().clone();
        t.resize_batch(4);
        assert_eq!(t.shape(), &first);
        assert_eq!(t.elem_count(), 12);
    }

    #[test]
    fn select_rows_gathers_by_index() {
        let src = t2((0..12).map(|v| v as f32).collect(), 4, 3);
        let mut dst = Tensor::zeros(vec![2, 3], Device::Cpu);
        Tensor::select_rows_into(&src, &mut dst, &[3, 1]).unwrap();
        assert_eq!(dst.data(), &[9.0, 10.0, 11.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn timestep_slices_middle_dim() {
        // [batch=2, steps=3, d=2]
        let t = Tensor::from_vec(
            (0..12).map(|v| v as f32).collect(),
            vec![2, 3, 2],
            Device::Cpu,
        )
        .unwrap();
        let s1 = t.timestep(1).unwrap();
        assert_eq!(s1.dims(), &[2, 2]);
        assert_eq!(s1.data(), &[2.0, 3.0, 8.0, 9.0]);
    }

    #[test]
    fn stack_roundtrips_timestep() {
        let t = Tensor::from_vec(
            (0..12).map(|v| v as f32).collect(),
            vec![2, 3, 2],
            Device::Cpu,
        )
        .unwrap();
        let steps: Vec<Tensor> = (0..3).map(|i| t.timestep(i).unwrap()).collect();
        let refs: Vec<&Tensor> = steps.iter().collect();
        let back = Tensor::stack_timesteps(&refs).unwrap();
        assert_eq!(back.dims(), t.dims());
        assert_eq!(back.data(), t.data());
    }
}
