//! Parameter initializers.
//!
//! Dense layers use Glorot (Xavier) uniform, recurrent kernels use the
//! Kaiming-style U(-k, k) with k = sqrt(1/fan_in). Biases start at zero.

use crate::device::Device;
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Glorot uniform: U(-l, l) with l = sqrt(6 / (fan_in + fan_out)).
pub fn glorot_uniform(shape: impl Into<Shape>, device: Device, fan_in: usize, fan_out: usize) -> Tensor {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    Tensor::rand_uniform(shape, device, -limit, limit)
}

/// Kaiming-style uniform: U(-k, k) with k = sqrt(1 / fan_in).
pub fn kaiming_uniform(shape: impl Into<Shape>, device: Device, fan_in: usize) -> Tensor {
    let k = (1.0 / fan_in as f32).sqrt();
    Tensor::rand_uniform(shape, device, -k, k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glorot_stays_in_limit() {
        let t = glorot_uniform(vec![16, 8], Device::Cpu, 16, 8);
        let limit = (6.0f32 / 24.0).sqrt() + 1e-6;
        assert!(t.data().iter().all(|v| v.abs() <= limit));
    }

    #[test]
    fn kaiming_stays_in_limit() {
        let t = kaiming_uniform(vec![9, 4], Device::Cpu, 9);
        let k = (1.0f32 / 9.0).sqrt() + 1e-6;
        assert!(t.data().iter().all(|v| v.abs() <= k));
    }
}
