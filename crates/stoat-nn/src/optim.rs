// Optimizers — per-replica parameter update rules.
//
// State (momentum buffers, Adam moments) is keyed by parameter arena
// slot and lazily allocated on first use, so an optimizer instance works
// for any graph with a matching arena layout. `replicate()` produces a
// fresh-state instance with the same hyperparameters — one per replica,
// seeded identically at build time.
//
// Contract: the net zeros the gradient arena at the start of every step;
// `step` only reads gradients and never clears them.

use stoat_core::{Result, Tensor};

/// SGD with optional classical momentum:
/// v = momentum·v − lr·g; w += v.
#[derive(Debug, Clone)]
pub struct Sgd {
    pub lr: f32,
    pub momentum: f32,
    velocity: Vec<Option<Tensor>>,
}

/// Adam with bias-corrected first/second moment estimates.
#[derive(Debug, Clone)]
pub struct Adam {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    t: u64,
    m: Vec<Option<Tensor>>,
    v: Vec<Option<Tensor>>,
}

/// The closed set of update rules a net can bind.
#[derive(Debug, Clone)]
pub enum Optimizer {
    Sgd(Sgd),
    Adam(Adam),
}

impl Optimizer {
    pub fn sgd(lr: f32, momentum: f32) -> Self {
        Optimizer::Sgd(Sgd {
            lr,
            momentum,
            velocity: Vec::new(),
        })
    }

    pub fn adam(lr: f32) -> Self {
        Optimizer::Adam(Adam {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Optimizer::Sgd(_) => "sgd",
            Optimizer::Adam(_) => "adam",
        }
    }

    /// Fresh-state copy with identical hyperparameters (one per replica).
    pub fn replicate(&self) -> Self {
        match self {
            Optimizer::Sgd(s) => Optimizer::sgd(s.lr, s.momentum),
            Optimizer::Adam(a) => Optimizer::Adam(Adam {
                lr: a.lr,
                beta1: a.beta1,
                beta2: a.beta2,
                eps: a.eps,
                t: 0,
                m: Vec::new(),
                v: Vec::new(),
            }),
        }
    }

    /// Change the learning rate in place (all replicas get the same call).
    pub fn set_lr(&mut self, lr: f32) {
        match self {
            Optimizer::Sgd(s) => s.lr = lr,
            Optimizer::Adam(a) => a.lr = lr,
        }
    }

    /// Apply one update to every parameter slot, in place.
    pub fn step(&mut self, params: &mut [Tensor], grads: &[Tensor]) -> Result<()> {
        match self {
            Optimizer::Sgd(s) => {
                ensure_slots(&mut s.velocity, params.len());
                for (i, (w, g)) in params.iter_mut().zip(grads).enumerate() {
                    if s.momentum == 0.0 {
                        w.axpy(-s.lr, g)?;
                    } else {
                        let v = s.velocity[i]
                            .get_or_insert_with(|| Tensor::zeros(w.dims().to_vec(), w.device()));
                        if v.shape() != w.shape() {
                            *v = Tensor::zeros(w.dims().to_vec(), w.device());
                        }
                        v.scale_(s.momentum);
                        v.axpy(-s.lr, g)?;
                        w.accumulate(v)?;
                    }
                }
                Ok(())
            }
            Optimizer::Adam(a) => {
                ensure_slots(&mut a.m, params.len());
                ensure_slots(&mut a.v, params.len());
                a.t += 1;
                let bc1 = 1.0 - a.beta1.powi(a.t as i32);
                let bc2 = 1.0 - a.beta2.powi(a.t as i32);
                for (i, (w, g)) in params.iter_mut().zip(grads).enumerate() {
                    let m = a.m[i]
                        .get_or_insert_with(|| Tensor::zeros(w.dims().to_vec(), w.device()));
                    if m.shape() != w.shape() {
                        *m = Tensor::zeros(w.dims().to_vec(), w.device());
                    }
                    m.scale_(a.beta1);
                    m.axpy(1.0 - a.beta1, g)?;

                    let v = a.v[i]
                        .get_or_insert_with(|| Tensor::zeros(w.dims().to_vec(), w.device()));
                    if v.shape() != w.shape() {
                        *v = Tensor::zeros(w.dims().to_vec(), w.device());
                    }
                    v.scale_(a.beta2);
                    for (vv, &gv) in v.data_mut().iter_mut().zip(g.data()) {
                        *vv += (1.0 - a.beta2) * gv * gv;
                    }

                    for ((wv, &mv), &vv) in
                        w.data_mut().iter_mut().zip(m.data()).zip(v.data())
                    {
                        let m_hat = mv / bc1;
                        let v_hat = vv / bc2;
                        *wv -= a.lr * m_hat / (v_hat.sqrt() + a.eps);
                    }
                }
                Ok(())
            }
        }
    }
}

fn ensure_slots(state: &mut Vec<Option<Tensor>>, n: usize) {
    if state.len() < n {
        state.resize(n, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stoat_core::Device;

    #[test]
    fn sgd_moves_against_gradient() {
        let mut opt = Optimizer::sgd(0.1, 0.0);
        let mut params = vec![Tensor::ones(vec![2], Device::Cpu)];
        let grads = vec![Tensor::ones(vec![2], Device::Cpu)];
        opt.step(&mut params, &grads).unwrap();
        assert!(params[0].data().iter().all(|&v| (v - 0.9).abs() < 1e-6));
    }

    #[test]
    fn sgd_momentum_accelerates() {
        let mut opt = Optimizer::sgd(0.1, 0.9);
        let mut params = vec![Tensor::zeros(vec![1], Device::Cpu)];
        let grads = vec![Tensor::ones(vec![1], Device::Cpu)];
        opt.step(&mut params, &grads).unwrap();
        let first = params[0].data()[0];
        opt.step(&mut params, &grads).unwrap();
        let second_step = params[0].data()[0] - first;
        // Second step is larger in magnitude than the first.
        assert!(second_step.abs() > first.abs());
    }

    #[test]
    fn adam_first_step_is_lr_sized() {
        let mut opt = Optimizer::adam(0.01);
        let mut params = vec![Tensor::zeros(vec![3], Device::Cpu)];
        let grads = vec![Tensor::full(vec![3], Device::Cpu, 5.0)];
        opt.step(&mut params, &grads).unwrap();
        // Bias correction makes the first step ≈ lr regardless of scale.
        assert!(params[0]
            .data()
            .iter()
            .all(|&v| (v + 0.01).abs() < 1e-4));
    }

    #[test]
    fn replicate_starts_with_fresh_state() {
        let mut opt = Optimizer::sgd(0.1, 0.9);
        let mut params = vec![Tensor::zeros(vec![1], Device::Cpu)];
        let grads = vec![Tensor::ones(vec![1], Device::Cpu)];
        opt.step(&mut params, &grads).unwrap();

        let clone = opt.replicate();
        match (opt, clone) {
            (Optimizer::Sgd(orig), Optimizer::Sgd(fresh)) => {
                assert!(orig.velocity.iter().any(|v| v.is_some()));
                assert!(fresh.velocity.is_empty());
                assert_eq!(orig.lr, fresh.lr);
            }
            _ => unreachable!(),
        }
    }
}
