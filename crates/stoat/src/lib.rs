//! stoat — a layer-graph deep-learning engine.
//!
//! A model is an arena graph of layers with explicit forward/backward
//! passes. `build` binds an optimizer, losses, metrics, and a compute
//! service; training runs data-parallel over replica sub-nets with
//! synchronized phases and periodic weight averaging. Recurrent graphs
//! execute through a per-timestep unrolled net.
//!
//! ```no_run
//! use stoat::{CompServ, Device, Loss, Metric, ModelBuilder, Optimizer, Tensor};
//!
//! let mut m = ModelBuilder::new();
//! let x = m.input(&[4]);
//! let h = m.dense(x, 16)?;
//! let h = m.relu(h)?;
//! let out = m.dense(h, 2)?;
//! let mut net = m.model(&[x], &[out], "mlp")?;
//! net.build(
//!     Optimizer::sgd(0.1, 0.0),
//!     &[Loss::MeanSquaredError],
//!     &[Metric::MeanSquaredError],
//!     CompServ::cpu(Some(2)),
//! )?;
//! let xs = vec![Tensor::ones(vec![8, 4], Device::Cpu)];
//! let ys = vec![Tensor::zeros(vec![8, 2], Device::Cpu)];
//! net.fit(&xs, &ys, 8, 10)?;
//! println!("{}", net.summary());
//! # stoat::Result::Ok(())
//! ```

pub mod checkpoint;
pub mod compserv;
pub mod model;
pub mod net;
pub mod runner;
pub mod summary;
pub mod train;
pub mod unroll;

pub use compserv::CompServ;
pub use model::ModelBuilder;
pub use net::{Net, SubNet};
pub use train::{EpochLog, EvalReport, FitReport, OutputLog};

// The vocabulary crates, re-exported for callers.
pub use stoat_core::{Device, Error, Result, Shape, Tensor};
pub use stoat_nn::{
    Activation, Graph, LayerId, LayerKind, Loss, Metric, Mode, Optimizer, Padding, PoolKind,
};
