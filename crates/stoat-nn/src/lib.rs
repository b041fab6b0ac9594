//! Layer graph and training vocabulary for the stoat engine.
//!
//! The heart of the crate is [`graph::Graph`]: an arena of layers where
//! parent/child edges and parameter sharing are indices, never pointers.
//! Layer kinds are a closed enum dispatched at compile time; losses,
//! metrics, and optimizers are small stateless (or per-slot-stateful)
//! values bound to a net at build time.

pub mod graph;
pub mod layers;
pub mod losses;
pub mod metrics;
pub mod optim;

pub use graph::{Graph, Layer, LayerId, Mode, NameAllocator, ParamId};
pub use layers::{Activation, LayerKind, MergeKind, OperatorKind, Padding, PoolKind, ReduceKind};
pub use losses::Loss;
pub use metrics::Metric;
pub use optim::Optimizer;
