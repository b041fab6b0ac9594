// Layer kinds — the closed set of graph node types.
//
// Each kind lives in its own module with its config struct and plain
// forward/backward kernels; this enum ties them together so the graph
// can dispatch shape inference, parameter initialization, and buffer
// management without runtime type inspection.

pub mod activation;
pub mod conv;
pub mod dense;
pub mod merge;
pub mod operator;
pub mod pool;
pub mod recurrent;

pub use activation::Activation;
pub use conv::{Conv2dCfg, Padding};
pub use dense::DenseCfg;
pub use merge::MergeKind;
pub use operator::{OperatorKind, ReduceCfg, ReduceKind};
pub use pool::{Pool2dCfg, PoolKind};
pub use recurrent::{LstmCfg, RnnCfg};

use stoat_core::{Device, Error, Result, Shape, Tensor};

/// The closed set of layer kinds a graph can hold.
#[derive(Debug, Clone)]
pub enum LayerKind {
    /// Data entry point. `decoder` marks a teacher-forced decoder input
    /// whose per-step feed is managed by the unrolled net.
    Input { decoder: bool },
    Dense(DenseCfg),
    Activation(Activation),
    Conv2d(Conv2dCfg),
    Pool2d(Pool2dCfg),
    Rnn(RnnCfg),
    Lstm(LstmCfg),
    Operator(OperatorKind),
    Reduce(ReduceCfg),
    Merge(MergeKind),
}

impl LayerKind {
    /// Default-name prefix for the per-graph name allocator.
    pub fn prefix(&self) -> &'static str {
        match self {
            LayerKind::Input { .. } => "input",
            LayerKind::Dense(_) => "dense",
            LayerKind::Activation(_) => "activation",
            LayerKind::Conv2d(_) => "conv2d",
            LayerKind::Pool2d(_) => "pool2d",
            LayerKind::Rnn(_) => "rnn",
            LayerKind::Lstm(_) => "lstm",
            LayerKind::Operator(_) => "operator",
            LayerKind::Reduce(_) => "reduce",
            LayerKind::Merge(_) => "merge",
        }
    }

    /// Human-readable description for `summary()`.
    pub fn describe(&self) -> String {
        match self {
            LayerKind::Input { decoder: false } => "Input".into(),
            LayerKind::Input { decoder: true } => "Input(decoder)".into(),
            LayerKind::Dense(c) => format!("Dense({})", c.units),
            LayerKind::Activation(a) => format!("Activation({})", a.name()),
            LayerKind::Conv2d(c) => format!(
                "Conv2d({}, {}x{})",
                c.filters, c.kernel.0, c.kernel.1
            ),
            LayerKind::Pool2d(c) => format!(
                "Pool2d({}, {}x{})",
                match c.kind {
                    PoolKind::Max => "max",
                    PoolKind::Avg => "avg",
                },
                c.kernel.0,
                c.kernel.1
            ),
            LayerKind::Rnn(c) => format!("Rnn({})", c.units),
            LayerKind::Lstm(c) => format!("Lstm({})", c.units),
            LayerKind::Operator(op) => format!("Operator({})", op.name()),
            LayerKind::Reduce(c) => format!(
                "Reduce({}, axis {})",
                match c.kind {
                    ReduceKind::Sum => "sum",
                    ReduceKind::Mean => "mean",
                },
                c.axis
            ),
            LayerKind::Merge(MergeKind::Add) => "Merge(add)".into(),
            LayerKind::Merge(MergeKind::Concat { axis }) => format!("Merge(concat axis {axis})"),
        }
    }

    pub fn is_recurrent(&self) -> bool {
        matches!(self, LayerKind::Rnn(_) | LayerKind::Lstm(_))
    }

    pub fn is_decoder_input(&self) -> bool {
        matches!(self, LayerKind::Input { decoder: true })
    }

    /// Output shape as a pure function of parent shapes and the kind's
    /// own hyperparameters. Fails on rank/arity mismatches.
    pub fn infer_shape(&self, parents: &[&Shape]) -> Result<Shape> {
        let one = |op: &'static str| -> Result<&Shape> {
            parents
                .first()
                .copied()
                .ok_or_else(|| Error::msg(format!("{op}: layer requires a parent")))
        };
        match self {
            LayerKind::Input { .. } => Err(Error::msg(
                "input: shape is declared at construction, not inferred",
            )),
            LayerKind::Dense(c) => dense::infer_shape(c, one("dense")?),
            LayerKind::Activation(_) => Ok(one("activation")?.clone()),
            LayerKind::Conv2d(c) => conv::infer_shape(c, one("conv2d")?),
            LayerKind::Pool2d(c) => pool::infer_shape(c, one("pool2d")?),
            // A second parent on a recurrent cell is the previous step's
            // copy and does not change the output shape.
            LayerKind::Rnn(c) => recurrent::rnn_infer_shape(c, one("rnn")?),
            LayerKind::Lstm(c) => recurrent::lstm_infer_shape(c, one("lstm")?),
            LayerKind::Operator(op) => operator::infer_shape(*op, parents),
            LayerKind::Reduce(c) => operator::reduce_infer_shape(c, one("reduce")?),
            LayerKind::Merge(m) => merge::infer_shape(*m, parents),
        }
    }

    /// Freshly initialized parameter tensors for this kind.
    pub fn init_params(&self, parents: &[&Shape], device: Device) -> Vec<Tensor> {
        match self {
            LayerKind::Dense(c) => dense::init_params(c, parents[0], device),
            LayerKind::Conv2d(c) => conv::init_params(c, parents[0], device),
            LayerKind::Rnn(c) => recurrent::rnn_init_params(c, parents[0], device),
            LayerKind::Lstm(c) => recurrent::lstm_init_params(c, parents[0], device),
            _ => Vec::new(),
        }
    }

    /// Resize kind-held auxiliary buffers to a new output shape.
    pub fn resize_aux(&mut self, out: &Shape) {
        match self {
            LayerKind::Pool2d(c) => pool::resize_indices(c, out.elem_count()),
            LayerKind::Lstm(c) => {
                let batch = out.batch();
                c.cache.gates.resize_batch(batch);
                c.cache.c.resize_batch(batch);
                c.cache.tanh_c.resize_batch(batch);
                c.cache.delta_c.resize_batch(batch);
            }
            _ => {}
        }
    }

    /// Zero the auxiliary gradient state at the start of a step.
    pub fn reset_aux(&mut self) {
        if let LayerKind::Lstm(c) = self {
            c.cache.delta_c.zero_();
        }
    }
}
