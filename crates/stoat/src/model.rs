// Model definition — the builder every demo and test constructs nets
// through.
//
// The builder owns the arena while the graph is being wired; `model`
// consumes it, validates input/output reachability, and hands back a
// `Net` ready for `build`.

use stoat_core::{Device, Result};
use stoat_nn::{
    Activation, Graph, LayerId, LayerKind, MergeKind, OperatorKind, Padding, PoolKind,
};
use stoat_nn::layers::{Conv2dCfg, DenseCfg, LstmCfg, Pool2dCfg, ReduceCfg, RnnCfg};
use stoat_nn::ReduceKind;

use crate::net::Net;

/// Builds a layer graph and finishes it into a [`Net`].
///
/// ```no_run
/// use stoat::{Activation, CompServ, Loss, Metric, ModelBuilder, Optimizer};
///
/// let mut m = ModelBuilder::new();
/// let x = m.input(&[4]);
/// let h = m.dense(x, 16)?;
/// let h = m.activation(h, Activation::ReLU)?;
/// let y = m.dense(h, 2)?;
/// let out = m.activation(y, Activation::Softmax)?;
/// let mut net = m.model(&[x], &[out], "mlp")?;
/// net.build(
///     Optimizer::sgd(0.1, 0.9),
///     &[Loss::CategoricalCrossEntropy],
///     &[Metric::CategoricalAccuracy],
///     CompServ::cpu(Some(2)),
/// )?;
/// # stoat::Result::Ok(())
/// ```
#[derive(Debug)]
pub struct ModelBuilder {
    graph: Graph,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    pub fn new() -> Self {
        ModelBuilder {
            graph: Graph::new(Device::Cpu),
        }
    }

    /// Declare an input layer; `shape` excludes the batch dimension.
    pub fn input(&mut self, shape: &[usize]) -> LayerId {
        self.graph.add_input(shape, false, None)
    }

    /// Mark an input layer as the teacher-forced decoder input. Its
    /// per-step data is fed internally by the unrolled net.
    pub fn set_decoder(&mut self, input: LayerId) -> Result<()> {
        match &mut self.graph.layer_mut(input).kind {
            LayerKind::Input { decoder } => {
                *decoder = true;
                Ok(())
            }
            _ => Err(stoat_core::Error::msg(
                "set_decoder: layer is not an input layer",
            )),
        }
    }

    pub fn dense(&mut self, parent: LayerId, units: usize) -> Result<LayerId> {
        self.graph
            .add_layer(LayerKind::Dense(DenseCfg { units }), &[parent], None)
    }

    pub fn activation(&mut self, parent: LayerId, act: Activation) -> Result<LayerId> {
        self.graph
            .add_layer(LayerKind::Activation(act), &[parent], None)
    }

    pub fn relu(&mut self, parent: LayerId) -> Result<LayerId> {
        self.activation(parent, Activation::ReLU)
    }

    pub fn sigmoid(&mut self, parent: LayerId) -> Result<LayerId> {
        self.activation(parent, Activation::Sigmoid)
    }

    pub fn tanh(&mut self, parent: LayerId) -> Result<LayerId> {
        self.activation(parent, Activation::Tanh)
    }

    pub fn softmax(&mut self, parent: LayerId) -> Result<LayerId> {
        self.activation(parent, Activation::Softmax)
    }

    pub fn conv2d(
        &mut self,
        parent: LayerId,
        filters: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: Padding,
    ) -> Result<LayerId> {
        self.graph.add_layer(
            LayerKind::Conv2d(Conv2dCfg {
                filters,
                kernel,
                stride,
                padding,
            }),
            &[parent],
            None,
        )
    }

    pub fn max_pool2d(
        &mut self,
        parent: LayerId,
        kernel: (usize, usize),
        stride: (usize, usize),
    ) -> Result<LayerId> {
        self.graph.add_layer(
            LayerKind::Pool2d(Pool2dCfg::new(PoolKind::Max, kernel, stride)),
            &[parent],
            None,
        )
    }

    pub fn avg_pool2d(
        &mut self,
        parent: LayerId,
        kernel: (usize, usize),
        stride: (usize, usize),
    ) -> Result<LayerId> {
        self.graph.add_layer(
            LayerKind::Pool2d(Pool2dCfg::new(PoolKind::Avg, kernel, stride)),
            &[parent],
            None,
        )
    }

    /// A vanilla RNN cell; the net unrolls it over the sequence.
    pub fn rnn(&mut self, parent: LayerId, units: usize) -> Result<LayerId> {
        self.graph
            .add_layer(LayerKind::Rnn(RnnCfg { units }), &[parent], None)
    }

    /// An LSTM cell; the net unrolls it over the sequence.
    pub fn lstm(&mut self, parent: LayerId, units: usize) -> Result<LayerId> {
        self.graph.add_layer(
            LayerKind::Lstm(LstmCfg::new(units, 1, Device::Cpu)),
            &[parent],
            None,
        )
    }

    pub fn add(&mut self, a: LayerId, b: LayerId) -> Result<LayerId> {
        self.operator(OperatorKind::Add, &[a, b])
    }

    pub fn sub(&mut self, a: LayerId, b: LayerId) -> Result<LayerId> {
        self.operator(OperatorKind::Sub, &[a, b])
    }

    pub fn mult(&mut self, a: LayerId, b: LayerId) -> Result<LayerId> {
        self.operator(OperatorKind::Mult, &[a, b])
    }

    pub fn div(&mut self, a: LayerId, b: LayerId) -> Result<LayerId> {
        self.operator(OperatorKind::Div, &[a, b])
    }

    pub fn abs(&mut self, x: LayerId) -> Result<LayerId> {
        self.operator(OperatorKind::Abs, &[x])
    }

    pub fn exp(&mut self, x: LayerId) -> Result<LayerId> {
        self.operator(OperatorKind::Exp, &[x])
    }

    pub fn log(&mut self, x: LayerId) -> Result<LayerId> {
        self.operator(OperatorKind::Log, &[x])
    }

    fn operator(&mut self, op: OperatorKind, parents: &[LayerId]) -> Result<LayerId> {
        self.graph.add_layer(LayerKind::Operator(op), parents, None)
    }

    pub fn reduce_sum(&mut self, parent: LayerId, axis: usize) -> Result<LayerId> {
        self.graph.add_layer(
            LayerKind::Reduce(ReduceCfg {
                kind: ReduceKind::Sum,
                axis,
            }),
            &[parent],
            None,
        )
    }

    pub fn reduce_mean(&mut self, parent: LayerId, axis: usize) -> Result<LayerId> {
        self.graph.add_layer(
            LayerKind::Reduce(ReduceCfg {
                kind: ReduceKind::Mean,
                axis,
            }),
            &[parent],
            None,
        )
    }

    pub fn concat(&mut self, parents: &[LayerId], axis: usize) -> Result<LayerId> {
        self.graph
            .add_layer(LayerKind::Merge(MergeKind::Concat { axis }), parents, None)
    }

    pub fn merge_add(&mut self, parents: &[LayerId]) -> Result<LayerId> {
        self.graph
            .add_layer(LayerKind::Merge(MergeKind::Add), parents, None)
    }

    /// Direct access for custom layer wiring.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Finish the graph into a model.
    pub fn model(self, inputs: &[LayerId], outputs: &[LayerId], name: &str) -> Result<Net> {
        Net::model(self.graph, inputs, outputs, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_input_is_rejected() {
        let mut m = ModelBuilder::new();
        let x = m.input(&[4]);
        let stray = m.input(&[4]);
        let d = m.dense(x, 2).unwrap();
        let err = m.model(&[stray], &[d], "broken");
        assert!(err.is_err());
    }

    #[test]
    fn branch_and_merge_builds_a_dag() {
        let mut m = ModelBuilder::new();
        let x = m.input(&[4]);
        let a = m.dense(x, 3).unwrap();
        let b = m.dense(x, 3).unwrap();
        let merged = m.merge_add(&[a, b]).unwrap();
        let out = m.relu(merged).unwrap();
        let net = m.model(&[x], &[out], "dag").unwrap();
        assert_eq!(net.graph.layer(merged).parents.len(), 2);
        assert_eq!(net.graph.layer(out).output.dims(), &[1, 3]);
    }
}
