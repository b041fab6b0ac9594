// Graph — the layer arena.
//
// All layers of a net live in one Vec, addressed by LayerId; parameters
// and their gradients live in two parallel arenas addressed by ParamId.
// Parent/child edges and parameter sharing are indices, never pointers:
// "two layers share a weight" means their param slot lists contain the
// same ParamId.
//
// Creation order is topological by construction — a layer can only name
// already-created layers as parents — so `forward` walks ascending ids
// and `backward` walks descending ids, and the split_at_mut dispatch
// below can always borrow a layer mutably while reading (or mutating)
// its parents in the front part of the slice.

use std::collections::HashMap;

use stoat_core::{bail, Device, Error, Result, Shape, Tensor};

use crate::layers::{self, LayerKind};

/// Index of a layer in a graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub usize);

/// Index of a parameter (and its gradient) in a graph's arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub usize);

/// Train/eval mode, set uniformly on a graph per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Per-graph allocator for deterministic default layer names.
///
/// Owned by the graph so two nets built in the same process never
/// interfere and test runs name layers reproducibly.
#[derive(Debug, Clone, Default)]
pub struct NameAllocator {
    counts: HashMap<&'static str, usize>,
}

impl NameAllocator {
    pub fn fresh(&mut self, prefix: &'static str) -> String {
        let c = self.counts.entry(prefix).or_insert(0);
        *c += 1;
        format!("{prefix}{c}")
    }
}

/// One node of the computation graph.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub device: Device,
    pub kind: LayerKind,
    pub parents: Vec<LayerId>,
    pub children: Vec<LayerId>,
    /// Owned activation, recomputed in place every forward.
    pub output: Tensor,
    /// Gradient w.r.t. `output`, accumulated by the children's backward.
    pub delta: Tensor,
    /// Present on output layers once a loss has been bound.
    pub target: Option<Tensor>,
    /// Parameter slots in the graph's arenas (shared slots mean shared
    /// weights).
    pub params: Vec<ParamId>,
}

/// The arena holding a whole network's layers and parameters.
#[derive(Debug, Clone)]
pub struct Graph {
    pub layers: Vec<Layer>,
    pub params: Vec<Tensor>,
    pub grads: Vec<Tensor>,
    pub names: NameAllocator,
    pub device: Device,
    pub batch: usize,
    pub mode: Mode,
}

impl Graph {
    pub fn new(device: Device) -> Self {
        Graph {
            layers: Vec::new(),
            params: Vec::new(),
            grads: Vec::new(),
            names: NameAllocator::default(),
            device,
            batch: 1,
            mode: Mode::Train,
        }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer(&self, id: LayerId) -> &Layer {
        &self.layers[id.0]
    }

    pub fn layer_mut(&mut self, id: LayerId) -> &mut Layer {
        &mut self.layers[id.0]
    }

    pub fn find(&self, name: &str) -> Option<LayerId> {
        self.layers.iter().position(|l| l.name == name).map(LayerId)
    }

    pub fn has_recurrent(&self) -> bool {
        self.layers.iter().any(|l| l.kind.is_recurrent())
    }

    // Construction

    /// Declare an input layer. `feature_shape` excludes the batch
    /// dimension; the batch starts at 1 and follows `resize`.
    pub fn add_input(&mut self, feature_shape: &[usize], decoder: bool, name: Option<&str>) -> LayerId {
        let mut dims = vec![1];
        dims.extend_from_slice(feature_shape);
        let kind = LayerKind::Input { decoder };
        let name = match name {
            Some(n) => n.to_string(),
            None => self.names.fresh(kind.prefix()),
        };
        let output = Tensor::zeros(dims.clone(), self.device);
        let delta = Tensor::zeros(dims, self.device);
        let id = LayerId(self.layers.len());
        self.layers.push(Layer {
            name,
            device: self.device,
            kind,
            parents: Vec::new(),
            children: Vec::new(),
            output,
            delta,
            target: None,
            params: Vec::new(),
        });
        id
    }

    /// Create a layer with freshly initialized parameters.
    pub fn add_layer(
        &mut self,
        kind: LayerKind,
        parents: &[LayerId],
        name: Option<&str>,
    ) -> Result<LayerId> {
        let parent_shapes = self.parent_shapes(parents)?;
        let refs: Vec<&Shape> = parent_shapes.iter().collect();
        // Arity/rank validation happens before any parameter is allocated.
        kind.infer_shape(&refs)?;
        let params = kind.init_params(&refs, self.device);
        let slots: Vec<ParamId> = params
            .into_iter()
            .map(|p| {
                let id = ParamId(self.params.len());
                self.grads.push(Tensor::zeros(p.dims().to_vec(), p.device()));
                self.params.push(p);
                id
            })
            .collect();
        self.push_node(kind, parents, slots, name)
    }

    /// Create a layer bound to existing parameter slots (weight sharing;
    /// the recurrent unroller uses this for every per-step copy).
    pub fn add_shared_layer(
        &mut self,
        kind: LayerKind,
        parents: &[LayerId],
        params: Vec<ParamId>,
        name: Option<&str>,
    ) -> Result<LayerId> {
        for p in &params {
            if p.0 >= self.params.len() {
                bail!("shared layer references unknown parameter slot {}", p.0);
            }
        }
        self.push_node(kind, parents, params, name)
    }

    fn push_node(
        &mut self,
        mut kind: LayerKind,
        parents: &[LayerId],
        params: Vec<ParamId>,
        name: Option<&str>,
    ) -> Result<LayerId> {
        let parent_shapes = self.parent_shapes(parents)?;
        let refs: Vec<&Shape> = parent_shapes.iter().collect();
        let shape = kind.infer_shape(&refs)?;
        kind.resize_aux(&shape);
        let name = match name {
            Some(n) => n.to_string(),
            None => self.names.fresh(kind.prefix()),
        };
        let id = LayerId(self.layers.len());
        for p in parents {
            self.layers[p.0].children.push(id);
        }
        self.layers.push(Layer {
            name,
            device: self.device,
            kind,
            parents: parents.to_vec(),
            children: Vec::new(),
            output: Tensor::zeros(shape.dims().to_vec(), self.device),
            delta: Tensor::zeros(shape.dims().to_vec(), self.device),
            target: None,
            params,
        });
        Ok(id)
    }

    fn parent_shapes(&self, parents: &[LayerId]) -> Result<Vec<Shape>> {
        parents
            .iter()
            .map(|p| {
                self.layers
                    .get(p.0)
                    .map(|l| l.output.shape().clone())
                    .ok_or_else(|| Error::msg(format!("unknown parent layer id {}", p.0)))
            })
            .collect()
    }

    // Edge mutation

    /// Wire an extra parent→child edge (decoder inference feed). The
    /// child must come after the parent in the arena so the forward
    /// order stays valid.
    pub fn add_child_edge(&mut self, parent: LayerId, child: LayerId) -> Result<()> {
        if parent.0 >= child.0 {
            bail!(
                "edge {} -> {} would break topological order",
                parent.0,
                child.0
            );
        }
        if !self.layers[parent.0].children.contains(&child) {
            self.layers[parent.0].children.push(child);
            self.layers[child.0].parents.push(parent);
        }
        Ok(())
    }

    /// Remove a parent→child edge so no gradient (or forward value)
    /// flows across it anymore.
    pub fn detach(&mut self, parent: LayerId, child: LayerId) {
        self.layers[parent.0].children.retain(|&c| c != child);
        self.layers[child.0].parents.retain(|&p| p != parent);
    }

    // Reachability

    /// Mark every ancestor of the seed layers (seeds included).
    pub fn ancestors_of(&self, seeds: &[LayerId]) -> Vec<bool> {
        let mut mark = vec![false; self.layers.len()];
        let mut stack: Vec<LayerId> = seeds.to_vec();
        while let Some(id) = stack.pop() {
            if mark[id.0] {
                continue;
            }
            mark[id.0] = true;
            stack.extend(self.layers[id.0].parents.iter().copied());
        }
        mark
    }

    /// Mark every descendant of the seed layers (seeds included).
    pub fn descendants_of(&self, seeds: &[LayerId]) -> Vec<bool> {
        let mut mark = vec![false; self.layers.len()];
        let mut stack: Vec<LayerId> = seeds.to_vec();
        while let Some(id) = stack.pop() {
            if mark[id.0] {
                continue;
            }
            mark[id.0] = true;
            stack.extend(self.layers[id.0].children.iter().copied());
        }
        mark
    }

    // Step lifecycle

    /// Reallocate every layer's batch-sized tensors (output, delta,
    /// target, kind-held buffers) to a new batch. Parameters untouched;
    /// idempotent for a fixed batch.
    pub fn resize(&mut self, batch: usize) {
        self.batch = batch;
        for layer in &mut self.layers {
            layer.output.resize_batch(batch);
            layer.delta.resize_batch(batch);
            if let Some(t) = layer.target.as_mut() {
                t.resize_batch(batch);
            }
            let shape = layer.output.shape().clone();
            layer.kind.resize_aux(&shape);
        }
    }

    /// Zero all deltas and auxiliary gradient buffers (start of a step).
    pub fn reset(&mut self) {
        for layer in &mut self.layers {
            layer.delta.zero_();
            layer.kind.reset_aux();
        }
    }

    /// Zero the gradient arena. The net calls this at the start of every
    /// step; optimizers never clear gradients themselves.
    pub fn reset_grads(&mut self) {
        for g in &mut self.grads {
            g.zero_();
        }
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Allocate the target tensor of an output layer if absent.
    pub fn ensure_target(&mut self, id: LayerId) {
        let layer = &mut self.layers[id.0];
        if layer.target.is_none() {
            layer.target = Some(Tensor::zeros(
                layer.output.dims().to_vec(),
                layer.device,
            ));
        }
    }

    // Replica plumbing

    /// Deep copy of the whole graph bound to another device.
    pub fn clone_to_device(&self, device: Device) -> Graph {
        let mut g = self.clone();
        g.device = device;
        for layer in &mut g.layers {
            layer.device = device;
            layer.output.set_device(device);
            layer.delta.set_device(device);
            if let Some(t) = layer.target.as_mut() {
                t.set_device(device);
            }
            if let LayerKind::Lstm(c) = &mut layer.kind {
                c.cache.gates.set_device(device);
                c.cache.c.set_device(device);
                c.cache.tanh_c.set_device(device);
                c.cache.delta_c.set_device(device);
            }
        }
        for t in g.params.iter_mut().chain(g.grads.iter_mut()) {
            t.set_device(device);
        }
        g
    }

    /// Overwrite this graph's parameters with `src`'s (same arena layout).
    pub fn copy_params_from(&mut self, src: &Graph) -> Result<()> {
        if self.params.len() != src.params.len() {
            bail!(
                "parameter arenas differ: {} vs {}",
                self.params.len(),
                src.params.len()
            );
        }
        for (dst, s) in self.params.iter_mut().zip(&src.params) {
            dst.copy_from(s)?;
        }
        Ok(())
    }

    // Execution

    /// Run every layer's forward in topological (arena) order.
    pub fn forward(&mut self) -> Result<()> {
        for idx in 0..self.layers.len() {
            self.forward_layer(idx)?;
        }
        Ok(())
    }

    /// Run every layer's backward in reverse topological order. Output
    /// deltas must have been written by the losses beforehand.
    pub fn backward(&mut self) -> Result<()> {
        for idx in (0..self.layers.len()).rev() {
            self.backward_layer(idx)?;
        }
        Ok(())
    }

    fn forward_layer(&mut self, idx: usize) -> Result<()> {
        let Graph { layers, params, .. } = self;
        let (front, rest) = layers.split_at_mut(idx);
        let layer = &mut rest[0];
        let parents = layer.parents.clone();
        let slots = layer.params.clone();

        match &mut layer.kind {
            LayerKind::Input { .. } => {
                // A wired parent (decoder inference feed) overrides the
                // externally fed value.
                if let Some(&p) = parents.first() {
                    layer.output.copy_from(&front[p.0].output)?;
                }
                Ok(())
            }
            LayerKind::Dense(_) => {
                let x = &front[parents[0].0].output;
                layers::dense::forward(x, &params[slots[0].0], &params[slots[1].0], &mut layer.output)
            }
            LayerKind::Activation(a) => {
                let x = &front[parents[0].0].output;
                layers::activation::forward(*a, x, &mut layer.output)
            }
            LayerKind::Conv2d(cfg) => {
                let x = &front[parents[0].0].output;
                layers::conv::forward(cfg, x, &params[slots[0].0], &params[slots[1].0], &mut layer.output)
            }
            LayerKind::Pool2d(cfg) => {
                let x = &front[parents[0].0].output;
                layers::pool::forward(cfg, x, &mut layer.output)
            }
            LayerKind::Rnn(_) => {
                let x = &front[parents[0].0].output;
                let h_prev = parents.get(1).map(|p| &front[p.0].output);
                layers::recurrent::rnn_forward(
                    x,
                    h_prev,
                    &params[slots[0].0],
                    &params[slots[1].0],
                    &params[slots[2].0],
                    &mut layer.output,
                )
            }
            LayerKind::Lstm(cfg) => {
                let x = &front[parents[0].0].output;
                let prev = match parents.get(1) {
                    Some(p) => {
                        let prev_layer = &front[p.0];
                        let LayerKind::Lstm(pc) = &prev_layer.kind else {
                            bail!("lstm state parent {} is not an lstm layer", prev_layer.name);
                        };
                        Some((&prev_layer.output, &pc.cache.c))
                    }
                    None => None,
                };
                layers::recurrent::lstm_forward(
                    cfg,
                    x,
                    prev,
                    &params[slots[0].0],
                    &params[slots[1].0],
                    &params[slots[2].0],
                    &mut layer.output,
                )
            }
            LayerKind::Operator(op) => {
                let a = &front[parents[0].0].output;
                let b = parents.get(1).map(|p| &front[p.0].output);
                layers::operator::forward(*op, a, b, &mut layer.output)
            }
            LayerKind::Reduce(cfg) => {
                let x = &front[parents[0].0].output;
                layers::operator::reduce_forward(cfg, x, &mut layer.output)
            }
            LayerKind::Merge(m) => {
                let refs: Vec<&Tensor> = parents.iter().map(|p| &front[p.0].output).collect();
                layers::merge::forward(*m, &refs, &mut layer.output)
            }
        }
    }

    fn backward_layer(&mut self, idx: usize) -> Result<()> {
        let Graph { layers, params, grads, .. } = self;
        let (front, rest) = layers.split_at_mut(idx);
        let layer = &mut rest[0];
        let parents = layer.parents.clone();
        let slots = layer.params.clone();

        match &mut layer.kind {
            // Inputs terminate the walk; a decoder feed edge carries no
            // gradient back into the producing step.
            LayerKind::Input { .. } => Ok(()),
            LayerKind::Dense(_) => {
                let parent = &mut front[parents[0].0];
                let (gw, gb) = two_mut(grads, slots[0].0, slots[1].0);
                layers::dense::backward(
                    &parent.output,
                    &layer.delta,
                    &params[slots[0].0],
                    gw,
                    gb,
                    &mut parent.delta,
                )
            }
            LayerKind::Activation(a) => {
                let parent = &mut front[parents[0].0];
                layers::activation::backward(
                    *a,
                    &parent.output,
                    &layer.output,
                    &layer.delta,
                    &mut parent.delta,
                )
            }
            LayerKind::Conv2d(cfg) => {
                let parent = &mut front[parents[0].0];
                let (gw, gb) = two_mut(grads, slots[0].0, slots[1].0);
                layers::conv::backward(
                    cfg,
                    &parent.output,
                    &layer.delta,
                    &params[slots[0].0],
                    gw,
                    gb,
                    &mut parent.delta,
                )
            }
            LayerKind::Pool2d(cfg) => {
                let parent = &mut front[parents[0].0];
                layers::pool::backward(cfg, &layer.delta, &mut parent.delta)
            }
            LayerKind::Rnn(_) => {
                let (gwx, gwh, gb) = three_mut(grads, slots[0].0, slots[1].0, slots[2].0);
                match parents.get(1) {
                    Some(p1) => {
                        let (px, pprev) = two_mut(front, parents[0].0, p1.0);
                        layers::recurrent::rnn_backward(
                            &px.output,
                            Some(&pprev.output),
                            &layer.output,
                            &layer.delta,
                            &params[slots[0].0],
                            &params[slots[1].0],
                            gwx,
                            gwh,
                            gb,
                            &mut px.delta,
                            Some(&mut pprev.delta),
                        )
                    }
                    None => {
                        let px = &mut front[parents[0].0];
                        layers::recurrent::rnn_backward(
                            &px.output,
                            None,
                            &layer.output,
                            &layer.delta,
                            &params[slots[0].0],
                            &params[slots[1].0],
                            gwx,
                            gwh,
                            gb,
                            &mut px.delta,
                            None,
                        )
                    }
                }
            }
            LayerKind::Lstm(cfg) => {
                let (gwx, gwh, gb) = three_mut(grads, slots[0].0, slots[1].0, slots[2].0);
                match parents.get(1) {
                    Some(p1) => {
                        let (px, pprev) = two_mut(front, parents[0].0, p1.0);
                        let LayerKind::Lstm(pc) = &mut pprev.kind else {
                            bail!("lstm state parent {} is not an lstm layer", pprev.name);
                        };
                        layers::recurrent::lstm_backward(
                            cfg,
                            &px.output,
                            Some((&pprev.output, &pc.cache.c)),
                            &layer.delta,
                            &params[slots[0].0],
                            &params[slots[1].0],
                            gwx,
                            gwh,
                            gb,
                            &mut px.delta,
                            Some((&mut pprev.delta, &mut pc.cache.delta_c)),
                        )
                    }
                    None => {
                        let px = &mut front[parents[0].0];
                        layers::recurrent::lstm_backward(
                            cfg,
                            &px.output,
                            None,
                            &layer.delta,
                            &params[slots[0].0],
                            &params[slots[1].0],
                            gwx,
                            gwh,
                            gb,
                            &mut px.delta,
                            None,
                        )
                    }
                }
            }
            LayerKind::Operator(op) => match parents.get(1) {
                // Both operands come from the same layer (e.g. x*x): route
                // the second contribution through a scratch buffer so the
                // shared delta still receives the sum of both terms.
                Some(p1) if *p1 == parents[0] => {
                    let pa = &mut front[parents[0].0];
                    let x = pa.output.clone();
                    let mut scratch = Tensor::zeros(pa.delta.dims().to_vec(), pa.delta.device());
                    layers::operator::backward(
                        *op,
                        &x,
                        Some(&x),
                        &layer.delta,
                        &layer.output,
                        &mut pa.delta,
                        Some(&mut scratch),
                    )?;
                    pa.delta.accumulate(&scratch)
                }
                Some(p1) => {
                    let (pa, pb) = two_mut(front, parents[0].0, p1.0);
                    layers::operator::backward(
                        *op,
                        &pa.output,
                        Some(&pb.output),
                        &layer.delta,
                        &layer.output,
                        &mut pa.delta,
                        Some(&mut pb.delta),
                    )
                }
                None => {
                    let pa = &mut front[parents[0].0];
                    layers::operator::backward(
                        *op,
                        &pa.output,
                        None,
                        &layer.delta,
                        &layer.output,
                        &mut pa.delta,
                        None,
                    )
                }
            },
            LayerKind::Reduce(cfg) => {
                let parent = &mut front[parents[0].0];
                layers::operator::reduce_backward(cfg, &layer.delta, &mut parent.delta)
            }
            LayerKind::Merge(m) => {
                let dims: Vec<Vec<usize>> = parents
                    .iter()
                    .map(|p| front[p.0].output.dims().to_vec())
                    .collect();
                let dim_refs: Vec<&[usize]> = dims.iter().map(|d| d.as_slice()).collect();
                for (i, p) in parents.iter().enumerate() {
                    let parent = &mut front[p.0];
                    layers::merge::backward_into(*m, &layer.delta, &dim_refs, i, &mut parent.delta)?;
                }
                Ok(())
            }
        }
    }
}

/// Disjoint mutable borrows of two slice elements.
fn two_mut<T>(s: &mut [T], i: usize, j: usize) -> (&mut T, &mut T) {
    assert!(i != j, "two_mut needs distinct indices");
    if i < j {
        let (a, b) = s.split_at_mut(j);
        (&mut a[i], &mut b[0])
    } else {
        let (a, b) = s.split_at_mut(i);
        (&mut b[0], &mut a[j])
    }
}

/// Disjoint mutable borrows of three ascending slice elements.
fn three_mut<T>(s: &mut [T], a: usize, b: usize, c: usize) -> (&mut T, &mut T, &mut T) {
    assert!(a < b && b < c, "three_mut needs ascending indices");
    let (s1, s2) = s.split_at_mut(b);
    let (sb, s3) = s2.split_at_mut(c - b);
    (&mut s1[a], &mut sb[0], &mut s3[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Activation, DenseCfg};

    fn tiny_graph() -> (Graph, LayerId, LayerId, LayerId) {
        let mut g = Graph::new(Device::Cpu);
        let x = g.add_input(&[3], false, None);
        let d = g
            .add_layer(LayerKind::Dense(DenseCfg { units: 2 }), &[x], None)
            .unwrap();
        let a = g
            .add_layer(LayerKind::Activation(Activation::ReLU), &[d], None)
            .unwrap();
        (g, x, d, a)
    }

    #[test]
    fn default_names_are_deterministic_per_graph() {
        let (g, x, d, a) = tiny_graph();
        assert_eq!(g.layer(x).name, "input1");
        assert_eq!(g.layer(d).name, "dense1");
        assert_eq!(g.layer(a).name, "activation1");

        // A second graph starts its own counters.
        let (g2, x2, ..) = tiny_graph();
        assert_eq!(g2.layer(x2).name, "input1");
    }

    #[test]
    fn creation_order_is_topological() {
        let (g, x, d, a) = tiny_graph();
        assert!(x < d && d < a);
        assert_eq!(g.layer(d).parents, vec![x]);
        assert_eq!(g.layer(x).children, vec![d]);
    }

    #[test]
    fn output_shape_is_pure_and_stable_across_forwards() {
        let (mut g, x, _, a) = tiny_graph();
        g.resize(4);
        g.layer_mut(x).output.fill_(1.0);
        g.forward().unwrap();
        let first = g.layer(a).output.clone();
        g.forward().unwrap();
        assert_eq!(g.layer(a).output.shape(), first.shape());
        assert_eq!(g.layer(a).output.data(), first.data());
    }

    #[test]
    fn dense_rejects_non_2d_parent() {
        let mut g = Graph::new(Device::Cpu);
        let x = g.add_input(&[3, 4, 4], false, None);
        let err = g.add_layer(LayerKind::Dense(DenseCfg { units: 2 }), &[x], None);
        assert!(err.is_err());
    }

    #[test]
    fn delta_accumulates_across_two_children() {
        // One input feeding two dense children; after both run backward,
        // the parent delta must be the sum of both contributions.
        let mut g = Graph::new(Device::Cpu);
        let x = g.add_input(&[2], false, None);
        let d1 = g
            .add_layer(LayerKind::Dense(DenseCfg { units: 2 }), &[x], None)
            .unwrap();
        let d2 = g
            .add_layer(LayerKind::Dense(DenseCfg { units: 2 }), &[x], None)
            .unwrap();
        g.resize(1);
        g.layer_mut(x).output.fill_(1.0);
        g.forward().unwrap();
        g.reset();
        g.layer_mut(d1).delta.fill_(1.0);
        g.layer_mut(d2).delta.fill_(1.0);

        // Expected: δ·W1ᵀ + δ·W2ᵀ summed per input unit.
        let w1 = g.params[g.layer(d1).params[0].0].clone();
        let w2 = g.params[g.layer(d2).params[0].0].clone();
        let expect: Vec<f32> = (0..2)
            .map(|i| {
                (0..2)
                    .map(|j| w1.data()[i * 2 + j] + w2.data()[i * 2 + j])
                    .sum()
            })
            .collect();

        g.backward().unwrap();
        for (got, want) in g.layer(x).delta.data().iter().zip(&expect) {
            assert!((got - want).abs() < 1e-5, "got {got}, want {want}");
        }
    }

    #[test]
    fn resize_twice_matches_single_resize() {
        let (mut g, _, d, a) = tiny_graph();
        g.resize(6);
        let shapes: Vec<_> = [d, a]
            .iter()
            .map(|&id| g.layer(id).output.shape().clone())
            .collect();
        g.resize(6);
        for (&id, s) in [d, a].iter().zip(&shapes) {
            assert_eq!(g.layer(id).output.shape(), s);
            assert_eq!(g.layer(id).delta.shape(), s);
        }
    }

    #[test]
    fn detach_removes_both_edge_ends() {
        let (mut g, x, d, _) = tiny_graph();
        g.detach(x, d);
        assert!(g.layer(x).children.is_empty());
        assert!(g.layer(d).parents.is_empty());
    }

    #[test]
    fn shared_layers_reference_same_slots() {
        let mut g = Graph::new(Device::Cpu);
        let x1 = g.add_input(&[3], false, None);
        let x2 = g.add_input(&[3], false, None);
        let d1 = g
            .add_layer(LayerKind::Dense(DenseCfg { units: 2 }), &[x1], None)
            .unwrap();
        let slots = g.layer(d1).params.clone();
        let d2 = g
            .add_shared_layer(
                LayerKind::Dense(DenseCfg { units: 2 }),
                &[x2],
                slots.clone(),
                None,
            )
            .unwrap();
        assert_eq!(g.layer(d2).params, slots);
        // Same number of parameter tensors as before sharing.
        assert_eq!(g.params.len(), 2);
    }
}
