// Net — the model: a master layer graph plus its training machinery.
//
// The master graph is the reference copy: topology, names, and the
// parameters used for introspection and serialization. Training happens
// on the replica sub-nets (`snets`), one per compute unit declared by
// the CompServ, each a deep clone with its own optimizer instance.
// Replicas never share mutable memory during a step; `sync_weights`
// (average + broadcast, every `lsb` batches) is the only cross-replica
// mutation and runs strictly between steps.

use stoat_core::{bail, Error, Result};
use stoat_nn::{Graph, LayerId, Loss, Metric, Mode, Optimizer};

use crate::compserv::CompServ;
use crate::unroll::UnrollState;

/// One data-parallel replica: a full graph clone bound to a device,
/// its own optimizer, and per-output (loss, metric) accumulators.
#[derive(Debug, Clone)]
pub struct SubNet {
    pub graph: Graph,
    pub optimizer: Optimizer,
    pub fiterr: Vec<(f64, f64)>,
}

/// A buildable, trainable network over a layer graph.
#[derive(Debug, Clone)]
pub struct Net {
    pub name: String,
    /// Master graph: reference copy for introspection, serialization,
    /// and weight synchronization.
    pub graph: Graph,
    /// Declared input layers, in declaration order.
    pub lin: Vec<LayerId>,
    /// Declared output layers, in declaration order.
    pub lout: Vec<LayerId>,
    pub(crate) snets: Vec<SubNet>,
    pub(crate) losses: Vec<Loss>,
    pub(crate) metrics: Vec<Metric>,
    pub(crate) cs: Option<CompServ>,
    pub(crate) opt_template: Option<Optimizer>,
    pub(crate) batch_size: usize,
    /// Per-replica shard sizes for the current batch size.
    pub(crate) shard: Vec<usize>,
    pub(crate) tr_batches: u64,
    pub(crate) total_loss: Vec<f64>,
    pub(crate) total_metric: Vec<f64>,
    pub(crate) inferenced_samples: usize,
    /// The declared graph contains recurrent layers; execution delegates
    /// to the unrolled net.
    pub(crate) recurrent: bool,
    pub(crate) unroll: Option<UnrollState>,
    /// Consecutive per-step output copies per declared output (1 for
    /// non-unrolled nets).
    pub(crate) dec_group: usize,
    /// Per-step decoder input layers (unrolled decoder nets only).
    pub(crate) din: Vec<LayerId>,
}

impl Net {
    /// Create a model from a graph and its declared inputs/outputs.
    ///
    /// Walks the graph backwards from every output and validates that
    /// each declared input reaches at least one output.
    pub fn model(
        graph: Graph,
        inputs: &[LayerId],
        outputs: &[LayerId],
        name: &str,
    ) -> Result<Net> {
        if inputs.is_empty() || outputs.is_empty() {
            bail!("model {name}: at least one input and one output layer required");
        }
        for id in inputs.iter().chain(outputs) {
            if id.0 >= graph.len() {
                bail!("model {name}: layer id {} not in graph", id.0);
            }
        }
        let reachable = graph.ancestors_of(outputs);
        for &id in inputs {
            if !reachable[id.0] {
                bail!(
                    "model {name}: input layer {} not connected to any output",
                    graph.layer(id).name
                );
            }
        }
        let recurrent = graph.has_recurrent();
        Ok(Net {
            name: name.to_string(),
            graph,
            lin: inputs.to_vec(),
            lout: outputs.to_vec(),
            snets: Vec::new(),
            losses: Vec::new(),
            metrics: Vec::new(),
            cs: None,
            opt_template: None,
            batch_size: 0,
            shard: Vec::new(),
            tr_batches: 0,
            total_loss: Vec::new(),
            total_metric: Vec::new(),
            inferenced_samples: 0,
            recurrent,
            unroll: None,
            dec_group: 1,
            din: Vec::new(),
        })
    }

    /// Bind optimizer, losses, metrics, and the compute service; create
    /// the replica sub-nets.
    ///
    /// A single loss/metric broadcasts over all outputs; otherwise the
    /// counts must match the number of declared outputs.
    pub fn build(
        &mut self,
        optimizer: Optimizer,
        losses: &[Loss],
        metrics: &[Metric],
        cs: CompServ,
    ) -> Result<()> {
        self.losses = broadcast("losses", losses, self.lout.len())?;
        self.metrics = broadcast("metrics", metrics, self.lout.len())?;
        self.total_loss = vec![0.0; self.lout.len()];
        self.total_metric = vec![0.0; self.lout.len()];
        self.opt_template = Some(optimizer);
        self.cs = Some(cs);
        // Recurrent nets execute through the unrolled net, which builds
        // its own replicas once the sequence length is known.
        if !self.recurrent {
            self.create_replicas();
        }
        Ok(())
    }

    pub(crate) fn create_replicas(&mut self) {
        let cs = self.cs.as_ref().expect("build binds the compute service");
        let opt = self
            .opt_template
            .as_ref()
            .expect("build binds the optimizer");
        self.snets = cs
            .devices()
            .iter()
            .map(|&dev| {
                let mut graph = self.graph.clone_to_device(dev);
                for &out in &self.lout {
                    graph.ensure_target(out);
                }
                SubNet {
                    graph,
                    optimizer: opt.replicate(),
                    fiterr: vec![(0.0, 0.0); self.lout.len()],
                }
            })
            .collect();
    }

    pub fn is_built(&self) -> bool {
        self.opt_template.is_some()
    }

    pub fn replica_count(&self) -> usize {
        self.snets.len()
    }

    /// Replicas created at build time (empty before build, and on
    /// recurrent masters, whose unrolled net holds the replicas).
    pub fn subnets(&self) -> &[SubNet] {
        &self.snets
    }

    /// Mutable replica access (weight surgery, tests).
    pub fn subnets_mut(&mut self) -> &mut [SubNet] {
        &mut self.snets
    }

    /// The unrolled net, if this net is recurrent and has executed.
    pub fn unrolled(&self) -> Option<&Net> {
        self.unroll.as_ref().map(|u| u.rnet.as_ref())
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Completed training batches.
    pub fn trained_batches(&self) -> u64 {
        self.tr_batches
    }

    // Batch partitioning

    /// Contiguous shard sizes: floor division, last shard absorbs the
    /// remainder. Every shard is non-empty when `batch >= replicas`.
    pub fn shard_sizes(batch: usize, replicas: usize) -> Vec<usize> {
        let base = batch / replicas;
        let mut sizes = vec![base; replicas];
        sizes[replicas - 1] = batch - base * (replicas - 1);
        sizes
    }

    /// Resize every replica (and the master) to a new batch size,
    /// repartitioning the batch across replicas.
    pub fn resize(&mut self, batch: usize) -> Result<()> {
        if !self.is_built() {
            return Err(Error::NotBuilt);
        }
        let r = self.snets.len().max(1);
        if batch < r {
            return Err(Error::BatchTooSmall {
                batch,
                replicas: r,
            });
        }
        if batch == self.batch_size {
            return Ok(());
        }
        self.batch_size = batch;
        self.graph.resize(batch);
        self.shard = Net::shard_sizes(batch, r);
        for (sn, &size) in self.snets.iter_mut().zip(&self.shard) {
            sn.graph.resize(size);
        }
        Ok(())
    }

    /// Set train/eval mode uniformly on all replicas.
    pub fn set_mode(&mut self, mode: Mode) {
        self.graph.set_mode(mode);
        for sn in &mut self.snets {
            sn.graph.set_mode(mode);
        }
    }

    // Weight synchronization

    /// Average each parameter tensor across replicas into the master and
    /// broadcast the result back, leaving all replicas bit-identical.
    /// Runs strictly between steps.
    pub fn sync_weights(&mut self) -> Result<()> {
        if self.snets.is_empty() {
            return Ok(());
        }
        if self.snets.len() == 1 {
            return self.graph.copy_params_from(&self.snets[0].graph);
        }
        let r = self.snets.len() as f32;
        for p in 0..self.graph.params.len() {
            let mut acc = self.snets[0].graph.params[p].clone();
            for sn in &self.snets[1..] {
                acc.accumulate(&sn.graph.params[p])?;
            }
            acc.scale_(1.0 / r);
            self.graph.params[p].copy_from(&acc)?;
        }
        for sn in &mut self.snets {
            sn.graph.copy_params_from(&self.graph)?;
        }
        Ok(())
    }

    /// Pull the trained parameters back into the master graph (averaging
    /// across replicas when there are several).
    pub fn collect_params(&mut self) -> Result<()> {
        if self.recurrent {
            if let Some(mut u) = self.unroll.take() {
                u.rnet.collect_params()?;
                self.graph.copy_params_from(&u.rnet.graph)?;
                self.unroll = Some(u);
            }
            return Ok(());
        }
        self.sync_weights()
    }

    /// Push the master parameters out to every replica (after a
    /// checkpoint load or manual edit).
    pub fn broadcast_params(&mut self) -> Result<()> {
        for sn in &mut self.snets {
            sn.graph.copy_params_from(&self.graph)?;
        }
        if let Some(u) = self.unroll.as_mut() {
            u.rnet.graph.copy_params_from(&self.graph)?;
            u.rnet.broadcast_params()?;
        }
        Ok(())
    }

    // Loss accounting

    /// Zero the loss/metric accumulators (start of an epoch or eval run).
    pub fn reset_loss(&mut self) {
        if let Some(u) = self.unroll.as_mut() {
            u.rnet.reset_loss();
        }
        for v in self
            .total_loss
            .iter_mut()
            .chain(self.total_metric.iter_mut())
        {
            *v = 0.0;
        }
        self.inferenced_samples = 0;
        for sn in &mut self.snets {
            for e in &mut sn.fiterr {
                *e = (0.0, 0.0);
            }
        }
    }

    /// Fold per-replica fiterr accumulators into the net totals.
    pub(crate) fn aggregate_loss(&mut self) {
        for sn in &mut self.snets {
            for (j, e) in sn.fiterr.iter_mut().enumerate() {
                self.total_loss[j] += e.0;
                self.total_metric[j] += e.1;
                *e = (0.0, 0.0);
            }
        }
    }

    /// Average accumulated loss/metric for one output group.
    pub(crate) fn group_averages(&self, k: usize) -> (f64, f64) {
        let len = self.dec_group;
        let n = (len * self.inferenced_samples.max(1)) as f64;
        let loss: f64 = self.total_loss[k..k + len].iter().sum();
        let metric: f64 = self.total_metric[k..k + len].iter().sum();
        (loss / n, metric / n)
    }

    /// Look up an accumulated average by output layer name and loss or
    /// metric name. An empty layer name matches every output group (the
    /// last match wins, mirroring "default to the last output layer").
    pub fn get_metric(&self, layer_name: &str, metric_name: &str) -> Result<f32> {
        if self.recurrent {
            return match self.unrolled() {
                Some(rnet) => rnet.get_metric(layer_name, metric_name),
                None => Err(Error::msg(
                    "get_metric: recurrent net has not executed yet",
                )),
            };
        }
        let mut value: Option<f64> = None;
        for k in (0..self.lout.len()).step_by(self.dec_group) {
            let lname = &self.graph.layer(self.lout[k]).name;
            if !layer_name.is_empty() && layer_name != lname {
                continue;
            }
            let (loss, metric) = self.group_averages(k);
            if self.losses[k].name() == metric_name {
                value = Some(loss);
            } else if self.metrics[k].name() == metric_name {
                value = Some(metric);
            }
        }
        value
            .map(|v| v as f32)
            .ok_or_else(|| Error::UnknownLayer(format!("{layer_name}/{metric_name}")))
    }
}

fn broadcast<T: Clone>(what: &'static str, items: &[T], outputs: usize) -> Result<Vec<T>> {
    match items.len() {
        1 => Ok(vec![items[0].clone(); outputs]),
        n if n == outputs => Ok(items.to_vec()),
        got => Err(Error::TensorCountMismatch {
            what,
            expected: outputs,
            got,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_sizes_partition_exactly() {
        for batch in 1..40usize {
            for r in 1..=batch.min(8) {
                let sizes = Net::shard_sizes(batch, r);
                assert_eq!(sizes.len(), r);
                assert_eq!(sizes.iter().sum::<usize>(), batch);
                assert!(sizes.iter().all(|&s| s >= 1));
            }
        }
    }

    #[test]
    fn last_shard_absorbs_remainder() {
        assert_eq!(Net::shard_sizes(10, 3), vec![3, 3, 4]);
        assert_eq!(Net::shard_sizes(8, 4), vec![2, 2, 2, 2]);
        assert_eq!(Net::shard_sizes(5, 4), vec![1, 1, 1, 2]);
    }
}
