// Training protocol — batch sharding, parallel phases, fit/evaluate/predict.
//
// One training step per replica is: reset deltas → zero grads → forward
// → loss value + delta → backward → local optimizer step. The phases
// run through the pooled runner with a barrier between steps; weight
// synchronization runs every `lsb` completed batches when there is more
// than one replica.
//
// Batch data crosses into replica-private storage exactly once, in the
// sequential gather below: host tensors are read-only while the
// index-selected shards are copied into each replica's input/target
// buffers.

use std::fmt;
use std::time::Instant;

use rand::Rng;

use stoat_core::{bail, Error, Result, Tensor};
use stoat_nn::Mode;

use crate::net::Net;
use crate::runner;

/// Averages for one output layer group.
#[derive(Debug, Clone)]
pub struct OutputLog {
    pub layer: String,
    pub loss_name: &'static str,
    pub loss: f64,
    pub metric_name: &'static str,
    pub metric: f64,
}

impl fmt::Display for OutputLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(loss[{}]={:.4}, metric[{}]={:.4})",
            self.layer, self.loss_name, self.loss, self.metric_name, self.metric
        )
    }
}

/// Log for a single training epoch.
#[derive(Debug, Clone)]
pub struct EpochLog {
    pub epoch: usize,
    pub outputs: Vec<OutputLog>,
}

/// Summary of a full `fit` run.
#[derive(Debug, Clone)]
pub struct FitReport {
    pub epochs: Vec<EpochLog>,
}

impl FitReport {
    /// Average loss of the first output in the final epoch.
    pub fn final_loss(&self) -> f64 {
        self.epochs
            .last()
            .and_then(|e| e.outputs.first())
            .map(|o| o.loss)
            .unwrap_or(0.0)
    }
}

impl fmt::Display for FitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "training complete, {} epochs", self.epochs.len())?;
        for e in &self.epochs {
            write!(f, "  epoch {}:", e.epoch + 1)?;
            for o in &e.outputs {
                write!(f, " {o}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Result of an `evaluate` run.
#[derive(Debug, Clone)]
pub struct EvalReport {
    pub outputs: Vec<OutputLog>,
    pub samples: usize,
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluated {} samples:", self.samples)?;
        for o in &self.outputs {
            write!(f, " {o}")?;
        }
        Ok(())
    }
}

impl Net {
    /// Train on full-batch tensors for `epochs` passes of `n / batch`
    /// randomly sampled batches each.
    pub fn fit(
        &mut self,
        xs: &[Tensor],
        ys: &[Tensor],
        batch: usize,
        epochs: usize,
    ) -> Result<FitReport> {
        if self.recurrent {
            return self.fit_recurrent(xs, ys, batch, epochs);
        }
        if !self.is_built() {
            return Err(Error::NotBuilt);
        }
        let n = self.check_data(xs, ys, true)?;
        self.resize(batch)?;
        self.set_mode(Mode::Train);

        let num_batches = (n / batch).max(1);
        println!(
            "{}: {} epochs of {} batches of size {}",
            self.name, epochs, num_batches, batch
        );

        let mut rng = rand::thread_rng();
        let mut sind = vec![0usize; batch];
        let mut report = FitReport { epochs: Vec::new() };

        for epoch in 0..epochs {
            let started = Instant::now();
            self.reset_loss();
            for _ in 0..num_batches {
                for s in sind.iter_mut() {
                    *s = rng.gen_range(0..n);
                }
                self.batch_step(xs, ys, &sind, true)?;
            }
            let outputs = self.output_logs();
            print!("epoch {}/{}:", epoch + 1, epochs);
            for o in &outputs {
                print!(" {o}");
            }
            println!(" ({:.3}s)", started.elapsed().as_secs_f64());
            report.epochs.push(EpochLog { epoch, outputs });
        }
        self.collect_params()?;
        Ok(report)
    }

    /// Run one training step on the samples selected by `indices`.
    pub fn train_batch(&mut self, xs: &[Tensor], ys: &[Tensor], indices: &[usize]) -> Result<()> {
        if self.recurrent {
            return self.train_batch_recurrent(xs, ys, indices);
        }
        if !self.is_built() {
            return Err(Error::NotBuilt);
        }
        self.check_data(xs, ys, true)?;
        self.batch_step(xs, ys, indices, true)
    }

    /// Compute loss/metric averages over a dataset without training.
    pub fn evaluate(&mut self, xs: &[Tensor], ys: &[Tensor]) -> Result<EvalReport> {
        if self.recurrent {
            return self.evaluate_recurrent(xs, ys);
        }
        if !self.is_built() {
            return Err(Error::NotBuilt);
        }
        let n = self.check_data(xs, ys, true)?;
        let r = self.snets.len().max(1);
        if self.batch_size == 0 {
            self.resize(n)?;
        }
        let batch = self.batch_size;
        self.set_mode(Mode::Eval);
        self.reset_loss();

        let mut start = 0;
        while start < n {
            let end = (start + batch).min(n);
            // A tail smaller than the replica count cannot be sharded.
            if end - start < r {
                break;
            }
            let sind: Vec<usize> = (start..end).collect();
            self.batch_step(xs, ys, &sind, false)?;
            start = end;
        }

        Ok(EvalReport {
            outputs: self.output_logs(),
            samples: self.inferenced_samples,
        })
    }

    /// Forward the given inputs and return one full-batch output tensor
    /// per declared output layer.
    pub fn predict(&mut self, xs: &[Tensor]) -> Result<Vec<Tensor>> {
        if self.recurrent {
            return self.predict_recurrent(xs);
        }
        if !self.is_built() {
            return Err(Error::NotBuilt);
        }
        let n = self.check_data(xs, &[], false)?;
        self.resize(n)?;
        self.set_mode(Mode::Eval);
        let sind: Vec<usize> = (0..n).collect();
        self.batch_step(xs, &[], &sind, false)?;
        self.collect_outputs()
    }

    /// Concatenate replica shard outputs into full-batch tensors.
    pub(crate) fn collect_outputs(&self) -> Result<Vec<Tensor>> {
        let mut outs = Vec::with_capacity(self.lout.len());
        for &out_id in &self.lout {
            let master = &self.graph.layer(out_id).output;
            let mut full = Tensor::zeros(master.dims().to_vec(), master.device());
            let mut offset = 0;
            for sn in &self.snets {
                let shard = &sn.graph.layer(out_id).output;
                full.copy_rows_from(shard, offset)?;
                offset += shard.batch();
            }
            outs.push(full);
        }
        Ok(outs)
    }

    /// One synchronized step over all replicas: shard gather, parallel
    /// forward (+ loss, backward, update when training), periodic sync.
    pub(crate) fn batch_step(
        &mut self,
        xs: &[Tensor],
        ys: &[Tensor],
        sind: &[usize],
        train: bool,
    ) -> Result<()> {
        if sind.is_empty() {
            bail!("train_batch: empty sample index list");
        }
        let with_loss = !ys.is_empty();
        self.resize(sind.len())?;
        self.set_mode(if train { Mode::Train } else { Mode::Eval });

        let lsb = self.cs.as_ref().map(|c| c.lsb).unwrap_or(1);
        let dec_steps = self.din.len();

        // Sequential shard gather: the only host-to-replica data copy.
        {
            let Net {
                snets,
                lin,
                lout,
                din,
                shard,
                ..
            } = self;
            let mut start = 0;
            for (sn, &size) in snets.iter_mut().zip(shard.iter()) {
                let idx = &sind[start..start + size];
                for (j, x) in xs.iter().enumerate() {
                    Tensor::select_rows_into(x, &mut sn.graph.layer_mut(lin[j]).output, idx)?;
                }
                if with_loss {
                    for (j, y) in ys.iter().enumerate() {
                        sn.graph.ensure_target(lout[j]);
                        let layer = sn.graph.layer_mut(lout[j]);
                        if let Some(target) = layer.target.as_mut() {
                            Tensor::select_rows_into(y, target, idx)?;
                        }
                    }
                }
                // Decoder feed: step 0 starts from zero state; later
                // steps see the previous step's ground truth when
                // training, or get wired to the previous step's
                // prediction for inference.
                if dec_steps > 0 {
                    sn.graph.layer_mut(din[0]).output.zero_();
                    for t in 1..dec_steps {
                        if train {
                            let prev = sn.graph.layer(lout[t - 1]).target.clone().ok_or_else(
                                || Error::msg("decoder training requires targets"),
                            )?;
                            sn.graph.layer_mut(din[t]).output.copy_from(&prev)?;
                        } else {
                            sn.graph.add_child_edge(lout[t - 1], din[t])?;
                        }
                    }
                }
                start += size;
            }
        }

        // Parallel phases with a join-all barrier.
        {
            let Net {
                snets,
                lout,
                losses,
                metrics,
                ..
            } = self;
            runner::for_each_replica(snets, |sn| {
                sn.graph.reset();
                sn.graph.reset_grads();
                sn.graph.forward()?;
                if with_loss {
                    for (j, &out_id) in lout.iter().enumerate() {
                        let (lv, mv) = {
                            let layer = sn.graph.layer_mut(out_id);
                            let target = layer.target.as_ref().ok_or_else(|| {
                                Error::msg("output layer has no target bound")
                            })?;
                            if train {
                                losses[j].delta(&layer.output, target, &mut layer.delta)?;
                            }
                            (
                                losses[j].value(&layer.output, target)?,
                                metrics[j].value(&layer.output, target)?,
                            )
                        };
                        sn.fiterr[j].0 += lv;
                        sn.fiterr[j].1 += mv;
                    }
                }
                if train {
                    sn.graph.backward()?;
                    sn.optimizer.step(&mut sn.graph.params, &sn.graph.grads)?;
                }
                Ok(())
            })?;
        }

        // Unwire the inference decoder feed before the next step.
        if dec_steps > 0 && !train {
            let Net {
                snets, lout, din, ..
            } = self;
            for sn in snets.iter_mut() {
                for t in 1..dec_steps {
                    sn.graph.detach(lout[t - 1], din[t]);
                }
            }
        }

        if train {
            self.tr_batches += 1;
            if self.snets.len() > 1 && self.tr_batches % lsb == 0 {
                self.sync_weights()?;
            }
        }
        if with_loss {
            self.aggregate_loss();
            self.inferenced_samples += sind.len();
        }
        Ok(())
    }

    /// Validate tensor counts against the declared layers and return the
    /// common sample count.
    pub(crate) fn check_data(
        &self,
        xs: &[Tensor],
        ys: &[Tensor],
        require_targets: bool,
    ) -> Result<usize> {
        if xs.len() != self.lin.len() {
            return Err(Error::TensorCountMismatch {
                what: "input tensor list does not match the declared input layers",
                expected: self.lin.len(),
                got: xs.len(),
            });
        }
        if require_targets && ys.len() != self.lout.len() {
            return Err(Error::TensorCountMismatch {
                what: "target tensor list does not match the declared output layers",
                expected: self.lout.len(),
                got: ys.len(),
            });
        }
        let n = xs
            .first()
            .map(|x| x.batch())
            .ok_or_else(|| Error::msg("no input tensors supplied"))?;
        for t in xs.iter().chain(ys) {
            if t.batch() != n {
                bail!(
                    "different number of samples across tensors: {} vs {n}",
                    t.batch()
                );
            }
        }
        Ok(n)
    }

    /// Current averaged logs, one per output group.
    pub(crate) fn output_logs(&self) -> Vec<OutputLog> {
        if self.recurrent {
            return self
                .unrolled()
                .map(|r| r.output_logs())
                .unwrap_or_default();
        }
        (0..self.lout.len())
            .step_by(self.dec_group)
            .map(|k| {
                let (loss, metric) = self.group_averages(k);
                OutputLog {
                    layer: self.graph.layer(self.lout[k]).name.clone(),
                    loss_name: self.losses[k].name(),
                    loss,
                    metric_name: self.metrics[k].name(),
                    metric,
                }
            })
            .collect()
    }
}
