// Recurrent unrolling — per-timestep expansion of a recurrent graph.
//
// A net whose declared graph contains recurrent cells never executes
// that graph directly. On first use it builds an unrolled net (`rnet`):
// one arena graph holding T shared-parameter copies of the temporal
// sub-graph, wired step to step, plus single copies of the static parts.
// fit/train_batch/evaluate/predict then delegate to the unrolled net,
// and trained parameters synchronize back into the declaring master.
//
// Layer classification against the declared graph:
//   per-step   — ancestors of a recurrent cell (the cells included) and
//                descendants of a decoder input: copied once per step.
//   static-pre — feeds per-step layers but is not itself per-step
//                (conditioning branches): copied once, before step 0.
//   static-post— everything downstream of the recurrence (encoder
//                heads): copied once, wired to the final step.
//
// Decoder inputs are fed internally: ground truth shifted one step at
// training time (teacher forcing), or the previous step's prediction
// wired in and detached again around each inference batch.

use stoat_core::{bail, Error, Result, Tensor};
use stoat_nn::{Graph, LayerId, LayerKind};

use crate::net::Net;
use crate::train::{EvalReport, FitReport};

/// The cached unrolled net and the sequence geometry it was built for.
#[derive(Debug, Clone)]
pub(crate) struct UnrollState {
    pub rnet: Box<Net>,
    pub in_steps: usize,
    pub out_steps: usize,
}

/// Sequence layout of a recurrent master net against concrete data.
struct SeqLayout {
    /// Per declared input: true when it carries a [batch, steps, …]
    /// sequence that is sliced per step.
    seq_input: Vec<bool>,
    in_steps: usize,
    out_steps: usize,
    decoder: bool,
}

impl Net {
    fn seq_layout(&self, xs: &[Tensor], ys: Option<&[Tensor]>) -> Result<SeqLayout> {
        let recurrent_ids: Vec<LayerId> = (0..self.graph.len())
            .map(LayerId)
            .filter(|&id| self.graph.layer(id).kind.is_recurrent())
            .collect();
        let temporal = self.graph.ancestors_of(&recurrent_ids);
        let decoder = (0..self.graph.len())
            .any(|i| self.graph.layer(LayerId(i)).kind.is_decoder_input());

        let mut seq_input = Vec::with_capacity(self.lin.len());
        let mut in_steps = 0usize;
        for (j, &inp) in self.lin.iter().enumerate() {
            if self.graph.layer(inp).kind.is_decoder_input() {
                // Fed internally by the unrolled net.
                seq_input.push(false);
                continue;
            }
            let seq = temporal[inp.0];
            seq_input.push(seq);
            if seq {
                let x = xs.get(j).ok_or_else(|| {
                    Error::msg("recurrent net: missing input tensor for sequence input")
                })?;
                if x.rank() < 3 {
                    return Err(Error::RankMismatch {
                        op: "sequence input",
                        expected: 3,
                        got: x.rank(),
                    });
                }
                let steps = x.dims()[1];
                if in_steps != 0 && steps != in_steps {
                    bail!(
                        "input tensors with different time steps: {in_steps} vs {steps}"
                    );
                }
                in_steps = steps;
            }
        }
        if in_steps == 0 {
            in_steps = 1;
        }

        let out_steps = if decoder {
            match ys {
                Some(ys) => {
                    let y = ys.first().ok_or_else(|| {
                        Error::msg("decoder net: target tensors required")
                    })?;
                    if y.rank() < 3 {
                        return Err(Error::RankMismatch {
                            op: "decoder target",
                            expected: 3,
                            got: y.rank(),
                        });
                    }
                    y.dims()[1]
                }
                // Inference without targets reuses the trained geometry.
                None => match &self.unroll {
                    Some(u) => u.out_steps,
                    None => bail!(
                        "decoder net: train or evaluate before predict so the \
                         unrolled step count is known"
                    ),
                },
            }
        } else {
            1
        };

        Ok(SeqLayout {
            seq_input,
            in_steps,
            out_steps,
            decoder,
        })
    }

    /// Slice master-level tensors into the unrolled net's layout:
    /// per-step slices for sequences, pass-through for static tensors.
    fn slice_data(
        &self,
        xs: &[Tensor],
        ys: Option<&[Tensor]>,
        layout: &SeqLayout,
    ) -> Result<(Vec<Tensor>, Vec<Tensor>)> {
        let mut rxs = Vec::new();
        for (j, x) in xs.iter().enumerate() {
            if self.graph.layer(self.lin[j]).kind.is_decoder_input() {
                continue;
            }
            if layout.seq_input[j] {
                for t in 0..layout.in_steps {
                    rxs.push(x.timestep(t)?);
                }
            } else {
                rxs.push(x.clone());
            }
        }
        let mut rys = Vec::new();
        if let Some(ys) = ys {
            if layout.decoder {
                for t in 0..layout.out_steps {
                    rys.push(ys[0].timestep(t)?);
                }
            } else {
                rys.extend(ys.iter().cloned());
            }
        }
        Ok((rxs, rys))
    }

    /// Build (or reuse) the unrolled net for the given step counts.
    pub(crate) fn ensure_unrolled(&mut self, in_steps: usize, out_steps: usize) -> Result<()> {
        if !self.is_built() {
            return Err(Error::NotBuilt);
        }
        let up_to_date = self
            .unroll
            .as_ref()
            .is_some_and(|u| u.in_steps == in_steps && u.out_steps == out_steps);
        if up_to_date {
            return Ok(());
        }
        if self.unroll.is_some() {
            // Pull the weights trained at the old geometry back first.
            self.collect_params()?;
        }
        let rnet = build_unrolled(self, in_steps, out_steps)?;
        self.unroll = Some(UnrollState {
            rnet: Box::new(rnet),
            in_steps,
            out_steps,
        });
        Ok(())
    }

    pub(crate) fn fit_recurrent(
        &mut self,
        xs: &[Tensor],
        ys: &[Tensor],
        batch: usize,
        epochs: usize,
    ) -> Result<FitReport> {
        self.check_data(xs, ys, true)?;
        let layout = self.seq_layout(xs, Some(ys))?;
        self.ensure_unrolled(layout.in_steps, layout.out_steps)?;
        let (rxs, rys) = self.slice_data(xs, Some(ys), &layout)?;
        let report = {
            let u = self.unroll.as_mut().expect("unrolled net just built");
            u.rnet.fit(&rxs, &rys, batch, epochs)?
        };
        self.collect_params()?;
        Ok(report)
    }

    pub(crate) fn train_batch_recurrent(
        &mut self,
        xs: &[Tensor],
        ys: &[Tensor],
        indices: &[usize],
    ) -> Result<()> {
        self.check_data(xs, ys, true)?;
        let layout = self.seq_layout(xs, Some(ys))?;
        self.ensure_unrolled(layout.in_steps, layout.out_steps)?;
        let (rxs, rys) = self.slice_data(xs, Some(ys), &layout)?;
        let u = self.unroll.as_mut().expect("unrolled net just built");
        u.rnet.train_batch(&rxs, &rys, indices)
    }

    pub(crate) fn evaluate_recurrent(
        &mut self,
        xs: &[Tensor],
        ys: &[Tensor],
    ) -> Result<EvalReport> {
        self.check_data(xs, ys, true)?;
        let layout = self.seq_layout(xs, Some(ys))?;
        self.ensure_unrolled(layout.in_steps, layout.out_steps)?;
        let (rxs, rys) = self.slice_data(xs, Some(ys), &layout)?;
        let u = self.unroll.as_mut().expect("unrolled net just built");
        u.rnet.evaluate(&rxs, &rys)
    }

    pub(crate) fn predict_recurrent(&mut self, xs: &[Tensor]) -> Result<Vec<Tensor>> {
        self.check_data(xs, &[], false)?;
        let layout = self.seq_layout(xs, None)?;
        self.ensure_unrolled(layout.in_steps, layout.out_steps)?;
        let (rxs, _) = self.slice_data(xs, None, &layout)?;
        let (outs, dec_group) = {
            let u = self.unroll.as_mut().expect("unrolled net just built");
            (u.rnet.predict(&rxs)?, u.rnet.dec_group)
        };
        if dec_group <= 1 {
            return Ok(outs);
        }
        // Re-stack per-step decoder outputs into [batch, steps, …].
        outs.chunks(dec_group)
            .map(|group| {
                let refs: Vec<&Tensor> = group.iter().collect();
                Tensor::stack_timesteps(&refs)
            })
            .collect()
    }
}

/// Construct the unrolled net for a recurrent master.
pub(crate) fn build_unrolled(master: &Net, in_steps: usize, out_steps: usize) -> Result<Net> {
    let proto = &master.graph;
    let n = proto.len();

    let recurrent_ids: Vec<LayerId> = (0..n)
        .map(LayerId)
        .filter(|&id| proto.layer(id).kind.is_recurrent())
        .collect();
    let din_ids: Vec<LayerId> = (0..n)
        .map(LayerId)
        .filter(|&id| proto.layer(id).kind.is_decoder_input())
        .collect();
    if din_ids.len() > 1 {
        bail!("unroll: at most one decoder input is supported");
    }
    let decoder = !din_ids.is_empty();
    if decoder && master.lout.len() != 1 {
        bail!("unroll: decoder nets support a single output layer");
    }

    let temporal = proto.ancestors_of(&recurrent_ids);
    let dec_desc = proto.descendants_of(&din_ids);
    let per_step: Vec<bool> = (0..n).map(|i| temporal[i] || dec_desc[i]).collect();
    let per_step_ids: Vec<LayerId> = (0..n).map(LayerId).filter(|id| per_step[id.0]).collect();
    if per_step_ids.is_empty() {
        bail!("unroll: graph has no temporal layers");
    }
    let feeds_steps = proto.ancestors_of(&per_step_ids);
    let static_pre: Vec<bool> = (0..n).map(|i| feeds_steps[i] && !per_step[i]).collect();

    // Combined encoder→decoder chains (sequence input AND decoder input)
    // would need the encoder's final state wired into the decoder's
    // initial state; that wiring lands here when supported.
    if decoder && in_steps > 1 {
        bail!("unroll: combined encoder-decoder chains are not supported");
    }
    let steps = if decoder { out_steps } else { in_steps };
    if steps == 0 {
        bail!("unroll: zero timesteps");
    }

    let mut g = Graph::new(proto.device);
    // Identical parameter arena layout: per-step copies share the
    // master's slot indices, and parameters flow master <-> rnet by
    // straight slot-for-slot copy.
    for p in &proto.params {
        g.grads.push(Tensor::zeros(p.dims().to_vec(), p.device()));
        g.params.push(p.clone());
    }

    let missing = |what: &str| Error::msg(format!("unroll: {what} copy not yet created"));

    // 1. Static layers feeding the temporal part.
    let mut map_static: Vec<Option<LayerId>> = vec![None; n];
    for i in 0..n {
        if !static_pre[i] {
            continue;
        }
        let l = proto.layer(LayerId(i));
        let id = match &l.kind {
            LayerKind::Input { decoder } => {
                g.add_input(&l.output.dims()[1..], *decoder, Some(&l.name))
            }
            _ => {
                let parents = map_parents(&l.parents, |p| map_static[p.0])
                    .ok_or_else(|| missing("static parent"))?;
                g.add_shared_layer(l.kind.clone(), &parents, l.params.clone(), Some(&l.name))?
            }
        };
        map_static[i] = Some(id);
    }

    // 2. Per-step copies, step by step.
    let mut map_step: Vec<Vec<Option<LayerId>>> = vec![vec![None; n]; steps];
    for t in 0..steps {
        for i in 0..n {
            if !per_step[i] {
                continue;
            }
            let l = proto.layer(LayerId(i));
            let name = format!("{}_t{}", l.name, t);
            let id = match &l.kind {
                LayerKind::Input { decoder } => {
                    g.add_input(&l.output.dims()[1..], *decoder, Some(&name))
                }
                _ => {
                    let mut parents = map_parents(&l.parents, |p| {
                        if per_step[p.0] {
                            map_step[t][p.0]
                        } else {
                            map_static[p.0]
                        }
                    })
                    .ok_or_else(|| missing("per-step parent"))?;
                    // The previous step's copy carries the recurrent state.
                    if l.kind.is_recurrent() && t > 0 {
                        parents.push(map_step[t - 1][i].ok_or_else(|| missing("state"))?);
                    }
                    g.add_shared_layer(l.kind.clone(), &parents, l.params.clone(), Some(&name))?
                }
            };
            map_step[t][i] = Some(id);
        }
    }

    // 3. Static layers downstream of the recurrence, wired to the final
    // step.
    for i in 0..n {
        if per_step[i] || static_pre[i] {
            continue;
        }
        let l = proto.layer(LayerId(i));
        let id = match &l.kind {
            LayerKind::Input { decoder } => {
                g.add_input(&l.output.dims()[1..], *decoder, Some(&l.name))
            }
            _ => {
                let parents = map_parents(&l.parents, |p| {
                    if per_step[p.0] {
                        map_step[steps - 1][p.0]
                    } else {
                        map_static[p.0]
                    }
                })
                .ok_or_else(|| missing("downstream parent"))?;
                g.add_shared_layer(l.kind.clone(), &parents, l.params.clone(), Some(&l.name))?
            }
        };
        map_static[i] = Some(id);
    }

    // Declared interface of the unrolled net. Decoder inputs are fed
    // internally and never appear in `lin`.
    let mut rlin = Vec::new();
    for &inp in &master.lin {
        if proto.layer(inp).kind.is_decoder_input() {
            continue;
        }
        if per_step[inp.0] {
            for step_map in map_step.iter() {
                rlin.push(step_map[inp.0].ok_or_else(|| missing("input"))?);
            }
        } else {
            rlin.push(map_static[inp.0].ok_or_else(|| missing("input"))?);
        }
    }

    let mut rlout = Vec::new();
    let mut rlosses = Vec::new();
    let mut rmetrics = Vec::new();
    for (j, &out) in master.lout.iter().enumerate() {
        if per_step[out.0] {
            for step_map in map_step.iter() {
                rlout.push(step_map[out.0].ok_or_else(|| missing("output"))?);
                rlosses.push(master.losses[j]);
                rmetrics.push(master.metrics[j]);
            }
        } else {
            rlout.push(map_static[out.0].ok_or_else(|| missing("output"))?);
            rlosses.push(master.losses[j]);
            rmetrics.push(master.metrics[j]);
        }
    }

    let din = match din_ids.first() {
        Some(d) => map_step
            .iter()
            .map(|m| m[d.0].ok_or_else(|| missing("decoder input")))
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    let dec_group = if decoder { steps } else { 1 };

    let total = rlout.len();
    let mut rnet = Net {
        name: format!("{}_unrolled", master.name),
        graph: g,
        lin: rlin,
        lout: rlout,
        snets: Vec::new(),
        losses: rlosses,
        metrics: rmetrics,
        cs: master.cs.clone(),
        opt_template: master.opt_template.as_ref().map(|o| o.replicate()),
        batch_size: 0,
        shard: Vec::new(),
        tr_batches: 0,
        total_loss: vec![0.0; total],
        total_metric: vec![0.0; total],
        inferenced_samples: 0,
        // The unrolled graph contains cell layers, but it executes
        // directly; it never unrolls again.
        recurrent: false,
        unroll: None,
        dec_group,
        din,
    };
    rnet.create_replicas();
    Ok(rnet)
}

fn map_parents(
    parents: &[LayerId],
    f: impl Fn(&LayerId) -> Option<LayerId>,
) -> Option<Vec<LayerId>> {
    parents.iter().map(|p| f(p)).collect()
}
