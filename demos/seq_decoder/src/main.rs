// Sequence decoder — teacher-forced LSTM on a toy pattern task.
//
// Each sample carries a seed vector that selects a rotation offset; the
// decoder must emit the one-hot sequence (offset, offset+1, …) mod 4.
// Training feeds ground truth into the decoder input (teacher forcing);
// prediction feeds the previous step's own output back instead.

use stoat::{Activation, CompServ, Device, Loss, Metric, ModelBuilder, Optimizer, Tensor};

const VOCAB: usize = 4;
const STEPS: usize = 5;

fn make_data(n: usize) -> stoat::Result<(Vec<Tensor>, Vec<Tensor>)> {
    let mut seed = Vec::with_capacity(n * VOCAB);
    let mut target = vec![0.0f32; n * STEPS * VOCAB];
    for i in 0..n {
        let offset = i % VOCAB;
        for k in 0..VOCAB {
            seed.push(if k == offset { 1.0 } else { 0.0 });
        }
        for t in 0..STEPS {
            target[(i * STEPS + t) * VOCAB + (offset + t) % VOCAB] = 1.0;
        }
    }
    Ok((
        vec![Tensor::from_vec(seed, vec![n, VOCAB], Device::Cpu)?],
        vec![Tensor::from_vec(target, vec![n, STEPS, VOCAB], Device::Cpu)?],
    ))
}

fn main() -> stoat::Result<()> {
    println!("=== stoat — LSTM sequence decoder ===");

    let (xs, ys) = make_data(64)?;

    let mut m = ModelBuilder::new();
    let seed = m.input(&[VOCAB]);
    let din = m.input(&[VOCAB]);
    m.set_decoder(din)?;
    let cell = m.lstm(din, 32)?;
    let cat = m.concat(&[cell, seed], 1)?;
    let h = m.dense(cat, VOCAB)?;
    let out = m.activation(h, Activation::Softmax)?;
    let mut net = m.model(&[seed], &[out], "seq_decoder")?;

    net.build(
        Optimizer::adam(0.005),
        &[Loss::CategoricalCrossEntropy],
        &[Metric::CategoricalAccuracy],
        CompServ::cpu(Some(1)),
    )?;
    println!("{}", net.summary());

    net.fit(&xs, &ys, 32, 60)?;

    let report = net.evaluate(&xs, &ys)?;
    println!("teacher-forced {report}");

    // Free-running inference: the decoder consumes its own predictions.
    let (probe_x, _) = make_data(VOCAB)?;
    let pred = net.predict(&probe_x)?;
    println!("free-running predictions (argmax per step):");
    for b in 0..VOCAB {
        let mut steps = Vec::with_capacity(STEPS);
        for t in 0..STEPS {
            let row = &pred[0].data()[(b * STEPS + t) * VOCAB..(b * STEPS + t + 1) * VOCAB];
            let arg = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);
            steps.push(arg.to_string());
        }
        println!("  offset {b}: {}", steps.join(" "));
    }
    Ok(())
}
