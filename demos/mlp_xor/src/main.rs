// MLP XOR — the classic non-linearly-separable toy problem.
//
// Architecture: Input(2) → Dense(16) → ReLU → Dense(1) → Sigmoid
// Trained with SGD + momentum on binary cross-entropy, on two CPU
// replicas to exercise the data-parallel path.

use stoat::{CompServ, Device, Loss, Metric, ModelBuilder, Optimizer, Tensor};

fn main() -> stoat::Result<()> {
    println!("=== stoat — MLP XOR ===");

    // XOR truth table, repeated so every replica gets a full shard.
    let mut x_data = Vec::new();
    let mut y_data = Vec::new();
    for _ in 0..8 {
        x_data.extend_from_slice(&[0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0]);
        y_data.extend_from_slice(&[0.0, 1.0, 1.0, 0.0]);
    }
    let xs = vec![Tensor::from_vec(x_data, vec![32, 2], Device::Cpu)?];
    let ys = vec![Tensor::from_vec(y_data, vec![32, 1], Device::Cpu)?];

    let mut m = ModelBuilder::new();
    let x = m.input(&[2]);
    let h = m.dense(x, 16)?;
    let h = m.relu(h)?;
    let o = m.dense(h, 1)?;
    let out = m.sigmoid(o)?;
    let mut net = m.model(&[x], &[out], "xor")?;

    net.build(
        Optimizer::sgd(0.5, 0.9),
        &[Loss::BinaryCrossEntropy],
        &[Metric::MeanAbsoluteError],
        CompServ::cpu(Some(2)),
    )?;
    println!("{}", net.summary());

    net.fit(&xs, &ys, 16, 200)?;

    let report = net.evaluate(&xs, &ys)?;
    println!("{report}");

    let probe = vec![Tensor::from_vec(
        vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0],
        vec![4, 2],
        Device::Cpu,
    )?];
    let pred = net.predict(&probe)?;
    println!("predictions:");
    for (i, p) in pred[0].data().iter().enumerate() {
        let (a, b) = (probe[0].data()[i * 2], probe[0].data()[i * 2 + 1]);
        println!("  {a} xor {b} -> {p:.3}");
    }

    net.plot("xor.dot")?;
    println!("graph written to xor.dot");
    Ok(())
}
