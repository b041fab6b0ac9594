// End-to-end training behavior: forward against an independent
// reference, loss descent under SGD, prediction across replicas.

use stoat::{
    Activation, CompServ, Device, Loss, Metric, ModelBuilder, Net, Optimizer, Tensor,
};

/// Dense {4 -> 2} + ReLU with hand-set parameters.
fn reference_net(replicas: usize) -> Net {
    let mut m = ModelBuilder::new();
    let x = m.input(&[4]);
    let d = m.dense(x, 2).unwrap();
    let out = m.activation(d, Activation::ReLU).unwrap();
    let mut net = m.model(&[x], &[out], "reference").unwrap();
    net.build(
        Optimizer::sgd(0.1, 0.0),
        &[Loss::MeanSquaredError],
        &[Metric::None],
        CompServ::cpu(Some(replicas)),
    )
    .unwrap();

    // W: [4, 2] column-major per output unit, b: [2].
    let w: Vec<f32> = vec![
        0.5, -1.0, //
        0.25, 0.5, //
        -0.75, 0.25, //
        1.0, -0.5,
    ];
    net.graph.params[0] =
        Tensor::from_vec(w, vec![4, 2], Device::Cpu).unwrap();
    net.graph.params[1] =
        Tensor::from_vec(vec![0.1, -0.2], vec![2], Device::Cpu).unwrap();
    net.broadcast_params().unwrap();
    net
}

#[test]
fn forward_matches_independent_reference() {
    // Batch of 8 all-ones rows: out_j = relu(sum_i W[i][j] + b[j]).
    let mut net = reference_net(1);
    let xs = vec![Tensor::ones(vec![8, 4], Device::Cpu)];
    let outs = net.predict(&xs).unwrap();
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].dims(), &[8, 2]);

    let col_sums = [0.5 + 0.25 - 0.75 + 1.0, -1.0 + 0.5 + 0.25 - 0.5];
    let expect = [
        (col_sums[0] + 0.1f32).max(0.0),
        (col_sums[1] - 0.2f32).max(0.0),
    ];
    for row in outs[0].data().chunks(2) {
        for (got, want) in row.iter().zip(&expect) {
            assert!((got - want).abs() < 1e-5, "got {got}, want {want}");
        }
    }
}

#[test]
fn forward_is_identical_across_replica_counts() {
    // The same hand-set parameters must produce the same outputs whether
    // the batch runs on one replica or is sharded over three.
    let mut single = reference_net(1);
    let mut sharded = reference_net(3);
    let xs = vec![Tensor::rand_uniform(vec![9, 4], Device::Cpu, -1.0, 1.0)];
    let a = single.predict(&xs).unwrap();
    let b = sharded.predict(&xs).unwrap();
    for (x, y) in a[0].data().iter().zip(b[0].data()) {
        assert!((x - y).abs() < 1e-5);
    }
}

#[test]
fn sgd_decreases_identity_regression_loss() {
    // Trivial regression: learn the identity map on [0,1)^4.
    let mut m = ModelBuilder::new();
    let x = m.input(&[4]);
    let y = m.dense(x, 4).unwrap();
    let mut net = m.model(&[x], &[y], "identity").unwrap();
    net.build(
        Optimizer::sgd(0.1, 0.0),
        &[Loss::MeanSquaredError],
        &[Metric::None],
        CompServ::cpu(Some(1)),
    )
    .unwrap();

    let data = Tensor::rand_uniform(vec![32, 4], Device::Cpu, 0.0, 1.0);
    let xs = vec![data.clone()];
    let ys = vec![data];
    let sind: Vec<usize> = (0..32).collect();

    let mut losses = Vec::with_capacity(50);
    for _ in 0..50 {
        net.reset_loss();
        net.train_batch(&xs, &ys, &sind).unwrap();
        losses.push(net.get_metric("", "mean_squared_error").unwrap());
    }

    // Moving averages over the first and last 10 steps must descend
    // strongly; adjacent steps may wiggle.
    let head: f32 = losses[..10].iter().sum::<f32>() / 10.0;
    let tail: f32 = losses[40..].iter().sum::<f32>() / 10.0;
    assert!(
        tail < head * 0.5,
        "loss did not descend: head {head}, tail {tail}"
    );
    assert!(losses.iter().all(|l| l.is_finite()));
}

#[test]
fn adam_trains_softmax_classifier() {
    // Two linearly separable blobs; cross-entropy under Adam should
    // reach high training accuracy quickly.
    let n = 40usize;
    let mut xd = Vec::with_capacity(n * 2);
    let mut yd = Vec::with_capacity(n * 2);
    for i in 0..n {
        let side = if i % 2 == 0 { 1.0 } else { -1.0 };
        xd.extend_from_slice(&[side + 0.01 * i as f32, -side]);
        yd.extend_from_slice(if side > 0.0 { &[1.0, 0.0] } else { &[0.0, 1.0] });
    }
    let xs = vec![Tensor::from_vec(xd, vec![n, 2], Device::Cpu).unwrap()];
    let ys = vec![Tensor::from_vec(yd, vec![n, 2], Device::Cpu).unwrap()];

    let mut m = ModelBuilder::new();
    let x = m.input(&[2]);
    let h = m.dense(x, 8).unwrap();
    let h = m.activation(h, Activation::Tanh).unwrap();
    let l = m.dense(h, 2).unwrap();
    let out = m.activation(l, Activation::Softmax).unwrap();
    let mut net = m.model(&[x], &[out], "blobs").unwrap();
    net.build(
        Optimizer::adam(0.01),
        &[Loss::CategoricalCrossEntropy],
        &[Metric::CategoricalAccuracy],
        CompServ::cpu(Some(2)),
    )
    .unwrap();

    net.fit(&xs, &ys, 20, 50).unwrap();
    let report = net.evaluate(&xs, &ys).unwrap();
    assert!(
        report.outputs[0].metric > 0.9,
        "accuracy too low: {}",
        report.outputs[0].metric
    );
}

#[test]
fn fit_report_carries_per_epoch_logs() {
    let mut net = reference_net(1);
    let xs = vec![Tensor::rand_uniform(vec![16, 4], Device::Cpu, 0.0, 1.0)];
    let ys = vec![Tensor::zeros(vec![16, 2], Device::Cpu)];
    let report = net.fit(&xs, &ys, 8, 3).unwrap();
    assert_eq!(report.epochs.len(), 3);
    assert_eq!(report.epochs[0].outputs.len(), 1);
    assert!(report.final_loss().is_finite());
    // Display renders without panicking.
    let _ = format!("{report}");
}
