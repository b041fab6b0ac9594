// Net-level behavior: build validation, resizing, sharding, replica
// weight synchronization, introspection, checkpointing.

use stoat::{
    Activation, CompServ, Device, Error, Loss, Metric, ModelBuilder, Net, Optimizer, Tensor,
};

fn mlp(replicas: usize) -> Net {
    let mut m = ModelBuilder::new();
    let x = m.input(&[4]);
    let h = m.dense(x, 8).unwrap();
    let h = m.activation(h, Activation::ReLU).unwrap();
    let y = m.dense(h, 2).unwrap();
    let mut net = m.model(&[x], &[y], "mlp").unwrap();
    net.build(
        Optimizer::sgd(0.1, 0.0),
        &[Loss::MeanSquaredError],
        &[Metric::MeanSquaredError],
        CompServ::cpu(Some(replicas)),
    )
    .unwrap();
    net
}

#[test]
fn unbuilt_net_refuses_to_train() {
    let mut m = ModelBuilder::new();
    let x = m.input(&[4]);
    let y = m.dense(x, 2).unwrap();
    let mut net = m.model(&[x], &[y], "raw").unwrap();
    let xs = vec![Tensor::ones(vec![4, 4], Device::Cpu)];
    let ys = vec![Tensor::zeros(vec![4, 2], Device::Cpu)];
    match net.fit(&xs, &ys, 4, 1) {
        Err(Error::NotBuilt) => {}
        other => panic!("expected NotBuilt, got {other:?}"),
    }
}

#[test]
fn build_rejects_mismatched_loss_count() {
    let mut m = ModelBuilder::new();
    let x = m.input(&[4]);
    let y1 = m.dense(x, 2).unwrap();
    let y2 = m.dense(x, 2).unwrap();
    let mut net = m.model(&[x], &[y1, y2], "two_heads").unwrap();
    let err = net.build(
        Optimizer::sgd(0.1, 0.0),
        &[
            Loss::MeanSquaredError,
            Loss::MeanSquaredError,
            Loss::MeanSquaredError,
        ],
        &[Metric::None],
        CompServ::cpu(Some(1)),
    );
    assert!(err.is_err());
}

#[test]
fn single_loss_broadcasts_over_outputs() {
    let mut m = ModelBuilder::new();
    let x = m.input(&[4]);
    let y1 = m.dense(x, 2).unwrap();
    let y2 = m.dense(x, 3).unwrap();
    let mut net = m.model(&[x], &[y1, y2], "two_heads").unwrap();
    net.build(
        Optimizer::sgd(0.1, 0.0),
        &[Loss::MeanSquaredError],
        &[Metric::None],
        CompServ::cpu(Some(1)),
    )
    .unwrap();
    let xs = vec![Tensor::ones(vec![4, 4], Device::Cpu)];
    let ys = vec![
        Tensor::zeros(vec![4, 2], Device::Cpu),
        Tensor::zeros(vec![4, 3], Device::Cpu),
    ];
    net.train_batch(&xs, &ys, &[0, 1, 2, 3]).unwrap();
}

#[test]
fn batch_smaller_than_replica_count_is_fatal() {
    let mut net = mlp(4);
    let xs = vec![Tensor::ones(vec![8, 4], Device::Cpu)];
    let ys = vec![Tensor::zeros(vec![8, 2], Device::Cpu)];
    match net.train_batch(&xs, &ys, &[0, 1, 2]) {
        Err(Error::BatchTooSmall { batch: 3, replicas: 4 }) => {}
        other => panic!("expected BatchTooSmall, got {other:?}"),
    }
}

#[test]
fn replica_shards_cover_batch_exactly() {
    let mut net = mlp(3);
    net.resize(10).unwrap();
    let sizes: Vec<usize> = net
        .subnets()
        .iter()
        .map(|sn| sn.graph.batch)
        .collect();
    assert_eq!(sizes, vec![3, 3, 4]);
    assert_eq!(sizes.iter().sum::<usize>(), 10);
}

#[test]
fn resize_is_idempotent_across_replicas() {
    let mut net = mlp(2);
    net.resize(6).unwrap();
    let shapes: Vec<Vec<usize>> = net
        .subnets()
        .iter()
        .flat_map(|sn| sn.graph.layers.iter().map(|l| l.output.dims().to_vec()))
        .collect();
    net.resize(6).unwrap();
    let again: Vec<Vec<usize>> = net
        .subnets()
        .iter()
        .flat_map(|sn| sn.graph.layers.iter().map(|l| l.output.dims().to_vec()))
        .collect();
    assert_eq!(shapes, again);
}

#[test]
fn sync_weights_leaves_replicas_identical() {
    let mut net = mlp(3);
    net.resize(6).unwrap();
    // Desynchronize the replicas on purpose.
    for (i, sn) in net.subnets_mut().iter_mut().enumerate() {
        for p in sn.graph.params.iter_mut() {
            p.map_inplace(|v| v + i as f32 * 0.5);
        }
    }
    net.sync_weights().unwrap();
    let reference: Vec<Vec<f32>> = net.subnets()[0]
        .graph
        .params
        .iter()
        .map(|p| p.data().to_vec())
        .collect();
    for sn in net.subnets() {
        for (p, r) in sn.graph.params.iter().zip(&reference) {
            for (a, b) in p.data().iter().zip(r) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }
    // The master carries the same averaged copy.
    for (p, r) in net.graph.params.iter().zip(&reference) {
        assert_eq!(p.data(), r.as_slice());
    }
}

#[test]
fn training_with_sync_cadence_keeps_replicas_identical() {
    let mut net = mlp(2);
    let xs = vec![Tensor::rand_uniform(vec![16, 4], Device::Cpu, 0.0, 1.0)];
    let ys = vec![Tensor::zeros(vec![16, 2], Device::Cpu)];
    for _ in 0..4 {
        let sind: Vec<usize> = (0..8).collect();
        net.train_batch(&xs, &ys, &sind).unwrap();
    }
    // lsb defaults to 1: replicas synchronized after every batch.
    let a = &net.subnets()[0].graph.params;
    let b = &net.subnets()[1].graph.params;
    for (pa, pb) in a.iter().zip(b.iter()) {
        for (va, vb) in pa.data().iter().zip(pb.data()) {
            assert!((va - vb).abs() < 1e-6);
        }
    }
}

#[test]
fn get_metric_reports_accumulated_averages() {
    let mut net = mlp(1);
    let xs = vec![Tensor::ones(vec![8, 4], Device::Cpu)];
    let ys = vec![Tensor::zeros(vec![8, 2], Device::Cpu)];
    net.evaluate(&xs, &ys).unwrap();
    let name = net.graph.layer(net.lout[0]).name.clone();
    let v = net.get_metric(&name, "mean_squared_error").unwrap();
    assert!(v.is_finite());
    assert!(net.get_metric(&name, "no_such_metric").is_err());
}

#[test]
fn summary_and_plot_walk_the_graph() {
    let net = mlp(2);
    let s = net.summary();
    assert!(s.contains("dense1"));
    assert!(s.contains("Activation(relu)"));
    assert!(s.contains("total params"));

    let path = std::env::temp_dir().join("stoat_net_plot.dot");
    net.plot(&path).unwrap();
    let dot = std::fs::read_to_string(&path).unwrap();
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("dense1"));
    std::fs::remove_file(&path).ok();
}

#[test]
fn checkpoint_roundtrip_restores_parameters() {
    let mut net = mlp(2);
    net.resize(4).unwrap();
    let path = std::env::temp_dir().join("stoat_ckpt_roundtrip.bin");
    net.save(&path).unwrap();
    let before: Vec<Vec<f32>> = net.graph.params.iter().map(|p| p.data().to_vec()).collect();

    // Scramble everything, then load back.
    for sn in net.subnets_mut() {
        for p in sn.graph.params.iter_mut() {
            p.fill_(7.0);
        }
    }
    for p in net.graph.params.iter_mut() {
        p.fill_(7.0);
    }
    net.load(&path).unwrap();
    for (p, b) in net.graph.params.iter().zip(&before) {
        assert_eq!(p.data(), b.as_slice());
    }
    // Replicas received the broadcast too.
    for sn in net.subnets() {
        for (p, b) in sn.graph.params.iter().zip(&before) {
            assert_eq!(p.data(), b.as_slice());
        }
    }
    std::fs::remove_file(&path).ok();
}
