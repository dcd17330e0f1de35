use std::collections::BTreeMap;
use std::sync::Arc;

use symnet::tensor::dim;
use symnet::train::{Adam, Optimizer, OptimizerConf, Sgd};
use symnet::{Context, Dtype, TensorArray};
use symnet_engine_ref::RefEngine;

fn engine() -> Arc<RefEngine> {
    Arc::new(RefEngine::new())
}

fn tensor(engine: &Arc<RefEngine>, values: &[f32]) -> TensorArray<RefEngine> {
    let array = TensorArray::new(
        engine,
        Context::Cpu,
        Dtype::Float32,
        dim([values.len() as i32]),
    )
    .unwrap();
    array.set_values(values).unwrap();
    array
}

fn schedule() -> BTreeMap<usize, f32> {
    let mut map = BTreeMap::new();
    map.insert(0, 0.1);
    map.insert(10, 0.01);
    map
}

#[test]
fn sgd_resolves_learning_rate_from_the_epoch_schedule() {
    let engine = engine();
    let conf = Sgd {
        lr_map: schedule(),
        ..Default::default()
    };

    // Epoch 5 resolves 0.1: w' = w - 0.1 * g.
    let mut opt: Box<dyn Optimizer<RefEngine>> = conf.init(5);
    let param = tensor(&engine, &[1.0]);
    let grad = tensor(&engine, &[1.0]);
    opt.update(&param, &grad).unwrap();
    assert!((param.values_f32().unwrap()[0] - 0.9).abs() < 1e-6);

    // Epoch 15 resolves 0.01.
    let mut opt: Box<dyn Optimizer<RefEngine>> = conf.init(15);
    let param = tensor(&engine, &[1.0]);
    opt.update(&param, &grad).unwrap();
    assert!((param.values_f32().unwrap()[0] - 0.99).abs() < 1e-6);
}

#[test]
fn adam_resolves_learning_rate_from_the_epoch_schedule() {
    let engine = engine();
    let conf = Adam {
        lr_map: schedule(),
        ..Default::default()
    };
    let grad = tensor(&engine, &[1.0]);

    let mut early: Box<dyn Optimizer<RefEngine>> = conf.init(5);
    let p_early = tensor(&engine, &[1.0]);
    early.update(&p_early, &grad).unwrap();
    let step_early = 1.0 - p_early.values_f32().unwrap()[0];

    let mut late: Box<dyn Optimizer<RefEngine>> = conf.init(15);
    let p_late = tensor(&engine, &[1.0]);
    late.update(&p_late, &grad).unwrap();
    let step_late = 1.0 - p_late.values_f32().unwrap()[0];

    // The first Adam step scales linearly with the learning rate.
    assert!(step_early > 0.0 && step_late > 0.0);
    assert!(
        (step_early / step_late - 10.0).abs() < 1e-3,
        "expected a 10x ratio, got {step_early} / {step_late}"
    );
}

#[test]
fn explicit_learning_rate_wins_over_the_schedule() {
    let engine = engine();
    let conf = Sgd {
        lr: 0.5,
        lr_map: schedule(),
        ..Default::default()
    };
    let mut opt: Box<dyn Optimizer<RefEngine>> = conf.init(15);
    let param = tensor(&engine, &[1.0]);
    let grad = tensor(&engine, &[1.0]);
    opt.update(&param, &grad).unwrap();
    assert!((param.values_f32().unwrap()[0] - 0.5).abs() < 1e-6);
}

#[test]
fn momentum_state_is_created_lazily_per_parameter() {
    let engine = engine();
    let conf = Sgd {
        lr: 0.1,
        momentum: 0.9,
        ..Default::default()
    };
    let mut opt: Box<dyn Optimizer<RefEngine>> = conf.init(0);
    let a = tensor(&engine, &[1.0, 2.0]);
    let b = tensor(&engine, &[3.0]);
    let ga = tensor(&engine, &[0.5, 0.5]);
    let gb = tensor(&engine, &[0.5]);

    let before = engine.live_tensors();
    opt.update(&a, &ga).unwrap();
    assert_eq!(engine.live_tensors(), before + 1, "one momentum tensor");
    opt.update(&a, &ga).unwrap();
    assert_eq!(engine.live_tensors(), before + 1, "state is reused");
    opt.update(&b, &gb).unwrap();
    assert_eq!(engine.live_tensors(), before + 2, "one per parameter");

    opt.release();
    assert_eq!(engine.live_tensors(), before, "release frees the state");
}

#[test]
fn adam_state_holds_mean_and_variance_per_parameter() {
    let engine = engine();
    let conf = Adam::default();
    let param = tensor(&engine, &[1.0]);
    let grad = tensor(&engine, &[1.0]);

    let before = engine.live_tensors();
    {
        let mut opt: Box<dyn Optimizer<RefEngine>> = conf.init(0);
        opt.update(&param, &grad).unwrap();
        assert_eq!(engine.live_tensors(), before + 2);
        // Default lr 0.001: the first step moves the weight measurably.
        let value = param.values_f32().unwrap()[0];
        assert!(value < 1.0 && value > 0.99);
    }
    // Dropping the optimizer releases its auxiliary tensors.
    assert_eq!(engine.live_tensors(), before);
}
