use std::sync::Arc;

use symnet::nn::{self, FullyConnected, Sequence, SoftmaxCrossEntropyLoss};
use symnet::tensor::dim;
use symnet::train::{Optimizer, OptimizerConf, Sgd};
use symnet::{Context, Network};
use symnet_engine_ref::RefEngine;

fn engine() -> Arc<RefEngine> {
    Arc::new(RefEngine::new())
}

fn mlp() -> Sequence {
    Sequence::new(vec![
        Box::new(FullyConnected {
            size: 16,
            name: Some("fc1".to_string()),
            activation: Some(nn::relu),
            ..Default::default()
        }),
        Box::new(FullyConnected {
            size: 10,
            name: Some("fc2".to_string()),
            activation: Some(nn::softmax),
            ..Default::default()
        }),
    ])
}

#[test]
fn new_network_is_ready_for_inference() {
    let engine = engine();
    let net = Network::new(
        Arc::clone(&engine),
        Context::Cpu,
        &mlp(),
        dim([4]),
        None,
        2,
        42,
    )
    .unwrap();

    assert_eq!(net.graph.input().dim(), dim([2, 4]));
    assert_eq!(net.graph.output().dim(), dim([2, 10]));
    assert!(net.graph.is_initialized());

    let batch = vec![0.5f32; 8];
    let rows = net.predict(&batch).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].len(), 10);
}

#[test]
fn train_step_moves_data_through_forward_and_backward() {
    let engine = engine();
    let mut net = Network::new(
        Arc::clone(&engine),
        Context::Cpu,
        &mlp(),
        dim([4]),
        Some(&SoftmaxCrossEntropyLoss),
        2,
        42,
    )
    .unwrap();
    assert!(net.graph.loss().is_some());
    assert_eq!(net.graph.label().unwrap().dim(), dim([2, 1]));

    let conf = Sgd {
        lr: 0.1,
        ..Default::default()
    };
    let mut opt: Box<dyn Optimizer<RefEngine>> = conf.init(0);
    let batch = vec![0.25f32; 8];
    let labels = vec![1.0f32, 3.0];
    net.train_step(&batch, Some(&labels), opt.as_mut()).unwrap();
}

#[test]
fn symbol_and_params_round_trip_into_a_loaded_network() {
    let engine = engine();
    let source = Network::new(
        Arc::clone(&engine),
        Context::Cpu,
        &mlp(),
        dim([4]),
        None,
        7,
        42,
    )
    .unwrap();

    let mut symbol_doc = Vec::new();
    source.save_symbol(&mut symbol_doc).unwrap();
    let mut params = Vec::new();
    source.save_params(&mut params, &[]).unwrap();

    let loaded = Network::load(
        Arc::clone(&engine),
        Context::Cpu,
        symbol_doc.as_slice(),
        params.as_slice(),
        2,
    )
    .unwrap();

    assert_eq!(loaded.input_dim(), dim([4]));
    assert_eq!(loaded.graph.output().dim(), dim([2, 10]));
    for name in ["fc1_weight", "fc1_bias", "fc2_weight", "fc2_bias"] {
        assert_eq!(
            source.graph.param(name).unwrap().values_f32().unwrap(),
            loaded.graph.param(name).unwrap().values_f32().unwrap(),
            "parameter '{name}' did not survive the round trip"
        );
    }
}

#[test]
fn inherit_seeds_from_a_parameter_stream() {
    let engine = engine();
    let source = Network::new(
        Arc::clone(&engine),
        Context::Cpu,
        &mlp(),
        dim([4]),
        None,
        13,
        42,
    )
    .unwrap();
    let mut params = Vec::new();
    source.save_params(&mut params, &["fc1*"]).unwrap();

    let inherited = Network::inherit(
        Arc::clone(&engine),
        Context::Cpu,
        &mlp(),
        dim([4]),
        params.as_slice(),
        2,
        42,
    )
    .unwrap();
    assert_eq!(
        inherited.graph.param("fc1_weight").unwrap().values_f32().unwrap(),
        source.graph.param("fc1_weight").unwrap().values_f32().unwrap()
    );
}

#[test]
fn gpu_context_without_devices_falls_back_to_cpu() {
    let engine = engine();
    let net = Network::new(
        Arc::clone(&engine),
        Context::Gpu(0),
        &mlp(),
        dim([4]),
        None,
        2,
        42,
    )
    .unwrap();
    assert_eq!(net.graph.ctx(), Context::Cpu);
}
