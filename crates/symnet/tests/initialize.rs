use std::sync::Arc;

use symnet::graph::Graph;
use symnet::nn::{self, FullyConnected};
use symnet::tensor::{dim, ArraySink};
use symnet::{Context, Dtype};
use symnet_engine_ref::RefEngine;

fn engine() -> Arc<RefEngine> {
    Arc::new(RefEngine::new())
}

fn compile(engine: &Arc<RefEngine>) -> Graph<RefEngine> {
    let symbolic = nn::combine(&FullyConnected {
        size: 10,
        name: Some("fc".to_string()),
        ..Default::default()
    });
    Graph::compose(
        Arc::clone(engine),
        Context::Cpu,
        &symbolic,
        None,
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap()
}

#[test]
fn fixed_seed_reproduces_parameter_values() {
    let engine = engine();
    let mut a = compile(&engine);
    let mut b = compile(&engine);
    a.initialize(42, None).unwrap();
    b.initialize(42, None).unwrap();

    for name in ["fc_weight", "fc_bias"] {
        let va = a.param(name).unwrap().values_f32().unwrap();
        let vb = b.param(name).unwrap().values_f32().unwrap();
        assert_eq!(va, vb, "parameter '{name}' differs between seeds");
    }

    let mut c = compile(&engine);
    c.initialize(43, None).unwrap();
    assert_ne!(
        a.param("fc_weight").unwrap().values_f32().unwrap(),
        c.param("fc_weight").unwrap().values_f32().unwrap(),
        "different seeds should not collide"
    );
}

#[test]
fn default_policy_zero_fills_bias_and_internal_names() {
    let engine = engine();
    let mut graph = compile(&engine);
    graph.initialize(7, None).unwrap();

    // The bias has a registered zero initializer and the default policy
    // would zero it anyway; either way the values must be zero.
    let bias = graph.param("fc_bias").unwrap().values_f32().unwrap();
    assert!(bias.iter().all(|&v| v == 0.0));

    let weight = graph.param("fc_weight").unwrap().values_f32().unwrap();
    assert!(weight.iter().any(|&v| v != 0.0), "weights stayed zero");
    // Xavier with averaging factor and magnitude 3 bounds the fill.
    let bound = (3.0f32 / ((4.0 + 10.0) / 2.0)).sqrt();
    assert!(weight.iter().all(|&v| v.abs() <= bound));
}

#[test]
fn custom_initializer_overrides_the_policy() {
    let engine = engine();
    let mut graph = compile(&engine);
    graph
        .initialize(
            1,
            Some(&|array, name| {
                if name.starts_with('_') {
                    array.zeros()
                } else {
                    array.fill(2.5)
                }
            }),
        )
        .unwrap();
    let weight = graph.param("fc_weight").unwrap().values_f32().unwrap();
    assert!(weight.iter().all(|&v| v == 2.5));
}

#[test]
fn forward_requires_initialization() {
    let engine = engine();
    let mut graph = compile(&engine);
    let err = graph.forward(false).unwrap_err();
    assert!(err.to_string().contains("not initialized"));

    graph.initialize(3, None).unwrap();
    assert!(graph.is_initialized());
    graph.forward(false).unwrap();
}
