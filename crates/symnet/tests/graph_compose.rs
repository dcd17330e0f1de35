use std::sync::Arc;

use symnet::graph::Graph;
use symnet::nn::{self, FullyConnected, SoftmaxCrossEntropyLoss};
use symnet::symbol::{self, ops, var};
use symnet::tensor::dim;
use symnet::{Context, Dtype};
use symnet_engine_ref::RefEngine;

fn engine() -> Arc<RefEngine> {
    Arc::new(RefEngine::new())
}

fn fc_layer() -> FullyConnected {
    FullyConnected {
        size: 10,
        name: Some("fc".to_string()),
        ..Default::default()
    }
}

#[test]
fn single_fc_layer_binds_expected_tensors() {
    let engine = engine();
    let symbolic = nn::combine(&fc_layer());
    let graph = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &symbolic,
        None,
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap();

    assert_eq!(graph.output().dim(), dim([2, 10]));
    assert!(graph.loss().is_none());
    assert!(graph.grads().is_empty());

    let names: Vec<&str> = graph.params().keys().map(String::as_str).collect();
    assert_eq!(names, vec!["_input", "fc_bias", "fc_weight"]);
    assert_eq!(graph.param("fc_weight").unwrap().dim(), dim([10, 4]));
    assert_eq!(graph.param("fc_bias").unwrap().dim(), dim([10]));
    assert!(graph.is_trainable("fc_weight"));
    assert!(graph.is_trainable("fc_bias"));
    assert!(!graph.is_trainable("_input"));
}

#[test]
fn loss_adds_a_loss_output_without_changing_the_primary_one() {
    let engine = engine();
    let symbolic = nn::combine(&fc_layer());

    let without = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &symbolic,
        None,
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap();
    let with = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &symbolic,
        Some(&SoftmaxCrossEntropyLoss),
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap();

    assert_eq!(without.output().dim(), with.output().dim());
    assert!(without.loss().is_none());
    assert!(with.loss().is_some());
    // The label declared as (0, 1) resolves against the batched input.
    assert_eq!(with.label().unwrap().dim(), dim([2, 1]));
    // Gradients exist only on the loss-bearing graph, for trainable names.
    assert!(without.grads().is_empty());
    let grad_names: Vec<&str> = with.grads().keys().map(String::as_str).collect();
    assert_eq!(grad_names, vec!["fc_bias", "fc_weight"]);
}

#[test]
fn shared_node_instance_is_created_exactly_once() {
    let engine = engine();
    let weight = var("mixw");
    let hidden = ops::fully_connected(&ops::flatten(&symbol::input()), &weight, None, 10, true);
    // `hidden` feeds two parents; the compiled graph must hold one copy.
    let root = ops::add(&ops::relu(&hidden), &ops::sigmoid(&hidden));

    let before = engine.symbols_created();
    let graph = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &root,
        None,
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap();
    let created = engine.symbols_created() - before;

    // Variables: _input, mixw. Operators: flatten, fully_connected, relu,
    // sigmoid, add, and the block_grad output wrapper. No duplicates.
    assert_eq!(created, 8);
    assert_eq!(graph.output().dim(), dim([2, 10]));
}

#[test]
fn same_variable_name_resolves_to_one_parameter() {
    let engine = engine();
    // Two distinct Var instances under one name: weight sharing.
    let a = ops::fully_connected(&ops::flatten(&symbol::input()), &var("tied"), None, 10, true);
    let b = ops::fully_connected(&ops::flatten(&symbol::input()), &var("tied"), None, 10, true);
    let root = ops::add(&a, &b);

    let graph = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &root,
        None,
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap();

    let names: Vec<&str> = graph.params().keys().map(String::as_str).collect();
    assert_eq!(names, vec!["_input", "tied"]);
    assert_eq!(graph.param("tied").unwrap().dim(), dim([10, 4]));
}

#[test]
fn first_declared_dimension_wins_for_a_reused_name() {
    let engine = engine();
    let first = var("v").with_dim(dim([0, 3]));
    let second = var("v").with_dim(dim([0, 7]));
    let root = ops::add(&first, &second);

    let graph = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &root,
        None,
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap();

    // The later (0, 7) declaration was ignored; 0 resolved to the batch.
    assert_eq!(graph.param("v").unwrap().dim(), dim([2, 3]));
}

#[test]
fn unregistered_forward_reference_is_a_hard_error() {
    let engine = engine();
    let root = ops::add(&symbol::reference("missing", vec![]), &var("v").with_dim(dim([0, 3])));
    let err = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &root,
        None,
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap_err();
    assert!(err.to_string().contains("'missing' does not exist"));
}

#[test]
fn forward_reference_resolves_to_a_named_node() {
    let engine = engine();
    let named = ops::fully_connected(&ops::flatten(&symbol::input()), &var("refw"), None, 6, true)
        .with_name("stage");
    // Reference the named node from a second consumer; `depend` orders the
    // reference after its definition.
    let root = symbol::depend(vec![
        ops::add(&symbol::reference("stage", vec![]), 1.0f32),
        named,
    ]);

    let graph = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &root,
        None,
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap();
    assert_eq!(graph.output().dim(), dim([2, 6]));
}

#[test]
fn unresolvable_argument_shape_fails_the_bind() {
    let engine = engine();
    // Nothing pins the second dot operand's shape.
    let root = ops::dot(&ops::flatten(&symbol::input()), &var("free"));
    let err = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &root,
        None,
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap_err();
    assert!(
        err.to_string().contains("no shape for argument 'free'"),
        "unexpected error: {err}"
    );
}

#[test]
fn batch_norm_statistics_bind_as_auxiliary_state() {
    let engine = engine();
    let symbolic = nn::combine(&FullyConnected {
        size: 10,
        name: Some("fc".to_string()),
        batch_norm: true,
        ..Default::default()
    });
    let graph = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &symbolic,
        Some(&SoftmaxCrossEntropyLoss),
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap();

    assert_eq!(graph.param("fc$BN_gamma").unwrap().dim(), dim([10]));
    assert_eq!(graph.param("fc$BN_rmean").unwrap().dim(), dim([10]));
    assert_eq!(graph.param("fc$BN_rvar").unwrap().dim(), dim([10]));
    // Running statistics are non-trainable and never receive gradients.
    assert!(graph.is_trainable("fc$BN_gamma"));
    assert!(!graph.is_trainable("fc$BN_rmean"));
    assert!(!graph.grads().contains_key("fc$BN_rmean"));
    assert!(graph.grads().contains_key("fc$BN_gamma"));
}

#[test]
fn side_outputs_are_collected_with_star_names() {
    let engine = engine();
    let symbolic = nn::combine(&nn::Sequence::new(vec![
        Box::new(FullyConnected {
            size: 8,
            name: Some("hidden".to_string()),
            output: true,
            ..Default::default()
        }),
        Box::new(fc_layer()),
    ]));
    let graph = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &symbolic,
        None,
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap();

    assert_eq!(graph.output().dim(), dim([2, 10]));
    let side = graph.outputs().get("*hidden").expect("side output missing");
    assert_eq!(side.dim(), dim([2, 8]));
}

#[test]
fn generator_shapes_resolve_against_the_input_dimension() {
    let engine = engine();
    let symbolic = nn::combine(&fc_layer());
    // The generator's placeholder batch axis copies the input's.
    let root = ops::add(&symbolic, &ops::zeros(dim([0, 10])));
    let graph = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &root,
        None,
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap();
    assert_eq!(graph.output().dim(), dim([2, 10]));
}

#[test]
fn released_graph_leaves_no_live_engine_resources() {
    let engine = engine();
    {
        let symbolic = nn::combine(&fc_layer());
        let mut graph = Graph::compose(
            Arc::clone(&engine),
            Context::Cpu,
            &symbolic,
            Some(&SoftmaxCrossEntropyLoss),
            dim([2, 4]),
            Dtype::Float32,
        )
        .unwrap();
        assert!(engine.live_tensors() > 0);
        graph.release();
        // A second release is a no-op.
        graph.release();
    }
    assert_eq!(engine.live_tensors(), 0);
    assert_eq!(engine.live_symbols(), 0);
}

#[test]
fn dropped_graph_releases_via_drop() {
    let engine = engine();
    {
        let symbolic = nn::combine(&fc_layer());
        let _graph = Graph::compose(
            Arc::clone(&engine),
            Context::Cpu,
            &symbolic,
            None,
            dim([2, 4]),
            Dtype::Float32,
        )
        .unwrap();
    }
    assert_eq!(engine.live_tensors(), 0);
    assert_eq!(engine.live_symbols(), 0);
}

#[test]
fn graph_identity_is_stable_across_compilations() {
    let engine = engine();
    let symbolic = nn::combine(&fc_layer());
    let a = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &symbolic,
        None,
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap();
    let b = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &symbolic,
        None,
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap();
    assert_eq!(a.graph_identity().unwrap(), b.graph_identity().unwrap());
}

#[test]
fn bad_input_dimension_is_rejected() {
    let engine = engine();
    let symbolic = nn::combine(&fc_layer());
    for bad in [dim([]), dim([-1, 3]), dim([0, 4])] {
        let err = Graph::compose(
            Arc::clone(&engine),
            Context::Cpu,
            &symbolic,
            None,
            bad,
            Dtype::Float32,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bad input dimension"));
    }
}
