use std::fs::File;
use std::sync::Arc;

use symnet::graph::Graph;
use symnet::nn::{self, FullyConnected, Sequence};
use symnet::tensor::dim;
use symnet::{Context, Dtype};
use symnet_engine_ref::RefEngine;

fn engine() -> Arc<RefEngine> {
    Arc::new(RefEngine::new())
}

fn two_layer(engine: &Arc<RefEngine>) -> Graph<RefEngine> {
    let symbolic = nn::combine(&Sequence::new(vec![
        Box::new(FullyConnected {
            size: 8,
            name: Some("fc1".to_string()),
            ..Default::default()
        }),
        Box::new(FullyConnected {
            size: 3,
            name: Some("fc2".to_string()),
            ..Default::default()
        }),
    ]));
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
fn save_then_load_reproduces_values_bit_for_bit() {
    let engine = engine();
    let mut source = two_layer(&engine);
    source.initialize(11, None).unwrap();

    let mut stream = Vec::new();
    source.save_params(&mut stream, &[]).unwrap();

    let mut target = two_layer(&engine);
    target.initialize(99, None).unwrap();
    assert_ne!(
        source.param("fc1_weight").unwrap().values_f32().unwrap(),
        target.param("fc1_weight").unwrap().values_f32().unwrap()
    );

    target.load_params(stream.as_slice(), true).unwrap();
    assert!(target.is_initialized());
    for name in ["fc1_weight", "fc1_bias", "fc2_weight", "fc2_bias"] {
        assert_eq!(
            source.param(name).unwrap().values_f32().unwrap(),
            target.param(name).unwrap().values_f32().unwrap(),
            "parameter '{name}' did not round-trip"
        );
    }
}

#[test]
fn round_trip_through_a_file() {
    let engine = engine();
    let mut source = two_layer(&engine);
    source.initialize(5, None).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("params.bin");
    source.save_params(File::create(&path).unwrap(), &[]).unwrap();

    let mut target = two_layer(&engine);
    target.load_params(File::open(&path).unwrap(), true).unwrap();
    assert_eq!(
        source.param("fc2_weight").unwrap().values_f32().unwrap(),
        target.param("fc2_weight").unwrap().values_f32().unwrap()
    );
}

#[test]
fn glob_filter_selects_a_subset() {
    let engine = engine();
    let mut source = two_layer(&engine);
    source.initialize(1, None).unwrap();

    let mut stream = Vec::new();
    source.save_params(&mut stream, &["fc1*"]).unwrap();

    let mut reader = symnet::io::ParamsReader::new(stream.as_slice()).unwrap();
    let mut names = Vec::new();
    while reader.has_more() {
        names.push(reader.next().unwrap().0);
    }
    assert_eq!(names, vec!["fc1_bias", "fc1_weight"]);
}

#[test]
fn forced_load_requires_every_trainable_parameter() {
    let engine = engine();
    let mut source = two_layer(&engine);
    source.initialize(1, None).unwrap();

    let mut partial = Vec::new();
    source.save_params(&mut partial, &["fc1*"]).unwrap();

    let mut target = two_layer(&engine);
    target.initialize(2, None).unwrap();
    let err = target.load_params(partial.as_slice(), true).unwrap_err();
    assert!(err.to_string().contains("does not exist in params file"));

    // Unforced, the partial stream applies and the rest keeps its values.
    let mut relaxed = two_layer(&engine);
    relaxed.initialize(2, None).unwrap();
    let untouched = relaxed.param("fc2_weight").unwrap().values_f32().unwrap();
    relaxed.load_params(partial.as_slice(), false).unwrap();
    assert_eq!(
        relaxed.param("fc1_weight").unwrap().values_f32().unwrap(),
        source.param("fc1_weight").unwrap().values_f32().unwrap()
    );
    assert_eq!(
        relaxed.param("fc2_weight").unwrap().values_f32().unwrap(),
        untouched
    );
}

#[test]
fn element_count_mismatch_is_fatal() {
    let engine = engine();
    let mut source = two_layer(&engine);
    source.initialize(1, None).unwrap();
    let mut stream = Vec::new();
    source.save_params(&mut stream, &[]).unwrap();

    // A graph with differently-sized layers rejects the stream.
    let symbolic = nn::combine(&FullyConnected {
        size: 5,
        name: Some("fc1".to_string()),
        ..Default::default()
    });
    let mut other = Graph::compose(
        Arc::clone(&engine),
        Context::Cpu,
        &symbolic,
        None,
        dim([2, 4]),
        Dtype::Float32,
    )
    .unwrap();
    let err = other.load_params(stream.as_slice(), false).unwrap_err();
    assert!(err.to_string().contains("total count is incorrect"));
}
