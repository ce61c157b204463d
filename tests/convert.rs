use std::collections::HashSet;
use std::fs;
use std::path::Path;

use rust_nnir_compiler::graph::element_count;
use rust_nnir_compiler::{
    ConvertOptions, GraphError, OpType, STRUCTURE_FILE, TensorKind, convert_to_dir,
    load_net_from_path,
};
use serde_json::{Value, json};

fn blob(shape: &[usize]) -> Value {
    let count: usize = shape.iter().product();
    json!({ "shape": shape, "data": vec![0.25f32; count] })
}

fn blob_f64(shape: &[usize]) -> Value {
    let count: usize = shape.iter().product();
    json!({ "shape": shape, "double_data": vec![0.1f64; count] })
}

/// Small AlexNet-shaped network exercising in-place and pass-through layers.
fn small_net() -> Value {
    json!({
        "name": "small",
        "layer": [
            {"name": "data", "type": "Input", "top": ["data"],
             "input_param": {"shape": [{"dim": [1, 3, 16, 16]}]}},
            {"name": "conv1", "type": "Convolution", "bottom": ["data"], "top": ["conv1"],
             "convolution_param": {"num_output": 4, "kernel_size": 3, "pad": 1},
             "blobs": [blob(&[4, 3, 3, 3]), blob(&[4])]},
            {"name": "relu1", "type": "ReLU", "bottom": ["conv1"], "top": ["conv1"]},
            {"name": "pool1", "type": "Pooling", "bottom": ["conv1"], "top": ["pool1"],
             "pooling_param": {"pool": "MAX", "kernel_size": 3, "stride": 2}},
            {"name": "norm1", "type": "LRN", "bottom": ["pool1"], "top": ["norm1"],
             "lrn_param": {"local_size": 5, "alpha": 0.0001, "beta": 0.75}},
            {"name": "norm1_split", "type": "Split", "bottom": ["norm1"],
             "top": ["norm1_a", "norm1_b"]},
            {"name": "concat1", "type": "Concat", "bottom": ["norm1_a", "norm1_b"],
             "top": ["concat1"]},
            {"name": "fc6", "type": "InnerProduct", "bottom": ["concat1"], "top": ["fc6"],
             "inner_product_param": {"num_output": 10},
             "blobs": [blob_f64(&[10, 8, 7, 7]), blob_f64(&[10])]},
            {"name": "relu6", "type": "ReLU", "bottom": ["fc6"], "top": ["fc6"]},
            {"name": "drop6", "type": "Dropout", "bottom": ["fc6"], "top": ["drop6"]},
            {"name": "fc7", "type": "InnerProduct", "bottom": ["drop6"], "top": ["fc7"],
             "inner_product_param": {"num_output": 5},
             "blobs": [blob(&[5, 10, 1, 1]), blob(&[5])]},
            {"name": "prob", "type": "Softmax", "bottom": ["fc7"], "top": ["prob"]}
        ]
    })
}

fn write_model(dir: &Path, model: &Value) -> std::path::PathBuf {
    let path = dir.join("model.json");
    fs::write(&path, serde_json::to_vec_pretty(model).unwrap()).unwrap();
    path
}

#[test]
fn test_convert_small_network_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), &small_net());
    let out = dir.path().join("out");

    let net = load_net_from_path(&model).unwrap();
    let graph = convert_to_dir(&net, ConvertOptions::default(), &out).unwrap();

    let ops: Vec<OpType> = graph.nodes.iter().map(|node| node.op_type).collect();
    assert_eq!(
        ops,
        vec![
            OpType::Conv,
            OpType::Relu,
            OpType::MaxPool,
            OpType::Lrn,
            OpType::Concat,
            OpType::Gemm,
            OpType::Relu,
            OpType::Gemm,
            OpType::Softmax,
        ]
    );
    let mut names = HashSet::new();
    assert!(graph.tensors.iter().all(|tensor| names.insert(tensor.name.as_str())));

    // (16 + 0 + 2 - 3) / 2 = 7
    assert_eq!(graph.tensor("pool1").unwrap().shape, vec![1, 4, 7, 7]);
    assert_eq!(graph.tensor("concat1").unwrap().shape, vec![1, 8, 7, 7]);
    assert_eq!(graph.nodes[1].outputs, vec!["relu1"]);
    assert_eq!(graph.nodes[2].inputs, vec!["relu1"]);
    assert_eq!(graph.nodes[4].inputs, vec!["norm1", "norm1"]);
    assert_eq!(graph.nodes[7].inputs, vec!["relu6", "fc7_w", "fc7_b"]);

    let output = graph.output_tensor().unwrap();
    assert_eq!(output.name, "prob");
    assert_eq!(output.shape, vec![1, 5, 1, 1]);

    let structure = fs::read_to_string(out.join(STRUCTURE_FILE)).unwrap();
    assert!(structure.starts_with("input|data;F032;1,3,16,16\noutput|prob;F032;1,5,1,1\n"));
    assert!(structure.contains("initializer|fc6_w;F064;10,8,7,7\n"));
    assert!(structure.contains(
        "node|max_pool|relu1|pool1|strides=2,2;kernel_shape=3,3;pads=0,0,0,0;dilations=0,0\n"
    ));
    assert!(structure.contains("node|concat|norm1,norm1|concat1|\n"));
    assert!(!structure.contains("drop6"));

    for tensor in graph.tensors_of_kind(TensorKind::Variable) {
        let raw = fs::read(out.join(format!("{}.raw", tensor.name))).unwrap();
        assert_eq!(raw.len(), 4 * element_count(&tensor.shape).unwrap());
    }
    let raw_files = fs::read_dir(&out)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "raw"))
        .count();
    assert_eq!(raw_files, 6);
}

#[test]
fn test_unknown_layer_leaves_no_structure_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut model = small_net();
    model["layer"]
        .as_array_mut()
        .unwrap()
        .push(json!({"name": "crop", "type": "Crop", "bottom": ["prob"], "top": ["crop"]}));
    let path = write_model(dir.path(), &model);
    let out = dir.path().join("out");

    let net = load_net_from_path(&path).unwrap();
    let err = convert_to_dir(&net, ConvertOptions::default(), &out).unwrap_err();
    assert!(matches!(err, GraphError::UnsupportedOperator { ref op_type, .. } if op_type == "Crop"));
    assert!(!out.join(STRUCTURE_FILE).exists());
}

#[test]
fn test_test_phase_layer_is_not_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut model = small_net();
    let layers = model["layer"].as_array_mut().unwrap();
    let prob = layers.pop().unwrap();
    layers.push(json!({"name": "accuracy", "type": "Accuracy", "bottom": ["fc7", "label"],
                       "top": ["accuracy"], "include": [{"phase": "TEST"}]}));
    layers.push(prob);
    let net = load_net_from_path(write_model(dir.path(), &model)).unwrap();
    let out = dir.path().join("out");

    let err = convert_to_dir(&net, ConvertOptions::default(), &out).unwrap_err();
    assert!(matches!(err, GraphError::UnsupportedOperator { ref op_type, .. } if op_type == "Accuracy"));
    assert!(!out.join(STRUCTURE_FILE).exists());
}

#[test]
fn test_failed_run_removes_previous_structure_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let net = load_net_from_path(write_model(dir.path(), &small_net())).unwrap();
    convert_to_dir(&net, ConvertOptions::default(), &out).unwrap();
    assert!(out.join(STRUCTURE_FILE).exists());

    let mut model = small_net();
    model["layer"]
        .as_array_mut()
        .unwrap()
        .push(json!({"name": "drop", "type": "Dropout", "bottom": ["prob"], "top": ["drop"]}));
    let net = load_net_from_path(write_model(dir.path(), &model)).unwrap();
    let err = convert_to_dir(&net, ConvertOptions::default(), &out).unwrap_err();
    assert!(matches!(err, GraphError::UnresolvedOutput { .. }));
    assert!(!out.join(STRUCTURE_FILE).exists());
}

#[test]
fn test_explicit_input_dims_override_input_layer() {
    let dir = tempfile::tempdir().unwrap();
    let net = load_net_from_path(write_model(dir.path(), &small_net())).unwrap();
    // Batch of two; the spatial size must match the trained fc6 weights.
    let graph = convert_to_dir(&net, ConvertOptions::new([2, 3, 16, 16]), dir.path()).unwrap();
    assert_eq!(graph.input_tensor().unwrap().shape, vec![2, 3, 16, 16]);
    assert_eq!(graph.output_tensor().unwrap().shape, vec![2, 5, 1, 1]);
}
