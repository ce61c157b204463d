//! NNIR artifact writer.
//!
//! A converted graph is stored as a directory holding `graph.nnir`, a line
//! oriented structure description, and one `<tensor>.raw` payload per
//! variable. The structure file is written last and atomically, so its
//! presence marks a complete export.

use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::GraphError;
use crate::graph::{Graph, Node, Tensor, TensorKind};

pub const STRUCTURE_FILE: &str = "graph.nnir";
const STRUCTURE_TMP: &str = "graph.nnir.tmp";

fn section(kind: TensorKind) -> &'static str {
    match kind {
        TensorKind::Input => "input",
        TensorKind::Output => "output",
        TensorKind::Variable => "initializer",
        TensorKind::Local => "local",
    }
}

fn join<T: ToString>(values: impl IntoIterator<Item = T>) -> String {
    values
        .into_iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn tensor_line(tensor: &Tensor) -> String {
    format!(
        "{}|{};{};{}",
        section(tensor.kind),
        tensor.name,
        tensor.data_type,
        join(&tensor.shape)
    )
}

fn node_line(node: &Node) -> String {
    let attributes = node
        .attributes
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(";");
    format!(
        "node|{}|{}|{}|{}",
        node.op_type,
        node.inputs.join(","),
        node.outputs.join(","),
        attributes
    )
}

/// Render the structure file: tensors grouped by kind (inputs, outputs,
/// initializers, locals; each in insertion order) followed by the nodes.
pub fn render_structure(graph: &Graph) -> String {
    let mut text = String::new();
    for kind in [
        TensorKind::Input,
        TensorKind::Output,
        TensorKind::Variable,
        TensorKind::Local,
    ] {
        for tensor in graph.tensors_of_kind(kind) {
            let _ = writeln!(text, "{}", tensor_line(tensor));
        }
    }
    for node in &graph.nodes {
        let _ = writeln!(text, "{}", node_line(node));
    }
    text
}

/// Remove a structure file left by an earlier run, so that a run failing
/// midway leaves no `graph.nnir` behind in a reused directory.
pub fn clear_structure(out_dir: impl AsRef<Path>) -> Result<(), GraphError> {
    let target = out_dir.as_ref().join(STRUCTURE_FILE);
    match fs::remove_file(&target) {
        Ok(()) => {
            debug!(path = %target.display(), "removed stale structure file");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(GraphError::export(&target, err)),
    }
}

pub fn raw_path(dir: &Path, tensor: &str) -> PathBuf {
    dir.join(format!("{}.raw", tensor))
}

/// Validate `graph` and write its artifacts into `out_dir`, creating the
/// directory if needed.
pub fn write_graph(graph: &Graph, out_dir: impl AsRef<Path>) -> Result<(), GraphError> {
    graph.validate()?;
    let dir = out_dir.as_ref();
    fs::create_dir_all(dir).map_err(|err| GraphError::export(dir, err))?;
    clear_structure(dir)?;

    for (name, payload) in &graph.binaries {
        let path = raw_path(dir, name);
        fs::write(&path, payload).map_err(|err| GraphError::export(&path, err))?;
        debug!(tensor = %name, bytes = payload.len(), "wrote variable payload");
    }

    let tmp = dir.join(STRUCTURE_TMP);
    let target = dir.join(STRUCTURE_FILE);
    fs::write(&tmp, render_structure(graph)).map_err(|err| GraphError::export(&tmp, err))?;
    fs::rename(&tmp, &target).map_err(|err| GraphError::export(&target, err))?;
    info!(
        path = %target.display(),
        tensors = graph.tensors.len(),
        nodes = graph.nodes.len(),
        variables = graph.binaries.len(),
        "wrote graph"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::pack_f32_le;
    use crate::graph::{AttributeValue, Attributes, DataType, GraphBuilder, OpType};

    fn fc_graph() -> Graph {
        let mut builder = GraphBuilder::new();
        builder.add_input("data", vec![1, 2, 1, 1]).unwrap();
        builder
            .add_variable(
                "fc_w",
                DataType::F064,
                vec![3, 2, 1, 1],
                pack_f32_le([0.0, 1.0, 2.0, 3.0, 4.0, 5.0]),
            )
            .unwrap();
        builder
            .add_tensor(Tensor::new(
                "fc",
                TensorKind::Local,
                DataType::F032,
                vec![1, 3, 1, 1],
            ))
            .unwrap();
        let mut attributes = Attributes::new();
        attributes.set("broadcast", AttributeValue::Int(1));
        attributes.set("transB", AttributeValue::Int(1));
        builder.add_node(Node {
            op_type: OpType::Gemm,
            inputs: vec!["data".to_string(), "fc_w".to_string()],
            outputs: vec!["fc".to_string()],
            attributes,
            label: "fc".to_string(),
        });
        builder.mark_output("fc").unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn test_render_structure() {
        let text = render_structure(&fc_graph());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "input|data;F032;1,2,1,1",
                "output|fc;F032;1,3,1,1",
                "initializer|fc_w;F064;3,2,1,1",
                "node|gemm|data,fc_w|fc|broadcast=1;transB=1",
            ]
        );
    }

    #[test]
    fn test_node_line_with_list_attributes() {
        let mut attributes = Attributes::new();
        attributes.set("strides", AttributeValue::Ints(vec![2, 2]));
        attributes.set("group", AttributeValue::Int(1));
        let node = Node {
            op_type: OpType::Conv,
            inputs: vec!["data".into(), "c_w".into(), "c_b".into()],
            outputs: vec!["c".into()],
            attributes,
            label: "c".into(),
        };
        assert_eq!(node_line(&node), "node|conv|data,c_w,c_b|c|strides=2,2;group=1");
    }

    #[test]
    fn test_write_graph_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("model");
        let graph = fc_graph();
        write_graph(&graph, &out).unwrap();

        let raw = fs::read(raw_path(&out, "fc_w")).unwrap();
        assert_eq!(raw.len(), 4 * 6);
        assert_eq!(&raw[4..8], &1.0f32.to_le_bytes());
        let structure = fs::read_to_string(out.join(STRUCTURE_FILE)).unwrap();
        assert_eq!(structure, render_structure(&graph));
        assert!(!out.join(STRUCTURE_TMP).exists());
    }

    #[test]
    fn test_rewrite_replaces_stale_structure() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STRUCTURE_FILE), "stale").unwrap();
        clear_structure(dir.path()).unwrap();
        assert!(!dir.path().join(STRUCTURE_FILE).exists());
        // Clearing an empty directory is a no-op.
        clear_structure(dir.path()).unwrap();

        let graph = fc_graph();
        write_graph(&graph, dir.path()).unwrap();
        let structure = fs::read_to_string(dir.path().join(STRUCTURE_FILE)).unwrap();
        assert_eq!(structure, render_structure(&graph));
    }

    #[test]
    fn test_invalid_graph_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut graph = fc_graph();
        graph.binaries.insert("fc_w".to_string(), vec![0; 3]);
        let err = write_graph(&graph, dir.path()).unwrap_err();
        assert!(matches!(err, GraphError::InvalidGraph { .. }));
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
