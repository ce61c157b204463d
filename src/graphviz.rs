use std::fmt::Write;

use crate::graph::{Graph, TensorKind};

pub fn graph_to_dot(graph: &Graph) -> String {
    let mut dot = String::from("digraph nnir {\n");
    dot.push_str("  rankdir=LR;\n");
    dot.push_str("  node [fontname=\"Helvetica\"];\n");
    dot.push_str("  edge [fontname=\"Helvetica\"];\n\n");

    for tensor in &graph.tensors {
        let (shape, fill) = match tensor.kind {
            TensorKind::Input => ("oval", "#d0e6ff"),
            TensorKind::Variable => ("diamond", "#f0f0f0"),
            TensorKind::Output => ("doublecircle", "#d6f5d6"),
            TensorKind::Local => ("ellipse", "#ffffff"),
        };
        let label = escape_label(&format!(
            "{}\n{}\n{}",
            tensor.name,
            tensor.data_type,
            format_shape(&tensor.shape)
        ));
        let _ = writeln!(
            dot,
            "  \"t_{}\" [shape={},style=filled,fillcolor=\"{}\",label=\"{}\"];",
            escape_label(&tensor.name),
            shape,
            fill,
            label
        );
    }

    dot.push('\n');

    for (idx, node) in graph.nodes.iter().enumerate() {
        let node_id = format!("op_{}", idx);
        let mut label_lines = vec![format!("{} (#{})", node.op_type, idx)];
        if !node.label.is_empty() && node.label != node.op_type.as_str() {
            label_lines.push(node.label.clone());
        }
        let label = escape_label(&label_lines.join("\n"));
        let _ = writeln!(
            dot,
            "  {} [shape=box,style=rounded,label=\"{}\"];",
            node_id, label
        );

        for (input_idx, input) in node.inputs.iter().enumerate() {
            let _ = writeln!(
                dot,
                "  \"t_{}\" -> {} [label=\"in{}\"];",
                escape_label(input),
                node_id,
                input_idx
            );
        }
        for output in &node.outputs {
            let _ = writeln!(
                dot,
                "  {} -> \"t_{}\" [label=\"out\"];",
                node_id,
                escape_label(output)
            );
        }
    }

    dot.push_str("}\n");
    dot
}

fn format_shape(shape: &[usize]) -> String {
    if shape.is_empty() {
        "scalar".to_string()
    } else {
        let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
        format!("[{}]", dims.join("x"))
    }
}

fn escape_label(label: &str) -> String {
    label
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
