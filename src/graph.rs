use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::error::GraphError;

pub type Shape = Vec<usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F032,
    F064,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::F032 => "F032",
            DataType::F064 => "F064",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorKind {
    Input,
    Output,
    /// Intermediate result produced by a node.
    Local,
    /// Trained parameter with a binary payload.
    Variable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
    pub name: String,
    pub kind: TensorKind,
    pub data_type: DataType,
    pub shape: Shape,
}

impl Tensor {
    pub fn new(name: impl Into<String>, kind: TensorKind, data_type: DataType, shape: Shape) -> Self {
        Self {
            name: name.into(),
            kind,
            data_type,
            shape,
        }
    }

    pub fn element_count(&self) -> Option<usize> {
        element_count(&self.shape)
    }
}

/// Number of elements described by `shape`, `None` on overflow.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape
        .iter()
        .try_fold(1usize, |count, &dim| count.checked_mul(dim))
}

/// IR operator names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    Conv,
    ConvTranspose,
    MaxPool,
    AvgPool,
    Gemm,
    Relu,
    Lrn,
    BatchNorm,
    Sum,
    Mul,
    Max,
    Concat,
    Softmax,
}

impl OpType {
    pub fn as_str(self) -> &'static str {
        match self {
            OpType::Conv => "conv",
            OpType::ConvTranspose => "conv_transpose",
            OpType::MaxPool => "max_pool",
            OpType::AvgPool => "avg_pool",
            OpType::Gemm => "gemm",
            OpType::Relu => "relu",
            OpType::Lrn => "lrn",
            OpType::BatchNorm => "batch_norm",
            OpType::Sum => "sum",
            OpType::Mul => "mul",
            OpType::Max => "max",
            OpType::Concat => "concat",
            OpType::Softmax => "softmax",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Int(i64),
    Float(f32),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T: ToString>(values: &[T]) -> String {
            values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        }
        match self {
            AttributeValue::Int(value) => write!(f, "{}", value),
            AttributeValue::Float(value) => write!(f, "{}", value),
            AttributeValue::Ints(values) => f.write_str(&join(values)),
            AttributeValue::Floats(values) => f.write_str(&join(values)),
        }
    }
}

/// Attribute dictionary that keeps insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<(String, AttributeValue)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: AttributeValue) {
        match self.0.iter_mut().find(|(key, _)| key == name) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn ints(&self, name: &str) -> Option<&[i64]> {
        match self.get(name)? {
            AttributeValue::Ints(values) => Some(values),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub op_type: OpType,
    /// Data inputs in declared order, then weight, then bias.
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: Attributes,
    /// Normalized name of the originating layer.
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct Graph {
    pub tensors: Vec<Tensor>,
    pub nodes: Vec<Node>,
    pub input: String,
    pub output: String,
    /// Packed little-endian f32 payload per variable tensor.
    pub binaries: BTreeMap<String, Vec<u8>>,
}

impl Graph {
    pub fn tensor(&self, name: &str) -> Option<&Tensor> {
        self.tensors.iter().find(|tensor| tensor.name == name)
    }

    pub fn tensors_of_kind(&self, kind: TensorKind) -> impl Iterator<Item = &Tensor> {
        self.tensors.iter().filter(move |tensor| tensor.kind == kind)
    }

    pub fn input_tensor(&self) -> Option<&Tensor> {
        self.tensor(&self.input)
    }

    pub fn output_tensor(&self) -> Option<&Tensor> {
        self.tensor(&self.output)
    }

    /// Check the structural invariants: unique names, every node reference
    /// declared, every non-input non-variable tensor produced exactly once and
    /// every variable backed by a payload of the right size.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut declared = HashMap::with_capacity(self.tensors.len());
        for tensor in &self.tensors {
            if declared.insert(tensor.name.as_str(), tensor).is_some() {
                return Err(GraphError::DuplicateTensor {
                    name: tensor.name.clone(),
                });
            }
        }

        match declared.get(self.input.as_str()) {
            Some(tensor) if tensor.kind == TensorKind::Input => {}
            _ => {
                return Err(GraphError::invalid_graph(format!(
                    "graph input `{}` is not declared as an input tensor",
                    self.input
                )));
            }
        }
        match declared.get(self.output.as_str()) {
            Some(tensor) if tensor.kind == TensorKind::Output => {}
            _ => {
                return Err(GraphError::invalid_graph(format!(
                    "graph output `{}` is not declared as an output tensor",
                    self.output
                )));
            }
        }

        let mut produced = HashSet::new();
        for node in &self.nodes {
            for name in node.inputs.iter().chain(node.outputs.iter()) {
                if !declared.contains_key(name.as_str()) {
                    return Err(GraphError::invalid_graph(format!(
                        "node `{}` references undeclared tensor `{}`",
                        node.label, name
                    )));
                }
            }
            for name in &node.outputs {
                if !produced.insert(name.as_str()) {
                    return Err(GraphError::invalid_graph(format!(
                        "tensor `{}` is produced more than once",
                        name
                    )));
                }
            }
        }

        for tensor in &self.tensors {
            match tensor.kind {
                TensorKind::Input | TensorKind::Variable => {
                    if produced.contains(tensor.name.as_str()) {
                        return Err(GraphError::invalid_graph(format!(
                            "tensor `{}` is both a graph source and a node output",
                            tensor.name
                        )));
                    }
                }
                TensorKind::Local | TensorKind::Output => {
                    if !produced.contains(tensor.name.as_str()) {
                        return Err(GraphError::invalid_graph(format!(
                            "tensor `{}` is never produced",
                            tensor.name
                        )));
                    }
                }
            }
            if tensor.kind == TensorKind::Variable {
                let payload = self.binaries.get(&tensor.name).ok_or_else(|| {
                    GraphError::invalid_graph(format!("variable `{}` has no payload", tensor.name))
                })?;
                let expected = tensor.element_count().and_then(|count| count.checked_mul(4));
                if expected != Some(payload.len()) {
                    return Err(GraphError::invalid_graph(format!(
                        "variable `{}` payload holds {} bytes for shape {:?}",
                        tensor.name,
                        payload.len(),
                        tensor.shape
                    )));
                }
            }
        }
        if self.binaries.len() != self.tensors_of_kind(TensorKind::Variable).count() {
            return Err(GraphError::invalid_graph(
                "binary payloads without a variable tensor",
            ));
        }
        Ok(())
    }
}

/// Accumulates tensors and nodes in retained-layer order.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    tensors: Vec<Tensor>,
    index: HashMap<String, usize>,
    nodes: Vec<Node>,
    binaries: BTreeMap<String, Vec<u8>>,
    input: Option<String>,
    output: Option<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn add_tensor(&mut self, tensor: Tensor) -> Result<(), GraphError> {
        if self.index.contains_key(&tensor.name) {
            return Err(GraphError::DuplicateTensor { name: tensor.name });
        }
        self.index.insert(tensor.name.clone(), self.tensors.len());
        self.tensors.push(tensor);
        Ok(())
    }

    pub fn add_input(&mut self, name: &str, shape: Shape) -> Result<(), GraphError> {
        self.add_tensor(Tensor::new(name, TensorKind::Input, DataType::F032, shape))?;
        self.input = Some(name.to_string());
        Ok(())
    }

    pub fn add_variable(
        &mut self,
        name: &str,
        data_type: DataType,
        shape: Shape,
        payload: Vec<u8>,
    ) -> Result<(), GraphError> {
        self.add_tensor(Tensor::new(name, TensorKind::Variable, data_type, shape))?;
        self.binaries.insert(name.to_string(), payload);
        Ok(())
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    /// Promote an already produced local tensor to the graph output.
    pub fn mark_output(&mut self, name: &str) -> Result<(), GraphError> {
        let slot = self
            .index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnresolvedOutput {
                name: name.to_string(),
            })?;
        let tensor = &mut self.tensors[slot];
        if tensor.kind != TensorKind::Local {
            return Err(GraphError::UnresolvedOutput {
                name: name.to_string(),
            });
        }
        tensor.kind = TensorKind::Output;
        tensor.data_type = DataType::F032;
        self.output = Some(name.to_string());
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn finish(self) -> Result<Graph, GraphError> {
        let input = self
            .input
            .ok_or_else(|| GraphError::invalid_graph("graph input was never declared"))?;
        let output = self
            .output
            .ok_or_else(|| GraphError::invalid_graph("graph output was never declared"))?;
        let graph = Graph {
            tensors: self.tensors,
            nodes: self.nodes,
            input,
            output,
            binaries: self.binaries,
        };
        graph.validate()?;
        Ok(graph)
    }
}
