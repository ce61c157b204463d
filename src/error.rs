use std::path::PathBuf;

use serde_json::Error as JsonError;
use thiserror::Error;

use crate::graph::Shape;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("model file {path} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model JSON could not be parsed: {source}")]
    Parse {
        #[from]
        source: JsonError,
    },
    #[error("unsupported model: no layers declared, upgrade the model to the layer-style format")]
    EmptyModel,
    #[error("input dimensions {dims:?} must all be non-zero")]
    InvalidInputDims { dims: [usize; 4] },
    #[error("no input dimensions supplied and the model has no 4D Input layer shape")]
    MissingInputDims,
    #[error("layer `{layer}` declares a zero stride")]
    ZeroStride { layer: String },
    #[error("operation `{op_type}` of layer `{layer}` is not supported")]
    UnsupportedOperator { layer: String, op_type: String },
    #[error("unknown dimensions for {name} (consumed by layer `{layer}`)")]
    UnresolvedInput { layer: String, name: String },
    #[error("layer `{layer}` declares no output")]
    MissingLayerOutput { layer: String },
    #[error("blob `{blob}` holds {actual} elements but its shape {shape:?} needs {expected}")]
    MalformedBlob {
        blob: String,
        shape: Shape,
        expected: usize,
        actual: usize,
    },
    #[error("blob `{blob}` declares no shape and layer `{layer}` implies none")]
    BlobShapeUnknown { layer: String, blob: String },
    #[error("tensor `{name}` exceeds tensor byte limit ({byte_length} > {limit})")]
    TensorLimit {
        name: String,
        byte_length: usize,
        limit: usize,
    },
    #[error("layer `{layer}` produced invalid dimensions {shape:?}")]
    InvalidDimensions { layer: String, shape: Vec<i64> },
    #[error("layer `{layer}` expects a 4D input, got {shape:?}")]
    InvalidInputRank { layer: String, shape: Shape },
    #[error("tensor name `{name}` is declared twice")]
    DuplicateTensor { name: String },
    #[error("graph output `{name}` is not produced by the last node")]
    UnresolvedOutput { name: String },
    #[error("graph is inconsistent: {reason}")]
    InvalidGraph { reason: String },
    #[error("graph could not be exported to {path}: {source}")]
    ExportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GraphError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GraphError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn export(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GraphError::ExportIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_graph(reason: impl Into<String>) -> Self {
        GraphError::InvalidGraph {
            reason: reason.into(),
        }
    }
}
