//! Trained-parameter extraction.
//!
//! Blob #0 of a layer becomes its weight variable and blob #1 its bias; any
//! further blobs are not consumed. Whatever precision the blob was stored in,
//! the payload is packed as little-endian `f32`.

use crate::error::GraphError;
use crate::graph::{DataType, Shape, element_count};
use crate::layer::BlobDescriptor;
use crate::naming::{bias_name, weight_name};

#[derive(Debug, Clone, PartialEq)]
pub struct TrainedVariable {
    pub name: String,
    /// Precision of the source blob; the payload is always `f32`.
    pub data_type: DataType,
    pub shape: Shape,
    pub payload: Vec<u8>,
}

/// Narrow a double to single precision.
///
/// This is lossy. Rust's `as` conversion rounds to nearest with ties to even,
/// which is the rounding rule the IR consumers expect.
pub fn narrow_to_f32(value: f64) -> f32 {
    value as f32
}

/// Pack values as a contiguous little-endian IEEE-754 single precision sequence.
pub fn pack_f32_le(values: impl IntoIterator<Item = f32>) -> Vec<u8> {
    values
        .into_iter()
        .flat_map(|value| value.to_le_bytes())
        .collect()
}

/// Turn one blob into a variable.
///
/// A blob without a declared shape takes `implied_shape`, the shape the
/// consuming operator expects for this slot.
pub fn extract_variable(
    layer: &str,
    name: String,
    blob: &BlobDescriptor,
    implied_shape: Option<&Shape>,
    byte_limit: usize,
) -> Result<TrainedVariable, GraphError> {
    let shape = if !blob.shape.is_empty() {
        blob.shape.clone()
    } else if let Some(shape) = implied_shape {
        shape.clone()
    } else {
        return Err(GraphError::BlobShapeUnknown {
            layer: layer.to_string(),
            blob: name,
        });
    };

    let (data_type, actual) = if blob.double_data.is_empty() {
        (DataType::F032, blob.data.len())
    } else {
        (DataType::F064, blob.double_data.len())
    };
    let expected = element_count(&shape).ok_or_else(|| GraphError::TensorLimit {
        name: name.clone(),
        byte_length: usize::MAX,
        limit: byte_limit,
    })?;
    if expected != actual {
        return Err(GraphError::MalformedBlob {
            blob: name,
            shape,
            expected,
            actual,
        });
    }
    let byte_length = expected.saturating_mul(4);
    if byte_length > byte_limit {
        return Err(GraphError::TensorLimit {
            name,
            byte_length,
            limit: byte_limit,
        });
    }

    let payload = match data_type {
        DataType::F064 => pack_f32_le(blob.double_data.iter().copied().map(narrow_to_f32)),
        DataType::F032 => pack_f32_le(blob.data.iter().copied()),
    };
    Ok(TrainedVariable {
        name,
        data_type,
        shape,
        payload,
    })
}

/// Weight and bias variables of a retained layer, named `<layer>_w` and
/// `<layer>_b`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerVariables {
    pub weight: Option<TrainedVariable>,
    pub bias: Option<TrainedVariable>,
}

impl LayerVariables {
    pub fn into_variables(self) -> impl Iterator<Item = TrainedVariable> {
        self.weight.into_iter().chain(self.bias)
    }
}

pub fn extract_layer_variables(
    layer: &str,
    blobs: &[BlobDescriptor],
    weight_shape: Option<&Shape>,
    bias_shape: Option<&Shape>,
    byte_limit: usize,
) -> Result<LayerVariables, GraphError> {
    let weight = blobs
        .first()
        .map(|blob| extract_variable(layer, weight_name(layer), blob, weight_shape, byte_limit))
        .transpose()?;
    let bias = blobs
        .get(1)
        .map(|blob| extract_variable(layer, bias_name(layer), blob, bias_shape, byte_limit))
        .transpose()?;
    Ok(LayerVariables { weight, bias })
}
