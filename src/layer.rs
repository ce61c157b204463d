//! Decoded Caffe network description.
//!
//! These types mirror the field names of Caffe's `NetParameter`/`LayerParameter`
//! messages so that a decoded model can be handed over as JSON. Nothing here
//! interprets the parameters; [`LayerDescriptor::kind`] turns the free-form
//! `type` string into the closed set of layer kinds the converter understands.

use serde::{Deserialize, Serialize};
use serde_with::{OneOrMany, formats::PreferMany, serde_as};

use crate::error::GraphError;
use crate::graph::OpType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    /// Explicit root inputs (`input:` entries of a deploy prototxt).
    #[serde(default)]
    pub input: Vec<String>,
    #[serde(default)]
    pub layer: Vec<LayerDescriptor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlobDescriptor {
    #[serde(default)]
    pub shape: Vec<usize>,
    #[serde(default)]
    pub data: Vec<f32>,
    #[serde(default)]
    pub double_data: Vec<f64>,
}

impl BlobDescriptor {
    pub fn from_f32(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            shape,
            data,
            double_data: Vec::new(),
        }
    }

    pub fn from_f64(shape: Vec<usize>, double_data: Vec<f64>) -> Self {
        Self {
            shape,
            data: Vec::new(),
            double_data,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    #[serde(default)]
    pub bottom: Vec<String>,
    #[serde(default)]
    pub top: Vec<String>,
    #[serde(default)]
    pub blobs: Vec<BlobDescriptor>,
    #[serde(default)]
    pub input_param: Option<InputParameter>,
    #[serde(default)]
    pub convolution_param: Option<ConvolutionParameter>,
    #[serde(default)]
    pub pooling_param: Option<PoolingParameter>,
    #[serde(default)]
    pub inner_product_param: Option<InnerProductParameter>,
    #[serde(default)]
    pub lrn_param: Option<LrnParameter>,
    #[serde(default)]
    pub batch_norm_param: Option<BatchNormParameter>,
    #[serde(default)]
    pub eltwise_param: Option<EltwiseParameter>,
}

impl LayerDescriptor {
    pub fn new(name: &str, layer_type: &str, bottom: &[&str], top: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            layer_type: layer_type.to_string(),
            bottom: bottom.iter().map(ToString::to_string).collect(),
            top: top.iter().map(ToString::to_string).collect(),
            ..Default::default()
        }
    }

    /// Classify the layer. Unknown `type` strings are rejected here so that the
    /// rest of the pipeline only ever sees supported operators.
    pub fn kind(&self) -> Result<LayerKind, GraphError> {
        let kind = match self.layer_type.as_str() {
            "Data" | "ImageData" | "Input" => LayerKind::Data,
            "Dropout" => LayerKind::PassThrough(PassThrough::Dropout),
            "Split" => LayerKind::PassThrough(PassThrough::Split),
            "Convolution" => LayerKind::Operator(Operator::Convolution(
                self.convolution_param.clone().unwrap_or_default(),
            )),
            "Deconvolution" => LayerKind::Operator(Operator::Deconvolution(
                self.convolution_param.clone().unwrap_or_default(),
            )),
            "Pooling" => LayerKind::Operator(Operator::Pooling(
                self.pooling_param.clone().unwrap_or_default(),
            )),
            "InnerProduct" => LayerKind::Operator(Operator::InnerProduct(
                self.inner_product_param.clone().unwrap_or_default(),
            )),
            "LRN" => LayerKind::Operator(Operator::Lrn(
                self.lrn_param.clone().unwrap_or_default(),
            )),
            "BatchNorm" => LayerKind::Operator(Operator::BatchNorm(
                self.batch_norm_param.clone().unwrap_or_default(),
            )),
            "Eltwise" => LayerKind::Operator(Operator::Eltwise(
                self.eltwise_param.clone().unwrap_or_default(),
            )),
            "ReLU" => LayerKind::Operator(Operator::Relu),
            "Concat" => LayerKind::Operator(Operator::Concat),
            "Softmax" | "SoftmaxWithLoss" => LayerKind::Operator(Operator::Softmax),
            other => {
                return Err(GraphError::UnsupportedOperator {
                    layer: self.name.clone(),
                    op_type: other.to_string(),
                });
            }
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone)]
pub enum LayerKind {
    /// Feeds the graph input; emits no node.
    Data,
    PassThrough(PassThrough),
    Operator(Operator),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassThrough {
    Dropout,
    Split,
}

#[derive(Debug, Clone)]
pub enum Operator {
    Convolution(ConvolutionParameter),
    Deconvolution(ConvolutionParameter),
    Pooling(PoolingParameter),
    InnerProduct(InnerProductParameter),
    Lrn(LrnParameter),
    BatchNorm(BatchNormParameter),
    Eltwise(EltwiseParameter),
    Relu,
    Concat,
    /// Softmax and SoftmaxWithLoss; only the first input is mandatory.
    Softmax,
}

impl Operator {
    pub fn op_type(&self) -> OpType {
        match self {
            Operator::Convolution(_) => OpType::Conv,
            Operator::Deconvolution(_) => OpType::ConvTranspose,
            Operator::Pooling(param) => match param.pool {
                PoolMethod::Max => OpType::MaxPool,
                PoolMethod::Ave | PoolMethod::Stochastic => OpType::AvgPool,
            },
            Operator::InnerProduct(_) => OpType::Gemm,
            Operator::Lrn(_) => OpType::Lrn,
            Operator::BatchNorm(_) => OpType::BatchNorm,
            Operator::Eltwise(param) => match param.operation {
                EltwiseOp::Prod => OpType::Mul,
                EltwiseOp::Sum => OpType::Sum,
                EltwiseOp::Max => OpType::Max,
            },
            Operator::Relu => OpType::Relu,
            Operator::Concat => OpType::Concat,
            Operator::Softmax => OpType::Softmax,
        }
    }

    pub fn is_softmax(&self) -> bool {
        matches!(self, Operator::Softmax)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlobShape {
    #[serde(default)]
    pub dim: Vec<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputParameter {
    #[serde(default)]
    pub shape: Vec<BlobShape>,
}

impl InputParameter {
    /// The first declared shape, when it is a full NCHW shape.
    pub fn nchw(&self) -> Option<[usize; 4]> {
        let dims = &self.shape.first()?.dim;
        match dims.as_slice() {
            &[n, c, h, w] => Some([n, c, h, w]),
            _ => None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvolutionParameter {
    #[serde(default)]
    pub num_output: usize,
    #[serde(default = "default_true")]
    pub bias_term: bool,
    #[serde_as(as = "OneOrMany<_, PreferMany>")]
    #[serde(default)]
    pub pad: Vec<usize>,
    #[serde_as(as = "OneOrMany<_, PreferMany>")]
    #[serde(default)]
    pub kernel_size: Vec<usize>,
    #[serde_as(as = "OneOrMany<_, PreferMany>")]
    #[serde(default)]
    pub stride: Vec<usize>,
    #[serde_as(as = "OneOrMany<_, PreferMany>")]
    #[serde(default)]
    pub dilation: Vec<usize>,
    #[serde(default)]
    pub pad_h: Option<usize>,
    #[serde(default)]
    pub pad_w: Option<usize>,
    #[serde(default)]
    pub kernel_h: Option<usize>,
    #[serde(default)]
    pub kernel_w: Option<usize>,
    #[serde(default)]
    pub stride_h: Option<usize>,
    #[serde(default)]
    pub stride_w: Option<usize>,
    #[serde(default)]
    pub group: Option<usize>,
}

impl Default for ConvolutionParameter {
    fn default() -> Self {
        Self {
            num_output: 0,
            bias_term: true,
            pad: Vec::new(),
            kernel_size: Vec::new(),
            stride: Vec::new(),
            dilation: Vec::new(),
            pad_h: None,
            pad_w: None,
            kernel_h: None,
            kernel_w: None,
            stride_h: None,
            stride_w: None,
            group: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolMethod {
    #[default]
    Max,
    Ave,
    Stochastic,
}

#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolingParameter {
    #[serde(default)]
    pub pool: PoolMethod,
    #[serde_as(as = "OneOrMany<_, PreferMany>")]
    #[serde(default)]
    pub pad: Vec<usize>,
    #[serde_as(as = "OneOrMany<_, PreferMany>")]
    #[serde(default)]
    pub kernel_size: Vec<usize>,
    #[serde_as(as = "OneOrMany<_, PreferMany>")]
    #[serde(default)]
    pub stride: Vec<usize>,
    #[serde(default)]
    pub pad_h: Option<usize>,
    #[serde(default)]
    pub pad_w: Option<usize>,
    #[serde(default)]
    pub kernel_h: Option<usize>,
    #[serde(default)]
    pub kernel_w: Option<usize>,
    #[serde(default)]
    pub stride_h: Option<usize>,
    #[serde(default)]
    pub stride_w: Option<usize>,
    #[serde(default)]
    pub global_pooling: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InnerProductParameter {
    #[serde(default)]
    pub num_output: usize,
    #[serde(default = "default_true")]
    pub bias_term: bool,
}

impl Default for InnerProductParameter {
    fn default() -> Self {
        Self {
            num_output: 0,
            bias_term: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NormRegion {
    #[default]
    AcrossChannels,
    WithinChannel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LrnParameter {
    pub local_size: usize,
    pub alpha: f32,
    pub beta: f32,
    pub k: f32,
    pub norm_region: NormRegion,
}

impl Default for LrnParameter {
    fn default() -> Self {
        Self {
            local_size: 5,
            alpha: 1.0,
            beta: 0.75,
            k: 1.0,
            norm_region: NormRegion::AcrossChannels,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchNormParameter {
    pub eps: f32,
}

impl Default for BatchNormParameter {
    fn default() -> Self {
        Self {
            eps: 1e-5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EltwiseOp {
    Prod,
    #[default]
    Sum,
    Max,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EltwiseParameter {
    #[serde(default)]
    pub operation: EltwiseOp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_rejects_unknown_type() {
        let layer = LayerDescriptor::new("crop1", "Crop", &["a"], &["b"]);
        match layer.kind() {
            Err(GraphError::UnsupportedOperator { layer, op_type }) => {
                assert_eq!(layer, "crop1");
                assert_eq!(op_type, "Crop");
            }
            other => panic!("expected unsupported operator, got {:?}", other),
        }
    }

    #[test]
    fn test_kind_classifies_special_layers() {
        for ty in ["Data", "ImageData", "Input"] {
            let layer = LayerDescriptor::new("data", ty, &[], &["data"]);
            assert!(matches!(layer.kind().unwrap(), LayerKind::Data));
        }
        let dropout = LayerDescriptor::new("drop", "Dropout", &["a"], &["b"]);
        assert!(matches!(
            dropout.kind().unwrap(),
            LayerKind::PassThrough(PassThrough::Dropout)
        ));
        let split = LayerDescriptor::new("split", "Split", &["a"], &["b", "c"]);
        assert!(matches!(
            split.kind().unwrap(),
            LayerKind::PassThrough(PassThrough::Split)
        ));
    }

    #[test]
    fn test_op_type_mapping() {
        let mut pool = LayerDescriptor::new("pool", "Pooling", &["a"], &["b"]);
        let LayerKind::Operator(op) = pool.kind().unwrap() else {
            panic!("pooling must be an operator");
        };
        assert_eq!(op.op_type(), OpType::MaxPool);

        pool.pooling_param = Some(PoolingParameter {
            pool: PoolMethod::Ave,
            ..Default::default()
        });
        let LayerKind::Operator(op) = pool.kind().unwrap() else {
            panic!("pooling must be an operator");
        };
        assert_eq!(op.op_type(), OpType::AvgPool);

        let loss = LayerDescriptor::new("loss", "SoftmaxWithLoss", &["fc", "label"], &["loss"]);
        let LayerKind::Operator(op) = loss.kind().unwrap() else {
            panic!("softmax must be an operator");
        };
        assert!(op.is_softmax());
        assert_eq!(op.op_type(), OpType::Softmax);
    }

    #[test]
    fn test_deserialize_scalar_or_repeated_fields() {
        let json = r#"{
            "name": "conv1",
            "type": "Convolution",
            "bottom": ["data"],
            "top": ["conv1"],
            "convolution_param": {"num_output": 64, "kernel_size": 7, "stride": [2], "pad": 3}
        }"#;
        let layer: LayerDescriptor = serde_json::from_str(json).unwrap();
        let param = layer.convolution_param.unwrap();
        assert_eq!(param.num_output, 64);
        assert_eq!(param.kernel_size, vec![7]);
        assert_eq!(param.stride, vec![2]);
        assert_eq!(param.pad, vec![3]);
        assert!(param.bias_term);
        assert!(param.dilation.is_empty());
    }

    #[test]
    fn test_phase_rules_do_not_hide_unknown_types() {
        let layer: LayerDescriptor = serde_json::from_str(
            r#"{"name": "accuracy", "type": "Accuracy", "bottom": ["fc8", "label"],
                "top": ["acc"], "include": [{"phase": "TEST"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            layer.kind(),
            Err(GraphError::UnsupportedOperator { op_type, .. }) if op_type == "Accuracy"
        ));
    }

    #[test]
    fn test_input_param_nchw() {
        let param = InputParameter {
            shape: vec![BlobShape {
                dim: vec![1, 3, 224, 224],
            }],
        };
        assert_eq!(param.nchw(), Some([1, 3, 224, 224]));
        assert_eq!(InputParameter::default().nchw(), None);
    }
}
