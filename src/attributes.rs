//! Per-operator attribute extraction and output shape inference.
//!
//! [`infer_operator`] is the single dispatch point: given a parsed
//! [`Operator`] and the shapes of its resolved data inputs it produces the IR
//! op type, the canonical attribute dictionary, the output shape and the shapes
//! the trained weight/bias blobs are expected to have.

use tracing::warn;

use crate::error::GraphError;
use crate::graph::{AttributeValue, Attributes, OpType, Shape};
use crate::layer::{
    ConvolutionParameter, LrnParameter, NormRegion, Operator, PoolingParameter,
};
use crate::shape_inference::{
    AxisWindow, Window2d, infer_concat_shape, infer_conv_shape, infer_deconv_shape,
    infer_identity_shape, infer_inner_product_shape, infer_pool_shape, nchw,
};

const DEFAULT_PAD: usize = 0;
const DEFAULT_STRIDE: usize = 1;
const DEFAULT_KERNEL: usize = 0;
const DEFAULT_DILATION: usize = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorInference {
    pub op_type: OpType,
    pub attributes: Attributes,
    pub output_shape: Shape,
    pub weight_shape: Option<Shape>,
    pub bias_shape: Option<Shape>,
}

/// Resolve one spatial field for the height axis: explicit scalar, then the
/// first repeated value, then the constant default.
fn resolve_h(explicit: Option<usize>, repeated: &[usize], default: usize) -> usize {
    explicit
        .or_else(|| repeated.first().copied())
        .unwrap_or(default)
}

/// Resolve one spatial field for the width axis: explicit scalar, then the
/// second repeated value, then whatever the height axis resolved to.
fn resolve_w(explicit: Option<usize>, repeated: &[usize], height: usize) -> usize {
    explicit
        .or_else(|| repeated.get(1).copied())
        .unwrap_or(height)
}

pub fn conv_window(param: &ConvolutionParameter) -> Window2d {
    let pad_h = resolve_h(param.pad_h, &param.pad, DEFAULT_PAD);
    let pad_w = resolve_w(param.pad_w, &param.pad, pad_h);
    let stride_h = resolve_h(param.stride_h, &param.stride, DEFAULT_STRIDE);
    let stride_w = resolve_w(param.stride_w, &param.stride, stride_h);
    let kernel_h = resolve_h(param.kernel_h, &param.kernel_size, DEFAULT_KERNEL);
    let kernel_w = resolve_w(param.kernel_w, &param.kernel_size, kernel_h);
    let dilation_h = resolve_h(None, &param.dilation, DEFAULT_DILATION);
    let dilation_w = resolve_w(None, &param.dilation, dilation_h);
    Window2d {
        h: AxisWindow {
            kernel: kernel_h,
            stride: stride_h,
            pad: pad_h,
            dilation: dilation_h,
        },
        w: AxisWindow {
            kernel: kernel_w,
            stride: stride_w,
            pad: pad_w,
            dilation: dilation_w,
        },
    }
}

/// Pooling window. Global pooling spans the whole input plane.
pub fn pool_window(param: &PoolingParameter, input_h: usize, input_w: usize) -> Window2d {
    if param.global_pooling {
        let global = |extent| AxisWindow {
            kernel: extent,
            stride: 1,
            pad: 0,
            dilation: DEFAULT_DILATION,
        };
        return Window2d {
            h: global(input_h),
            w: global(input_w),
        };
    }
    let pad_h = resolve_h(param.pad_h, &param.pad, DEFAULT_PAD);
    let pad_w = resolve_w(param.pad_w, &param.pad, pad_h);
    let stride_h = resolve_h(param.stride_h, &param.stride, DEFAULT_STRIDE);
    let stride_w = resolve_w(param.stride_w, &param.stride, stride_h);
    let kernel_h = resolve_h(param.kernel_h, &param.kernel_size, DEFAULT_KERNEL);
    let kernel_w = resolve_w(param.kernel_w, &param.kernel_size, kernel_h);
    Window2d {
        h: AxisWindow {
            kernel: kernel_h,
            stride: stride_h,
            pad: pad_h,
            dilation: DEFAULT_DILATION,
        },
        w: AxisWindow {
            kernel: kernel_w,
            stride: stride_w,
            pad: pad_w,
            dilation: DEFAULT_DILATION,
        },
    }
}

fn ints(values: &[usize]) -> AttributeValue {
    AttributeValue::Ints(values.iter().map(|&v| v as i64).collect())
}

/// IR window attributes are `[w, h]` pairs.
fn window_attributes(attributes: &mut Attributes, window: &Window2d) {
    attributes.set("strides", ints(&[window.w.stride, window.h.stride]));
    attributes.set("kernel_shape", ints(&[window.w.kernel, window.h.kernel]));
}

/// Symmetric `[left, top, right, bottom]` padding.
fn pads(window: &Window2d) -> AttributeValue {
    ints(&[window.w.pad, window.h.pad, window.w.pad, window.h.pad])
}

fn conv_attributes(param: &ConvolutionParameter, window: &Window2d) -> Attributes {
    let mut attributes = Attributes::new();
    window_attributes(&mut attributes, window);
    attributes.set("group", AttributeValue::Int(param.group.unwrap_or(1) as i64));
    attributes.set("pads", pads(window));
    attributes.set("dilations", ints(&[window.w.dilation, window.h.dilation]));
    attributes
}

fn lrn_attributes(param: &LrnParameter) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.set("alpha", AttributeValue::Float(param.alpha));
    attributes.set("beta", AttributeValue::Float(param.beta));
    attributes.set("size", AttributeValue::Int(param.local_size as i64));
    attributes.set("bias", AttributeValue::Float(param.k));
    let mode = match param.norm_region {
        NormRegion::AcrossChannels => 0,
        NormRegion::WithinChannel => 1,
    };
    attributes.set("mode", AttributeValue::Int(mode));
    attributes
}

/// Infer attributes and shapes for one retained layer.
///
/// `inputs` holds the shapes of the resolved data inputs in declared order;
/// at least one is required.
pub fn infer_operator(
    layer: &str,
    operator: &Operator,
    inputs: &[Shape],
) -> Result<OperatorInference, GraphError> {
    let Some(first) = inputs.first() else {
        return Err(GraphError::UnresolvedInput {
            layer: layer.to_string(),
            name: "<none>".to_string(),
        });
    };
    let op_type = operator.op_type();

    let inference = match operator {
        Operator::Convolution(param) | Operator::Deconvolution(param) => {
            let window = conv_window(param);
            let (_, in_channels, _, _) = nchw(layer, first)?;
            let output_shape = if matches!(operator, Operator::Convolution(_)) {
                infer_conv_shape(layer, first, param.num_output, &window)?
            } else {
                infer_deconv_shape(layer, first, param.num_output, &window)?
            };
            OperatorInference {
                op_type,
                attributes: conv_attributes(param, &window),
                output_shape,
                weight_shape: Some(vec![
                    param.num_output,
                    in_channels,
                    window.h.kernel,
                    window.w.kernel,
                ]),
                bias_shape: param.bias_term.then(|| vec![param.num_output]),
            }
        }
        Operator::Pooling(param) => {
            let (_, _, h, w) = nchw(layer, first)?;
            let window = pool_window(param, h, w);
            let mut attributes = Attributes::new();
            window_attributes(&mut attributes, &window);
            attributes.set("pads", pads(&window));
            attributes.set("dilations", ints(&[0, 0]));
            OperatorInference {
                op_type,
                attributes,
                output_shape: infer_pool_shape(layer, first, &window)?,
                weight_shape: None,
                bias_shape: None,
            }
        }
        Operator::InnerProduct(param) => {
            let (_, c, h, w) = nchw(layer, first)?;
            let mut attributes = Attributes::new();
            attributes.set("broadcast", AttributeValue::Int(1));
            attributes.set("transB", AttributeValue::Int(1));
            OperatorInference {
                op_type,
                attributes,
                output_shape: infer_inner_product_shape(layer, first, param.num_output)?,
                weight_shape: Some(vec![param.num_output, c, h, w]),
                bias_shape: param.bias_term.then(|| vec![param.num_output]),
            }
        }
        Operator::Lrn(param) => OperatorInference {
            op_type,
            attributes: lrn_attributes(param),
            output_shape: infer_identity_shape(layer, first)?,
            weight_shape: None,
            bias_shape: None,
        },
        Operator::BatchNorm(param) => {
            let mut attributes = Attributes::new();
            attributes.set("epsilon", AttributeValue::Float(param.eps));
            OperatorInference {
                op_type,
                attributes,
                output_shape: infer_identity_shape(layer, first)?,
                weight_shape: None,
                bias_shape: None,
            }
        }
        Operator::Concat => {
            if let Some(mismatch) = inputs.iter().find(|shape| {
                shape.len() != first.len()
                    || shape
                        .iter()
                        .zip(first.iter())
                        .enumerate()
                        .any(|(axis, (a, b))| axis != 1 && a != b)
            }) {
                warn!(
                    layer,
                    ?first,
                    ?mismatch,
                    "concat inputs disagree outside the channel axis"
                );
            }
            OperatorInference {
                op_type,
                attributes: Attributes::new(),
                output_shape: infer_concat_shape(layer, inputs)?,
                weight_shape: None,
                bias_shape: None,
            }
        }
        Operator::Eltwise(_) | Operator::Relu | Operator::Softmax => OperatorInference {
            op_type,
            attributes: Attributes::new(),
            output_shape: infer_identity_shape(layer, first)?,
            weight_shape: None,
            bias_shape: None,
        },
    };
    Ok(inference)
}
