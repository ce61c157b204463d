/// Shape inference for the supported Caffe operators
///
/// Activations are NCHW. Spatial formulas work on signed integers so that a
/// kernel larger than the padded input surfaces as an invalid (non-positive)
/// dimension instead of wrapping around.
use crate::error::GraphError;
use crate::graph::Shape;

/// Resolved spatial parameters of one axis (height or width).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisWindow {
    pub kernel: usize,
    pub stride: usize,
    pub pad: usize,
    pub dilation: usize,
}

/// Resolved window geometry for both spatial axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window2d {
    pub h: AxisWindow,
    pub w: AxisWindow,
}

/// Split a 4D activation shape into (N, C, H, W).
pub fn nchw(layer: &str, shape: &[usize]) -> Result<(usize, usize, usize, usize), GraphError> {
    match *shape {
        [n, c, h, w] => Ok((n, c, h, w)),
        _ => Err(GraphError::InvalidInputRank {
            layer: layer.to_string(),
            shape: shape.to_vec(),
        }),
    }
}

/// Reject shapes that contain a dimension below one.
pub fn checked_shape(layer: &str, dims: [i64; 4]) -> Result<Shape, GraphError> {
    if dims.iter().any(|&dim| dim < 1) {
        return Err(GraphError::InvalidDimensions {
            layer: layer.to_string(),
            shape: dims.to_vec(),
        });
    }
    Ok(dims.iter().map(|&dim| dim as usize).collect())
}

/// Reject windows with a zero stride on either axis.
pub fn check_window(layer: &str, window: &Window2d) -> Result<(), GraphError> {
    if window.h.stride == 0 || window.w.stride == 0 {
        return Err(GraphError::ZeroStride {
            layer: layer.to_string(),
        });
    }
    Ok(())
}

/// Convolution output extent along one axis. The stride must be non-zero.
///
/// Formula: floor((in + 2*pad - kernel - (kernel-1)*(dilation-1)) / stride) + 1
pub fn conv_output_dim(input: usize, axis: &AxisWindow) -> i64 {
    let (input, kernel, stride, pad, dilation) = signed(input, axis);
    let span = input + 2 * pad - kernel - (kernel - 1) * (dilation - 1);
    span.div_euclid(stride) + 1
}

/// Transposed convolution output extent along one axis.
///
/// Formula: stride*(in-1) + dilation*(kernel-1) + 1 - 2*pad
pub fn deconv_output_dim(input: usize, axis: &AxisWindow) -> i64 {
    let (input, kernel, stride, pad, dilation) = signed(input, axis);
    stride * (input - 1) + dilation * (kernel - 1) + 1 - 2 * pad
}

/// Pooling output extent along one axis.
///
/// Formula: ceil((in + 2*pad + stride - kernel) / stride) where the quotient is
/// an integer quotient, so a 3x3/2 window over 112 yields 55. With padding, the
/// last window must start inside the input (plus leading pad), otherwise it is
/// dropped. The stride must be non-zero.
pub fn pool_output_dim(input: usize, axis: &AxisWindow) -> i64 {
    let (input, kernel, stride, pad, _) = signed(input, axis);
    let mut out = (input + 2 * pad + stride - kernel).div_euclid(stride);
    if pad > 0 && (out - 1) * stride >= input + pad {
        out -= 1;
    }
    out
}

pub fn infer_conv_shape(
    layer: &str,
    input_shape: &[usize],
    num_output: usize,
    window: &Window2d,
) -> Result<Shape, GraphError> {
    let (n, _, h, w) = nchw(layer, input_shape)?;
    check_window(layer, window)?;
    checked_shape(
        layer,
        [
            n as i64,
            num_output as i64,
            conv_output_dim(h, &window.h),
            conv_output_dim(w, &window.w),
        ],
    )
}

pub fn infer_deconv_shape(
    layer: &str,
    input_shape: &[usize],
    num_output: usize,
    window: &Window2d,
) -> Result<Shape, GraphError> {
    let (n, _, h, w) = nchw(layer, input_shape)?;
    check_window(layer, window)?;
    checked_shape(
        layer,
        [
            n as i64,
            num_output as i64,
            deconv_output_dim(h, &window.h),
            deconv_output_dim(w, &window.w),
        ],
    )
}

/// Pooling keeps the channel count.
pub fn infer_pool_shape(
    layer: &str,
    input_shape: &[usize],
    window: &Window2d,
) -> Result<Shape, GraphError> {
    let (n, c, h, w) = nchw(layer, input_shape)?;
    check_window(layer, window)?;
    checked_shape(
        layer,
        [
            n as i64,
            c as i64,
            pool_output_dim(h, &window.h),
            pool_output_dim(w, &window.w),
        ],
    )
}

/// Inner product flattens C*H*W into `num_output` features: [N, num_output, 1, 1]
pub fn infer_inner_product_shape(
    layer: &str,
    input_shape: &[usize],
    num_output: usize,
) -> Result<Shape, GraphError> {
    let (n, _, _, _) = nchw(layer, input_shape)?;
    checked_shape(layer, [n as i64, num_output as i64, 1, 1])
}

/// Concat along channels. N, H and W come from the first input; the other
/// inputs are not checked against them.
pub fn infer_concat_shape(layer: &str, input_shapes: &[Shape]) -> Result<Shape, GraphError> {
    let Some(first) = input_shapes.first() else {
        return Err(GraphError::InvalidDimensions {
            layer: layer.to_string(),
            shape: Vec::new(),
        });
    };
    let (n, _, h, w) = nchw(layer, first)?;
    let mut channels = 0i64;
    for shape in input_shapes {
        let (_, c, _, _) = nchw(layer, shape)?;
        channels += c as i64;
    }
    checked_shape(layer, [n as i64, channels, h as i64, w as i64])
}

/// Element-wise operators, activations and normalizations keep the shape of
/// their first input.
pub fn infer_identity_shape(layer: &str, input_shape: &[usize]) -> Result<Shape, GraphError> {
    let (n, c, h, w) = nchw(layer, input_shape)?;
    checked_shape(layer, [n as i64, c as i64, h as i64, w as i64])
}

fn signed(input: usize, axis: &AxisWindow) -> (i64, i64, i64, i64, i64) {
    (
        input as i64,
        axis.kernel as i64,
        axis.stride as i64,
        axis.pad as i64,
        axis.dilation as i64,
    )
}
