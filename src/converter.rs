use std::path::Path;

use tracing::{debug, info};

use crate::attributes::infer_operator;
use crate::binary::extract_layer_variables;
use crate::error::GraphError;
use crate::graph::{DataType, Graph, GraphBuilder, Node, Shape, Tensor, TensorKind};
use crate::layer::{LayerDescriptor, LayerKind, NetDescriptor, Operator};
use crate::naming::normalize_name;
use crate::serializer::{clear_structure, write_graph};
use crate::topology::{OutputMap, ResolvedTensor, Topology};

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Graph input dimensions (N, C, H, W). When absent they are taken from the
    /// `input_param` of the model's Input layer.
    pub input_dims: Option<[usize; 4]>,
    pub tensor_byte_length_limit: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            input_dims: None,
            tensor_byte_length_limit: 256 * 1024 * 1024,
        }
    }
}

impl ConvertOptions {
    pub fn new(input_dims: [usize; 4]) -> Self {
        Self {
            input_dims: Some(input_dims),
            ..Self::default()
        }
    }
}

/// Lowers the retained layers of a network into an IR graph, one layer at a
/// time in declaration order.
pub struct Converter<'a> {
    net: &'a NetDescriptor,
    options: ConvertOptions,
    builder: GraphBuilder,
}

impl<'a> Converter<'a> {
    pub fn new(net: &'a NetDescriptor, options: ConvertOptions) -> Self {
        Self {
            net,
            options,
            builder: GraphBuilder::new(),
        }
    }

    pub fn convert(mut self) -> Result<Graph, GraphError> {
        let layers: Vec<&LayerDescriptor> = self.net.layer.iter().collect();
        let (Some(first), Some(last)) = (layers.first().copied(), layers.last().copied()) else {
            return Err(GraphError::EmptyModel);
        };

        // Every layer is classified before any is lowered.
        let kinds = layers
            .iter()
            .map(|layer| layer.kind())
            .collect::<Result<Vec<_>, _>>()?;

        let input_name = graph_input_name(self.net, first, &kinds[0]);
        let dims = self.input_dims(&layers, &kinds)?;
        let input_shape: Shape = dims.to_vec();
        info!(input = %input_name, shape = ?input_shape, layers = layers.len(), "converting network");
        self.builder.add_input(&input_name, input_shape.clone())?;

        let mut topology = Topology::new(&input_name, input_shape);
        for (layer, kind) in layers.iter().zip(kinds) {
            match kind {
                LayerKind::Data => {
                    debug!(layer = %layer.name, "skipping data layer");
                }
                LayerKind::PassThrough(pass) => {
                    topology.record_pass_through(pass, layer);
                }
                LayerKind::Operator(operator) => {
                    let outputs = self.lower_layer(layer, &operator, &topology)?;
                    topology.advance(outputs);
                }
            }
        }

        let output = self.graph_output(last, &topology)?;
        self.builder.mark_output(&output.tensor)?;
        info!(
            output = %output.tensor,
            shape = ?output.shape,
            nodes = self.builder.node_count(),
            "conversion finished"
        );
        self.builder.finish()
    }

    fn input_dims(
        &self,
        layers: &[&LayerDescriptor],
        kinds: &[LayerKind],
    ) -> Result<[usize; 4], GraphError> {
        let dims = match self.options.input_dims {
            Some(dims) => dims,
            None => layers
                .iter()
                .zip(kinds)
                .filter(|(_, kind)| matches!(kind, LayerKind::Data))
                .find_map(|(layer, _)| layer.input_param.as_ref().and_then(|p| p.nchw()))
                .ok_or(GraphError::MissingInputDims)?,
        };
        if dims.contains(&0) {
            return Err(GraphError::InvalidInputDims { dims });
        }
        Ok(dims)
    }

    fn lower_layer(
        &mut self,
        layer: &LayerDescriptor,
        operator: &Operator,
        topology: &Topology,
    ) -> Result<OutputMap, GraphError> {
        let label = normalize_name(&layer.name);
        let inputs = topology.resolve(layer, operator.is_softmax())?;
        let input_shapes: Vec<Shape> = inputs.iter().map(|input| input.shape.clone()).collect();
        let inference = infer_operator(&layer.name, operator, &input_shapes)?;
        debug!(
            layer = %label,
            op = %inference.op_type,
            inputs = ?input_shapes,
            output = ?inference.output_shape,
            "inferred layer"
        );

        let variables = extract_layer_variables(
            &layer.name,
            &layer.blobs,
            inference.weight_shape.as_ref(),
            inference.bias_shape.as_ref(),
            self.options.tensor_byte_length_limit,
        )?;
        let mut node_inputs: Vec<String> = inputs.into_iter().map(|input| input.tensor).collect();
        for variable in variables.into_variables() {
            node_inputs.push(variable.name.clone());
            self.builder.add_variable(
                &variable.name,
                variable.data_type,
                variable.shape,
                variable.payload,
            )?;
        }

        if layer.top.is_empty() {
            return Err(GraphError::MissingLayerOutput {
                layer: layer.name.clone(),
            });
        }
        let mut outputs = OutputMap::with_capacity(layer.top.len());
        let mut node_outputs = Vec::with_capacity(layer.top.len());
        for (idx, top) in layer.top.iter().enumerate() {
            let declared = normalize_name(top);
            let tensor = if self.builder.contains(&declared) {
                // In-place layer: the declared name is taken by the tensor it
                // overwrites, so the result is registered under the layer name.
                let renamed = if idx == 0 {
                    label.clone()
                } else {
                    format!("{}_{}", label, idx)
                };
                debug!(layer = %label, top = %declared, tensor = %renamed, "renamed in-place output");
                renamed
            } else {
                declared.clone()
            };
            self.builder.add_tensor(Tensor::new(
                tensor.as_str(),
                TensorKind::Local,
                DataType::F032,
                inference.output_shape.clone(),
            ))?;
            node_outputs.push(tensor.clone());
            outputs.insert(
                declared,
                ResolvedTensor {
                    tensor,
                    shape: inference.output_shape.clone(),
                },
            );
        }

        self.builder.add_node(Node {
            op_type: inference.op_type,
            inputs: node_inputs,
            outputs: node_outputs,
            attributes: inference.attributes,
            label,
        });
        Ok(outputs)
    }

    /// The output is named by the last declared layer and must be one of the
    /// tensors produced by the last retained layer. Aliases are not followed,
    /// so a network ending in a non in-place Dropout or Split has no output.
    fn graph_output(
        &self,
        last: &LayerDescriptor,
        topology: &Topology,
    ) -> Result<ResolvedTensor, GraphError> {
        let declared = last
            .top
            .first()
            .or_else(|| last.bottom.last())
            .map(|name| normalize_name(name))
            .ok_or_else(|| GraphError::UnresolvedOutput {
                name: normalize_name(&last.name),
            })?;
        let Some(previous) = topology.last_outputs() else {
            return Err(GraphError::UnresolvedOutput { name: declared });
        };
        previous
            .get(&declared)
            .cloned()
            .ok_or(GraphError::UnresolvedOutput { name: declared })
    }
}

/// Name of the graph input tensor, in priority order: the explicit root input,
/// the first top of a leading data layer (or its name), then the first bottom
/// of the first layer (or its first top).
fn graph_input_name(net: &NetDescriptor, first: &LayerDescriptor, kind: &LayerKind) -> String {
    let name = if let Some(root) = net.input.first() {
        root
    } else if matches!(kind, LayerKind::Data) {
        first.top.first().unwrap_or(&first.name)
    } else {
        first
            .bottom
            .first()
            .or_else(|| first.top.first())
            .unwrap_or(&first.name)
    };
    normalize_name(name)
}

pub fn convert(net: &NetDescriptor, options: ConvertOptions) -> Result<Graph, GraphError> {
    Converter::new(net, options).convert()
}

/// Convert and write the artifacts into `out_dir`. A structure file from an
/// earlier run is removed first; a new one is written only when the whole
/// graph converted successfully.
pub fn convert_to_dir(
    net: &NetDescriptor,
    options: ConvertOptions,
    out_dir: impl AsRef<Path>,
) -> Result<Graph, GraphError> {
    let out_dir = out_dir.as_ref();
    if out_dir.is_dir() {
        clear_structure(out_dir)?;
    }
    let graph = convert(net, options)?;
    write_graph(&graph, out_dir)?;
    Ok(graph)
}
