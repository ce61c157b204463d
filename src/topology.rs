//! Input resolution for retained layers.
//!
//! Resolution is narrow: a layer's data inputs must come from the
//! graph input (first retained layer only) or from the outputs of the retained
//! layer right before it, either directly or through one Dropout/Split alias.
//! Nothing further back is visible.

use std::collections::HashMap;

use tracing::debug;

use crate::error::GraphError;
use crate::graph::Shape;
use crate::layer::{LayerDescriptor, PassThrough};
use crate::naming::normalize_name;

/// A declared blob name bound to the graph tensor that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTensor {
    pub tensor: String,
    pub shape: Shape,
}

/// Outputs of one retained layer (or the graph input), keyed by normalized
/// declared name.
pub type OutputMap = HashMap<String, ResolvedTensor>;

/// Names substituted by elided pass-through layers, output → input.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    dropout: HashMap<String, String>,
    split: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the aliases of a Dropout or Split layer.
    ///
    /// Tops pair with bottoms by position; tops beyond the last bottom alias the
    /// first bottom, which is how a Split fans one blob out to several names.
    pub fn record(&mut self, kind: PassThrough, layer: &LayerDescriptor) {
        let Some(first_bottom) = layer.bottom.first() else {
            return;
        };
        let map = match kind {
            PassThrough::Dropout => &mut self.dropout,
            PassThrough::Split => &mut self.split,
        };
        for (idx, top) in layer.top.iter().enumerate() {
            let bottom = layer.bottom.get(idx).unwrap_or(first_bottom);
            let (output, input) = (normalize_name(top), normalize_name(bottom));
            debug!(layer = %layer.name, ?kind, %output, %input, "recorded alias");
            map.entry(output).or_insert(input);
        }
    }

    pub fn dropout(&self, name: &str) -> Option<&str> {
        self.dropout.get(name).map(String::as_str)
    }

    pub fn split(&self, name: &str) -> Option<&str> {
        self.split.get(name).map(String::as_str)
    }
}

/// Look up one declared input: directly, then through the dropout alias, then
/// through the split alias. Each alias is applied once.
pub fn resolve_name<'a>(
    name: &str,
    previous: &'a OutputMap,
    aliases: &AliasTable,
) -> Option<&'a ResolvedTensor> {
    previous
        .get(name)
        .or_else(|| aliases.dropout(name).and_then(|alias| previous.get(alias)))
        .or_else(|| aliases.split(name).and_then(|alias| previous.get(alias)))
}

/// Resolve every declared input of a retained layer.
///
/// For softmax-family layers only the first input is mandatory; unresolved
/// extra inputs (labels of a loss layer) are dropped.
pub fn resolve_inputs(
    layer: &LayerDescriptor,
    softmax_family: bool,
    previous: &OutputMap,
    aliases: &AliasTable,
) -> Result<Vec<ResolvedTensor>, GraphError> {
    let mut resolved = Vec::with_capacity(layer.bottom.len());
    for (idx, bottom) in layer.bottom.iter().enumerate() {
        let name = normalize_name(bottom);
        match resolve_name(&name, previous, aliases) {
            Some(tensor) => resolved.push(tensor.clone()),
            None if softmax_family && idx > 0 => {
                debug!(layer = %layer.name, input = %name, "ignoring extra softmax input");
            }
            None => {
                return Err(GraphError::UnresolvedInput {
                    layer: layer.name.clone(),
                    name,
                });
            }
        }
    }
    Ok(resolved)
}

/// Resolver state threaded through one conversion run.
#[derive(Debug, Clone)]
pub struct Topology {
    aliases: AliasTable,
    previous: OutputMap,
    retained: usize,
}

impl Topology {
    /// Start from the graph input, which plays the role of the previous
    /// outputs for the first retained layer.
    pub fn new(input_name: &str, input_shape: Shape) -> Self {
        let mut previous = OutputMap::new();
        previous.insert(
            input_name.to_string(),
            ResolvedTensor {
                tensor: input_name.to_string(),
                shape: input_shape,
            },
        );
        Self {
            aliases: AliasTable::new(),
            previous,
            retained: 0,
        }
    }

    pub fn record_pass_through(&mut self, kind: PassThrough, layer: &LayerDescriptor) {
        self.aliases.record(kind, layer);
    }

    pub fn resolve(
        &self,
        layer: &LayerDescriptor,
        softmax_family: bool,
    ) -> Result<Vec<ResolvedTensor>, GraphError> {
        resolve_inputs(layer, softmax_family, &self.previous, &self.aliases)
    }

    /// Replace the visible outputs with those of the layer just retained.
    pub fn advance(&mut self, outputs: OutputMap) {
        self.previous = outputs;
        self.retained += 1;
    }

    /// Outputs of the last retained layer, `None` before any layer was retained.
    pub fn last_outputs(&self) -> Option<&OutputMap> {
        (self.retained > 0).then_some(&self.previous)
    }
}
