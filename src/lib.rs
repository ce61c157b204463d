pub mod attributes;
pub mod binary;
pub mod converter;
pub mod error;
pub mod graph;
pub mod graphviz;
pub mod layer;
pub mod loader;
pub mod naming;
pub mod serializer;
pub mod shape_inference;
pub mod topology;

pub use converter::{ConvertOptions, Converter, convert, convert_to_dir};
pub use error::GraphError;
pub use graph::{
    AttributeValue, Attributes, DataType, Graph, GraphBuilder, Node, OpType, Tensor, TensorKind,
};
pub use graphviz::graph_to_dot;
pub use layer::{LayerDescriptor, NetDescriptor};
pub use loader::{load_net_from_path, load_net_from_str};
pub use naming::normalize_name;
pub use serializer::{STRUCTURE_FILE, render_structure, write_graph};
