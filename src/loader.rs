use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::GraphError;
use crate::layer::NetDescriptor;

/// Load a decoded Caffe network from its JSON rendition.
///
/// The document mirrors `NetParameter`: a `layer` array whose entries carry
/// `name`, `type`, `bottom`, `top`, `blobs` and the per-type `*_param` blocks.
pub fn load_net_from_path(path: impl AsRef<Path>) -> Result<NetDescriptor, GraphError> {
    let path_ref = path.as_ref();
    let contents = fs::read_to_string(path_ref).map_err(|err| GraphError::io(path_ref, err))?;
    let net = load_net_from_str(&contents)?;
    debug!(path = %path_ref.display(), layers = net.layer.len(), "loaded network");
    Ok(net)
}

pub fn load_net_from_str(contents: &str) -> Result<NetDescriptor, GraphError> {
    Ok(serde_json::from_str(contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file() {
        let err = load_net_from_path("/nonexistent/model.json").unwrap_err();
        match err {
            GraphError::Io { path, .. } => assert!(path.ends_with("model.json")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_load_malformed_json() {
        let err = load_net_from_str("{\"layer\": [").unwrap_err();
        assert!(matches!(err, GraphError::Parse { .. }));
    }

    #[test]
    fn test_load_layers_and_blobs() {
        let net = load_net_from_str(
            r#"{
                "name": "tiny",
                "layer": [
                    {"name": "conv1", "type": "Convolution", "bottom": ["data"], "top": ["conv1"],
                     "convolution_param": {"num_output": 2, "kernel_size": 1},
                     "blobs": [{"shape": [2, 1, 1, 1], "data": [0.5, -0.5]}]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(net.name.as_deref(), Some("tiny"));
        let conv = &net.layer[0];
        assert_eq!(conv.layer_type, "Convolution");
        assert_eq!(conv.blobs[0].data, vec![0.5, -0.5]);
        let param = conv.convolution_param.as_ref().unwrap();
        assert_eq!(param.kernel_size, vec![1]);
        assert!(param.bias_term);
    }
}
