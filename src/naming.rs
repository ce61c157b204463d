/// Map a foreign (Caffe) identifier onto an IR-safe identifier.
///
/// Every `/` and `-` becomes `_`, so `conv1/7x7_s2` turns into `conv1_7x7_s2` and
/// `inception-3a` into `inception_3a`. The result never contains either character,
/// which makes the mapping idempotent.
pub fn normalize_name(name: &str) -> String {
    name.replace(['/', '-'], "_")
}

/// Name of the weight variable derived from a layer name.
pub fn weight_name(layer: &str) -> String {
    normalize_name(&format!("{layer}_w"))
}

/// Name of the bias variable derived from a layer name.
pub fn bias_name(layer: &str) -> String {
    normalize_name(&format!("{layer}_b"))
}
