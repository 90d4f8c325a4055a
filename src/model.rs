//! Model container interface consumed by operator deserialization.
//!
//! [`ModelReader`] is what an operator sees of a loaded model: typed attribute
//! lookup by node name and key. [`GraphModel`] is an in-memory container used
//! to assemble graphs in code or from JSON; it is not a model file format.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{QError, QResult};
use crate::ops::core::InplacePolicy;
use crate::quantization::QuantType;

/// Attribute value as declared on a serialized node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
}

impl AttributeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Int(_) => "int",
            AttributeValue::Float(_) => "float",
            AttributeValue::Str(_) => "string",
            AttributeValue::Ints(_) => "int list",
        }
    }
}

/// Conversion from a declared attribute into a typed value.
pub trait FromAttribute: Sized {
    const TYPE_NAME: &'static str;

    fn from_attribute(value: &AttributeValue) -> Option<Self>;
}

impl FromAttribute for i64 {
    const TYPE_NAME: &'static str = "int";

    fn from_attribute(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromAttribute for f64 {
    const TYPE_NAME: &'static str = "float";

    fn from_attribute(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl FromAttribute for String {
    const TYPE_NAME: &'static str = "string";

    fn from_attribute(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromAttribute for InplacePolicy {
    const TYPE_NAME: &'static str = "inplace policy";

    fn from_attribute(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Int(v) => InplacePolicy::from_i64(*v),
            AttributeValue::Str(s) => InplacePolicy::parse(s),
            _ => None,
        }
    }
}

/// Attribute access into a loaded model.
pub trait ModelReader {
    /// Raw attribute of `node_name`. Fails with `AttributeMissing` when the
    /// node or the key is absent.
    fn get_operation_attribute(&self, node_name: &str, key: &str) -> QResult<&AttributeValue>;
}

/// Typed attribute fetch. A present attribute of the wrong type fails with
/// `AttributeType`, distinct from a missing one.
pub fn get_attribute<T: FromAttribute>(model: &dyn ModelReader, node_name: &str, key: &str) -> QResult<T> {
    let value = model.get_operation_attribute(node_name, key)?;
    T::from_attribute(value).ok_or_else(|| QError::AttributeType {
        node: node_name.to_string(),
        key: key.to_string(),
        expected: T::TYPE_NAME,
    })
}

/// Like [`get_attribute`] but a missing key yields `None`.
pub fn get_optional_attribute<T: FromAttribute>(
    model: &dyn ModelReader,
    node_name: &str,
    key: &str,
) -> QResult<Option<T>> {
    match get_attribute(model, node_name, key) {
        Ok(value) => Ok(Some(value)),
        Err(QError::AttributeMissing { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// The node's `quant_type` attribute.
///
/// An int or string naming no known type yields `Ok(None)`, so callers can
/// decline the node. Any other value type fails with `AttributeType`.
pub fn get_quant_type(model: &dyn ModelReader, node_name: &str) -> QResult<Option<QuantType>> {
    match model.get_operation_attribute(node_name, "quant_type")? {
        AttributeValue::Int(v) => Ok(QuantType::from_i64(*v)),
        AttributeValue::Str(s) => Ok(QuantType::parse(s)),
        _ => Err(QError::AttributeType {
            node: node_name.to_string(),
            key: "quant_type".to_string(),
            expected: "quant type",
        }),
    }
}

/// One operator node of a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub op_type: String,
    #[serde(default)]
    pub inputs: Vec<usize>,
    #[serde(default)]
    pub outputs: Vec<usize>,
    #[serde(default)]
    pub attributes: HashMap<String, AttributeValue>,
}

impl NodeDef {
    pub fn new(name: &str, op_type: &str) -> Self {
        Self {
            name: name.to_string(),
            op_type: op_type.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_io(mut self, inputs: &[usize], outputs: &[usize]) -> Self {
        self.inputs = inputs.to_vec();
        self.outputs = outputs.to_vec();
        self
    }

    pub fn with_attribute(mut self, key: &str, value: AttributeValue) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }
}

/// In-memory graph: nodes in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphModel {
    pub nodes: Vec<NodeDef>,
}

impl GraphModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> QResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> QResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn add_node(&mut self, node: NodeDef) {
        self.nodes.push(node);
    }

    pub fn node(&self, name: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

impl ModelReader for GraphModel {
    fn get_operation_attribute(&self, node_name: &str, key: &str) -> QResult<&AttributeValue> {
        self.node(node_name)
            .and_then(|n| n.attributes.get(key))
            .ok_or_else(|| QError::AttributeMissing {
                node: node_name.to_string(),
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> GraphModel {
        let mut model = GraphModel::new();
        model.add_node(
            NodeDef::new("add0", "Add")
                .with_io(&[0, 1], &[2])
                .with_attribute("quant_type", AttributeValue::Str("symm8".into()))
                .with_attribute("alpha", AttributeValue::Float(0.5)),
        );
        model
    }

    #[test]
    fn test_typed_attribute() {
        let model = model();
        assert_eq!(get_quant_type(&model, "add0").unwrap(), Some(QuantType::Symm8Bit));
        assert_eq!(get_attribute::<f64>(&model, "add0", "alpha").unwrap(), 0.5);
    }

    #[test]
    fn test_unknown_quant_type_is_declined() {
        let mut model = GraphModel::new();
        model.add_node(NodeDef::new("i", "Add").with_attribute("quant_type", AttributeValue::Int(4)));
        model.add_node(NodeDef::new("s", "Add").with_attribute("quant_type", AttributeValue::Str("float32".into())));
        model.add_node(NodeDef::new("f", "Add").with_attribute("quant_type", AttributeValue::Float(1.0)));
        model.add_node(NodeDef::new("l", "Add").with_attribute("quant_type", AttributeValue::Ints(vec![1])));

        assert_eq!(get_quant_type(&model, "i").unwrap(), None);
        assert_eq!(get_quant_type(&model, "s").unwrap(), None);
        for node in ["f", "l"] {
            assert!(matches!(
                get_quant_type(&model, node),
                Err(QError::AttributeType { expected: "quant type", .. })
            ));
        }
        assert!(matches!(get_quant_type(&model, "x"), Err(QError::AttributeMissing { .. })));
    }

    #[test]
    fn test_missing_and_mistyped_attributes_fail_distinctly() {
        let model = model();
        let missing = get_attribute::<i64>(&model, "add0", "axis").unwrap_err();
        assert!(matches!(missing, QError::AttributeMissing { .. }));

        let mistyped = get_attribute::<i64>(&model, "add0", "alpha").unwrap_err();
        assert!(matches!(mistyped, QError::AttributeType { expected: "int", .. }));

        let no_node = get_attribute::<i64>(&model, "nope", "quant_type").unwrap_err();
        assert!(matches!(no_node, QError::AttributeMissing { .. }));
    }

    #[test]
    fn test_optional_attribute() {
        let model = model();
        assert_eq!(get_optional_attribute::<i64>(&model, "add0", "axis").unwrap(), None);
        assert!(get_optional_attribute::<String>(&model, "add0", "alpha").is_err());
    }

    #[test]
    fn test_json() {
        let json = r#"{"nodes":[{"name":"s","op_type":"Sigmoid","inputs":[0],"outputs":[1],
                       "attributes":{"quant_type":2}}]}"#;
        let model = GraphModel::from_json(json).unwrap();
        assert_eq!(get_quant_type(&model, "s").unwrap(), Some(QuantType::Symm16Bit));
        assert_eq!(GraphModel::from_json(&model.to_json().unwrap()).unwrap(), model);
    }
}
