//! Name-keyed operator factory

use std::collections::HashMap;
use std::fmt;

use tracing::{error, info};

use crate::{
    error::{QError, QResult},
    model::{GraphModel, ModelReader},
};
use super::{
    add::Add,
    core::{Module, ModuleDeserialize},
    div::Div,
    sigmoid::Sigmoid,
};

/// Reconstructs one operator kind from a serialized node.
pub type DeserializeFn = fn(&dyn ModelReader, &str) -> QResult<Option<Box<dyn Module>>>;

/// Maps operator type names to their deserializers.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, DeserializeFn>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ModuleRegistry").field("op_types", &names).finish()
    }
}

impl ModuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in operator.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("Add", Add::deserialize);
        registry.register("Add2D", Add::deserialize);
        registry.register("Div", Div::deserialize);
        registry.register("Sigmoid", Sigmoid::deserialize);
        registry
    }

    /// Register `factory` under `op_type`, replacing any previous entry.
    pub fn register(&mut self, op_type: &str, factory: DeserializeFn) {
        self.factories.insert(op_type.to_string(), factory);
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.factories.contains_key(op_type)
    }

    /// Build the operator for `node_name`.
    ///
    /// Unknown operator kinds and unsupported quantization types are
    /// configuration errors.
    pub fn create(&self, model: &dyn ModelReader, op_type: &str, node_name: &str) -> QResult<Box<dyn Module>> {
        let factory = self.factories.get(op_type).ok_or_else(|| {
            error!("{}: unknown operator type {}", node_name, op_type);
            QError::configuration(format!("unknown operator type {}", op_type))
        })?;

        factory(model, node_name)?.ok_or_else(|| {
            error!("{}: {} does not support the node's quant type", node_name, op_type);
            QError::configuration(format!("{} node {} has an unsupported quant type", op_type, node_name))
        })
    }

    /// Create and bind an operator for every node, in order. Fails on the
    /// first node that cannot be reconstructed.
    pub fn load_graph(&self, graph: &GraphModel) -> QResult<Vec<Box<dyn Module>>> {
        let mut modules = Vec::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            let mut module = self.create(graph, &node.op_type, &node.name).map_err(|e| {
                error!(code = ?e.code(), "failed to load node {}: {}", node.name, e);
                e
            })?;
            module.bind(&node.inputs, &node.outputs);
            module.print();
            modules.push(module);
        }
        info!("loaded {} modules", modules.len());
        Ok(modules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::model::{AttributeValue, NodeDef};
    use crate::ops::core::{InplacePolicy, ModuleState};
    use crate::quantization::QuantType;

    fn graph() -> GraphModel {
        let mut graph = GraphModel::new();
        graph.add_node(
            NodeDef::new("add", "Add2D")
                .with_io(&[0, 1], &[2])
                .with_attribute("quant_type", AttributeValue::Int(1)),
        );
        graph.add_node(
            NodeDef::new("sig", "Sigmoid")
                .with_io(&[2], &[3])
                .with_attribute("quant_type", AttributeValue::Str("symm 8bit".into())),
        );
        graph
    }

    #[test]
    fn test_load_graph_binds_modules() {
        let modules = ModuleRegistry::with_defaults().load_graph(&graph()).unwrap();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].op_type(), "Add");
        assert_eq!(modules[0].base().inputs_index, vec![0, 1]);
        assert_eq!(modules[1].name(), Some("sig"));
        assert!(modules.iter().all(|m| m.state() == ModuleState::Bound));
    }

    #[test]
    fn test_unknown_and_unsupported_nodes() {
        let registry = ModuleRegistry::with_defaults();
        let mut graph = graph();
        graph.add_node(NodeDef::new("conv", "Conv2D").with_attribute("quant_type", AttributeValue::Int(1)));
        assert!(matches!(registry.load_graph(&graph), Err(QError::Configuration(_))));

        let mut graph = GraphModel::new();
        graph.add_node(NodeDef::new("d", "Div").with_attribute("quant_type", AttributeValue::Int(0)));
        graph.add_node(NodeDef::new("f", "Sigmoid").with_attribute("quant_type", AttributeValue::Str("float32".into())));
        assert!(matches!(registry.create(&graph, "Div", "d"), Err(QError::Configuration(_))));
        let err = registry.create(&graph, "Sigmoid", "f").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);

        graph.add_node(NodeDef::new("x", "Add").with_attribute("quant_type", AttributeValue::Float(8.0)));
        let err = registry.create(&graph, "Add", "x").unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedNode);
    }

    #[test]
    fn test_round_trip_through_node() {
        let registry = ModuleRegistry::with_defaults();
        let module = registry.create(&graph(), "Add2D", "add").unwrap();
        let mut graph = GraphModel::new();
        graph.add_node(module.to_node("copy"));
        let copy = registry.create(&graph, "Add", "copy").unwrap();
        assert_eq!(copy.quant_type(), QuantType::Symm8Bit);
        assert_eq!(copy.inplace(), InplacePolicy::InplaceUnchangedBuffer);
    }

    #[test]
    fn test_register_custom_factory() {
        fn never(_: &dyn ModelReader, _: &str) -> QResult<Option<Box<dyn Module>>> {
            Ok(None)
        }
        let mut registry = ModuleRegistry::new();
        assert!(!registry.contains("Never"));
        registry.register("Never", never);
        assert!(registry.contains("Never"));
    }
}
