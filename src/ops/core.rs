//! Core operator trait and the state shared by every operator kind

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{QError, QResult},
    model::{AttributeValue, ModelReader, NodeDef},
    quantization::{quant_type_to_string, QuantType},
    tensor::TensorBase,
};
use super::args::TaskArgs;

/// Whether an operator's output aliases one of its inputs.
///
/// Only buffer assignment depends on it, but it is part of the operator's
/// identity and is written back when the operator is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InplacePolicy {
    /// Output gets its own buffer.
    NonInplace,
    /// Output reuses the input buffer with a changed layout.
    InplaceChangedBuffer,
    /// Output is written straight into the first input's buffer.
    InplaceUnchangedBuffer,
}

impl InplacePolicy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            InplacePolicy::NonInplace => "non_inplace",
            InplacePolicy::InplaceChangedBuffer => "inplace_changed_buffer",
            InplacePolicy::InplaceUnchangedBuffer => "inplace_unchanged_buffer",
        }
    }

    pub const fn as_i64(&self) -> i64 {
        match self {
            InplacePolicy::NonInplace => 0,
            InplacePolicy::InplaceChangedBuffer => 1,
            InplacePolicy::InplaceUnchangedBuffer => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(InplacePolicy::NonInplace),
            1 => Some(InplacePolicy::InplaceChangedBuffer),
            2 => Some(InplacePolicy::InplaceUnchangedBuffer),
            _ => None,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "non_inplace" => Some(InplacePolicy::NonInplace),
            "inplace_changed_buffer" => Some(InplacePolicy::InplaceChangedBuffer),
            "inplace_unchanged_buffer" => Some(InplacePolicy::InplaceUnchangedBuffer),
            _ => None,
        }
    }
}

/// Whether a forward call may use the secondary core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeMode {
    /// Split when the output is large enough.
    Auto,
    /// Never touch the secondary core.
    SingleCore,
    /// Split whenever the output can be partitioned.
    MultiCore,
}

impl Default for RuntimeMode {
    fn default() -> Self {
        RuntimeMode::Auto
    }
}

/// Lifecycle of an operator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModuleState {
    Constructed,
    Bound,
    Ready,
    Executed,
}

/// Identity and bindings common to every operator.
#[derive(Debug, Clone)]
pub struct ModuleBase {
    pub name: Option<String>,
    pub quant_type: QuantType,
    pub inplace: InplacePolicy,
    pub inputs_index: Vec<usize>,
    pub outputs_index: Vec<usize>,
    state: ModuleState,
}

impl ModuleBase {
    pub fn new(name: Option<&str>, inplace: InplacePolicy, quant_type: QuantType) -> Self {
        Self {
            name: name.map(str::to_string),
            quant_type,
            inplace,
            inputs_index: Vec::new(),
            outputs_index: Vec::new(),
            state: ModuleState::Constructed,
        }
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    fn advance(&mut self, to: ModuleState) {
        if to > self.state {
            self.state = to;
        }
    }

    pub(crate) fn mark_ready(&mut self) {
        self.advance(ModuleState::Ready);
    }

    pub(crate) fn mark_executed(&mut self) {
        self.advance(ModuleState::Executed);
    }

    /// Check the operator is bound with the expected arity and that every
    /// index lies inside the tensor table.
    pub(crate) fn check_bound(&self, op_type: &str, n_inputs: usize, tensors: &[TensorBase]) -> QResult<()> {
        if self.state < ModuleState::Bound {
            return Err(QError::InvalidState(format!("{} forward called before bind", op_type)));
        }
        if self.inputs_index.len() != n_inputs || self.outputs_index.len() != 1 {
            return Err(QError::ShapeMismatch(format!(
                "{} expects {} inputs and 1 output, bound to {} and {}",
                op_type,
                n_inputs,
                self.inputs_index.len(),
                self.outputs_index.len()
            )));
        }
        if let Some(&bad) = self
            .inputs_index
            .iter()
            .chain(self.outputs_index.iter())
            .find(|&&i| i >= tensors.len())
        {
            return Err(QError::InvalidInput(format!(
                "{} tensor index {} outside a table of {}",
                op_type,
                bad,
                tensors.len()
            )));
        }
        Ok(())
    }

    pub(crate) fn unsupported(&self, op_type: &str) -> QError {
        QError::configuration(format!("{} does not support quant type {}", op_type, self.quant_type))
    }
}

/// A quantized operator.
///
/// Kinds are closed over {Add, Div, Sigmoid}; each dispatches on its
/// [`QuantType`] to an int8 or int16 kernel.
pub trait Module: Send + fmt::Debug {
    fn base(&self) -> &ModuleBase;

    fn base_mut(&mut self) -> &mut ModuleBase;

    /// Operator kind as registered with the factory.
    fn op_type(&self) -> &'static str;

    /// Output shapes for the given input shapes. Pure.
    fn get_output_shape(&self, input_shapes: &[Vec<usize>]) -> QResult<Vec<Vec<usize>>>;

    /// Run the operator over `tensors`, writing its output tensor.
    fn forward(&mut self, tensors: &mut [TensorBase], mode: RuntimeMode) -> QResult<()>;

    /// [`Module::forward`] in the process-wide configured `default_mode`.
    fn forward_default(&mut self, tensors: &mut [TensorBase]) -> QResult<()> {
        let mode = crate::config::get_config().default_mode;
        self.forward(tensors, mode)
    }

    /// Execute one task descriptor. Safe to call from either core; touches
    /// only the buffers the descriptor references.
    fn forward_args(&self, args: &TaskArgs);

    fn describe(&self) -> String {
        format!("quant_type: {}.", quant_type_to_string(self.base().quant_type))
    }

    fn print(&self) {
        info!("{}: {}", self.op_type(), self.describe());
    }

    fn name(&self) -> Option<&str> {
        self.base().name.as_deref()
    }

    fn quant_type(&self) -> QuantType {
        self.base().quant_type
    }

    fn inplace(&self) -> InplacePolicy {
        self.base().inplace
    }

    fn state(&self) -> ModuleState {
        self.base().state()
    }

    /// Attach tensor-table indices.
    fn bind(&mut self, inputs: &[usize], outputs: &[usize]) {
        let base = self.base_mut();
        base.inputs_index = inputs.to_vec();
        base.outputs_index = outputs.to_vec();
        base.advance(ModuleState::Bound);
    }

    /// Shape inference that also moves a bound operator to `Ready`.
    fn infer_shapes(&mut self, input_shapes: &[Vec<usize>]) -> QResult<Vec<Vec<usize>>> {
        let shapes = self.get_output_shape(input_shapes)?;
        if self.state() >= ModuleState::Bound {
            self.base_mut().mark_ready();
        }
        Ok(shapes)
    }

    /// Serialize the operator's identity back into a node.
    fn to_node(&self, node_name: &str) -> NodeDef {
        let base = self.base();
        let mut attributes = HashMap::new();
        attributes.insert("quant_type".to_string(), AttributeValue::Int(base.quant_type.as_i64()));
        attributes.insert("inplace".to_string(), AttributeValue::Str(base.inplace.as_str().to_string()));
        NodeDef {
            name: node_name.to_string(),
            op_type: self.op_type().to_string(),
            inputs: base.inputs_index.clone(),
            outputs: base.outputs_index.clone(),
            attributes,
        }
    }
}

/// Reconstruction of an operator from a serialized node.
pub trait ModuleDeserialize {
    /// `Ok(None)` when the node's quantization type is not supported by this
    /// operator kind. Malformed attributes are errors.
    fn deserialize(model: &dyn ModelReader, node_name: &str) -> QResult<Option<Box<dyn Module>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inplace_round_trip() {
        for policy in [
            InplacePolicy::NonInplace,
            InplacePolicy::InplaceChangedBuffer,
            InplacePolicy::InplaceUnchangedBuffer,
        ] {
            assert_eq!(InplacePolicy::parse(policy.as_str()), Some(policy));
            assert_eq!(InplacePolicy::from_i64(policy.as_i64()), Some(policy));
        }
        assert_eq!(InplacePolicy::from_i64(7), None);
    }

    #[test]
    fn test_state_only_moves_forward() {
        let mut base = ModuleBase::new(None, InplacePolicy::NonInplace, QuantType::Symm8Bit);
        assert_eq!(base.state(), ModuleState::Constructed);
        base.mark_executed();
        base.mark_ready();
        assert_eq!(base.state(), ModuleState::Executed);
    }

    #[test]
    fn test_check_bound() {
        let tensors = vec![TensorBase::zeros(&[2], 0, QuantType::Symm8Bit).unwrap()];
        let mut base = ModuleBase::new(None, InplacePolicy::NonInplace, QuantType::Symm8Bit);
        assert!(matches!(base.check_bound("Op", 1, &tensors), Err(QError::InvalidState(_))));

        base.inputs_index = vec![0];
        base.outputs_index = vec![3];
        base.advance(ModuleState::Bound);
        assert!(matches!(base.check_bound("Op", 1, &tensors), Err(QError::InvalidInput(_))));
        assert!(matches!(base.check_bound("Op", 2, &tensors), Err(QError::ShapeMismatch(_))));

        base.outputs_index = vec![0];
        assert!(base.check_bound("Op", 1, &tensors).is_ok());
    }
}
