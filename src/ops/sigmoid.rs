//! Logistic sigmoid

use std::fmt;
use std::sync::Arc;

use crate::{
    error::{QError, QResult},
    model::{get_quant_type, ModelReader},
    quantization::{
        lut::{activation_quant, lookup, sigmoid},
        LutProvider, QuantElement, QuantType, SigmoidLut,
    },
    tensor::{TensorBase, TensorElement},
};
use super::args::{forward_elemwise, ElemwiseArgs, ElemwiseOp, LookupTable, TaskArgs, TaskCache};
use super::core::{InplacePolicy, Module, ModuleBase, ModuleDeserialize, RuntimeMode};

const OP_TYPE: &str = "Sigmoid";

/// `output = 1 / (1 + e^-input)`.
///
/// Int8 outputs at the provider's exponent are answered from a lookup table
/// keyed by the input exponent; everything else goes through the float path.
/// Runs on a single core.
pub struct Sigmoid {
    base: ModuleBase,
    cache: TaskCache,
    lut: Arc<dyn LutProvider>,
}

impl Sigmoid {
    pub fn new(name: Option<&str>, inplace: InplacePolicy, quant_type: QuantType) -> Self {
        Self {
            base: ModuleBase::new(name, inplace, quant_type),
            cache: TaskCache::default(),
            lut: Arc::new(SigmoidLut),
        }
    }

    pub fn with_lut_provider(mut self, lut: Arc<dyn LutProvider>) -> Self {
        self.lut = lut;
        self
    }

    pub fn task_count(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cached descriptor carries a lookup table.
    pub fn uses_lut(&self) -> bool {
        self.cache
            .tasks()
            .iter()
            .any(|t| matches!(t, TaskArgs::Int8(a) if a.table().is_some()))
    }

    fn forward_template<T, F>(&mut self, tensors: &mut [TensorBase], mode: RuntimeMode, table: F) -> QResult<()>
    where
        T: TensorElement,
        TaskArgs: From<ElemwiseArgs<T>>,
        F: FnOnce(&[TensorBase]) -> Option<LookupTable>,
    {
        let expected = tensors[self.base.inputs_index[0]].shape().to_vec();
        let op = ElemwiseOp {
            op_type: OP_TYPE,
            splittable: false,
            kernel: sigmoid_kernel,
        };
        forward_elemwise::<T, F>(op, &self.base, &mut self.cache, tensors, mode, &expected, table)
    }
}

fn float_path<T: QuantElement>(args: &ElemwiseArgs<T>) {
    let (e_in, e_out) = (args.input0_exponent, args.output_exponent);
    args.for_each_offset(|out, i0, _| {
        args.store(out, activation_quant(sigmoid, args.load0(i0), e_in, e_out));
    });
}

fn sigmoid_kernel(args: &TaskArgs) {
    match args {
        TaskArgs::Int8(a) => match a.table() {
            Some(LookupTable::Activation(table)) => {
                a.for_each_offset(|out, i0, _| a.store(out, lookup(table, a.load0(i0))));
            }
            _ => float_path(a),
        },
        TaskArgs::Int16(a) => float_path(a),
    }
}

impl fmt::Debug for Sigmoid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sigmoid")
            .field("base", &self.base)
            .field("lut_exponent", &self.lut.output_exponent())
            .finish()
    }
}

impl Module for Sigmoid {
    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn op_type(&self) -> &'static str {
        OP_TYPE
    }

    fn get_output_shape(&self, input_shapes: &[Vec<usize>]) -> QResult<Vec<Vec<usize>>> {
        match input_shapes {
            [shape] => Ok(vec![shape.clone()]),
            _ => Err(QError::ShapeMismatch(format!(
                "{} expects 1 input shape, got {}",
                OP_TYPE,
                input_shapes.len()
            ))),
        }
    }

    fn forward(&mut self, tensors: &mut [TensorBase], mode: RuntimeMode) -> QResult<()> {
        self.base.check_bound(OP_TYPE, 1, tensors)?;
        let (input, output) = (self.base.inputs_index[0], self.base.outputs_index[0]);
        match self.base.quant_type {
            QuantType::Symm8Bit => {
                let lut = Arc::clone(&self.lut);
                self.forward_template::<i8, _>(tensors, mode, move |t| {
                    (t[output].exponent == lut.output_exponent())
                        .then(|| LookupTable::Activation(lut.table_for(t[input].exponent)))
                })?
            }
            QuantType::Symm16Bit => self.forward_template::<i16, _>(tensors, mode, |_| None)?,
            QuantType::None => return Err(self.base.unsupported(OP_TYPE)),
        }
        self.base.mark_executed();
        Ok(())
    }

    fn forward_args(&self, args: &TaskArgs) {
        sigmoid_kernel(args)
    }
}

impl ModuleDeserialize for Sigmoid {
    fn deserialize(model: &dyn ModelReader, node_name: &str) -> QResult<Option<Box<dyn Module>>> {
        Ok(match get_quant_type(model, node_name)? {
            Some(quant_type @ (QuantType::Symm8Bit | QuantType::Symm16Bit)) => Some(Box::new(Sigmoid::new(
                Some(node_name),
                InplacePolicy::InplaceChangedBuffer,
                quant_type,
            ))),
            _ => None,
        })
    }
}
