//! Elementwise addition with the rank-3 channel broadcast rule

use crate::{
    error::{ErrorContext, QError, QResult, WithContext},
    model::{get_optional_attribute, get_quant_type, ModelReader},
    quantization::{rescale_factor, round_half_even, scale, truncate, QuantElement, QuantType},
    tensor::{channel_broadcast, TensorBase, TensorElement},
};
use super::args::{forward_elemwise, ElemwiseArgs, ElemwiseOp, TaskArgs, TaskCache};
use super::core::{InplacePolicy, Module, ModuleBase, ModuleDeserialize, RuntimeMode};

const OP_TYPE: &str = "Add";

/// `output = input0 + input1`, both rank 3.
///
/// The output takes the shape of the input with the wider trailing dimension;
/// the other input is broadcast along that dimension.
#[derive(Debug)]
pub struct Add {
    base: ModuleBase,
    cache: TaskCache,
}

impl Add {
    pub fn new(name: Option<&str>, inplace: InplacePolicy, quant_type: QuantType) -> Self {
        Self {
            base: ModuleBase::new(name, inplace, quant_type),
            cache: TaskCache::default(),
        }
    }

    /// Number of cached task descriptors from the last forward.
    pub fn task_count(&self) -> usize {
        self.cache.len()
    }

    fn forward_template<T>(&mut self, tensors: &mut [TensorBase], mode: RuntimeMode) -> QResult<()>
    where
        T: TensorElement,
        TaskArgs: From<ElemwiseArgs<T>>,
    {
        let [in0, in1] = [self.base.inputs_index[0], self.base.inputs_index[1]];
        let expected = channel_broadcast(tensors[in0].shape(), tensors[in1].shape()).with_context(|| {
            ErrorContext::new(OP_TYPE)
                .with_shape(tensors[in0].shape())
                .with_shape(tensors[in1].shape())
                .with_quant_type(self.base.quant_type.as_str())
        })?;
        let op = ElemwiseOp {
            op_type: OP_TYPE,
            splittable: true,
            kernel: add_kernel,
        };
        forward_elemwise::<T, _>(op, &self.base, &mut self.cache, tensors, mode, &expected, |_| None)
    }
}

fn add_elements<T: QuantElement>(args: &ElemwiseArgs<T>) {
    let s0 = scale(args.input0_exponent);
    let s1 = scale(args.input1_exponent);
    let so = rescale_factor(args.output_exponent);
    args.for_each_offset(|out, i0, i1| {
        let sum = args.load0(i0).to_f32() * s0 + args.load1(i1).to_f32() * s1;
        args.store(out, truncate(round_half_even(sum * so)));
    });
}

fn add_kernel(args: &TaskArgs) {
    match args {
        TaskArgs::Int8(a) => add_elements(a),
        TaskArgs::Int16(a) => add_elements(a),
    }
}

impl Module for Add {
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
        if input_shapes.len() != 2 {
            return Err(QError::ShapeMismatch(format!(
                "{} expects 2 input shapes, got {}",
                OP_TYPE,
                input_shapes.len()
            )));
        }
        Ok(vec![channel_broadcast(&input_shapes[0], &input_shapes[1])?])
    }

    fn forward(&mut self, tensors: &mut [TensorBase], mode: RuntimeMode) -> QResult<()> {
        self.base.check_bound(OP_TYPE, 2, tensors)?;
        match self.base.quant_type {
            QuantType::Symm8Bit => self.forward_template::<i8>(tensors, mode)?,
            QuantType::Symm16Bit => self.forward_template::<i16>(tensors, mode)?,
            QuantType::None => return Err(self.base.unsupported(OP_TYPE)),
        }
        self.base.mark_executed();
        Ok(())
    }

    fn forward_args(&self, args: &TaskArgs) {
        add_kernel(args)
    }
}

impl ModuleDeserialize for Add {
    fn deserialize(model: &dyn ModelReader, node_name: &str) -> QResult<Option<Box<dyn Module>>> {
        let inplace = get_optional_attribute::<InplacePolicy>(model, node_name, "inplace")?
            .unwrap_or(InplacePolicy::InplaceUnchangedBuffer);
        Ok(match get_quant_type(model, node_name)? {
            Some(quant_type @ (QuantType::Symm8Bit | QuantType::Symm16Bit)) => {
                Some(Box::new(Add::new(None, inplace, quant_type)))
            }
            _ => None,
        })
    }
}
