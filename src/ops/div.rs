//! Elementwise division with NumPy-style broadcasting.
//!
//! Int8 divisors are dequantized through a 256-entry table built per
//! descriptor; int16 divisors are dequantized inline. Both then divide and
//! round the same way. A zero divisor saturates toward the numerator's sign
//! and `0 / 0` yields zero.

use std::sync::Arc;

use crate::{
    error::{ErrorContext, QError, QResult, WithContext},
    model::{get_quant_type, ModelReader},
    quantization::{rescale_factor, round_half_even, scale, truncate, QuantElement, QuantType},
    tensor::{multidirectional_broadcast, TensorBase, TensorElement},
};
use super::args::{forward_elemwise, ElemwiseArgs, ElemwiseOp, LookupTable, TaskArgs, TaskCache};
use super::core::{InplacePolicy, Module, ModuleBase, ModuleDeserialize, RuntimeMode};

const OP_TYPE: &str = "Div";

#[derive(Debug)]
pub struct Div {
    base: ModuleBase,
    cache: TaskCache,
}

impl Div {
    pub fn new(name: Option<&str>, inplace: InplacePolicy, quant_type: QuantType) -> Self {
        Self {
            base: ModuleBase::new(name, inplace, quant_type),
            cache: TaskCache::default(),
        }
    }

    pub fn task_count(&self) -> usize {
        self.cache.len()
    }

    fn forward_template<T, F>(&mut self, tensors: &mut [TensorBase], mode: RuntimeMode, table: F) -> QResult<()>
    where
        T: TensorElement,
        TaskArgs: From<ElemwiseArgs<T>>,
        F: FnOnce(&[TensorBase]) -> Option<LookupTable>,
    {
        let [in0, in1] = [self.base.inputs_index[0], self.base.inputs_index[1]];
        let expected = multidirectional_broadcast(tensors[in0].shape(), tensors[in1].shape()).with_context(|| {
            ErrorContext::new(OP_TYPE)
                .with_shape(tensors[in0].shape())
                .with_shape(tensors[in1].shape())
                .with_quant_type(self.base.quant_type.as_str())
        })?;
        let op = ElemwiseOp {
            op_type: OP_TYPE,
            splittable: true,
            kernel: div_kernel,
        };
        forward_elemwise::<T, F>(op, &self.base, &mut self.cache, tensors, mode, &expected, table)
    }
}

/// `b * 2^exponent` for every int8 divisor, indexed by `b + 128`.
pub fn divisor_table(exponent: i32) -> Arc<[f32]> {
    let s = scale(exponent);
    (i8::MIN..=i8::MAX).map(|b| b as f32 * s).collect()
}

fn div_elements<T: QuantElement>(args: &ElemwiseArgs<T>) {
    let s0 = scale(args.input0_exponent);
    let s1 = scale(args.input1_exponent);
    let so = rescale_factor(args.output_exponent);
    let divisors = match args.table() {
        Some(LookupTable::Divisor(d)) => Some(&d[..]),
        _ => None,
    };
    args.for_each_offset(|out, i0, i1| {
        let numerator = args.load0(i0).to_f32() * s0;
        let divisor = args.load1(i1);
        let real = match divisors {
            Some(d) => d[(divisor.to_i32() + 128) as usize],
            None => divisor.to_f32() * s1,
        };
        args.store(out, truncate(round_half_even(numerator / real * so)));
    });
}

fn div_kernel(args: &TaskArgs) {
    match args {
        TaskArgs::Int8(a) => div_elements(a),
        TaskArgs::Int16(a) => div_elements(a),
    }
}

impl Module for Div {
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
        Ok(vec![multidirectional_broadcast(&input_shapes[0], &input_shapes[1])?])
    }

    fn forward(&mut self, tensors: &mut [TensorBase], mode: RuntimeMode) -> QResult<()> {
        self.base.check_bound(OP_TYPE, 2, tensors)?;
        let divisor = self.base.inputs_index[1];
        match self.base.quant_type {
            QuantType::Symm8Bit => self.forward_template::<i8, _>(tensors, mode, |t| {
                Some(LookupTable::Divisor(divisor_table(t[divisor].exponent)))
            })?,
            QuantType::Symm16Bit => self.forward_template::<i16, _>(tensors, mode, |_| None)?,
            QuantType::None => return Err(self.base.unsupported(OP_TYPE)),
        }
        self.base.mark_executed();
        Ok(())
    }

    fn forward_args(&self, args: &TaskArgs) {
        div_kernel(args)
    }
}

impl ModuleDeserialize for Div {
    fn deserialize(model: &dyn ModelReader, node_name: &str) -> QResult<Option<Box<dyn Module>>> {
        Ok(match get_quant_type(model, node_name)? {
            Some(quant_type @ (QuantType::Symm8Bit | QuantType::Symm16Bit)) => {
                Some(Box::new(Div::new(None, InplacePolicy::NonInplace, quant_type)))
            }
            _ => None,
        })
    }
}
