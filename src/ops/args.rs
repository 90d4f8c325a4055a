//! Task descriptors for elementwise kernels.
//!
//! A descriptor records everything one execution context needs to process its
//! share of an operator's output: views into the operand buffers, broadcast
//! strides, exponents, the flat output range it owns and an optional lookup
//! table. Operators build them once, cache them, and hand one to each core.

use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use crate::{
    config::RuntimeConfig,
    error::{QError, QResult},
    quantization::{lut::Lut8, QuantElement, QuantType},
    tensor::{broadcast_strides, contiguous_strides, numel, TensorBase, TensorElement},
};
use super::core::{ModuleBase, RuntimeMode};
use super::dual_core::{dispatch_tasks, KernelFn};

/// Raw view of a tensor's element buffer.
#[derive(Debug)]
pub(crate) struct TensorView<T> {
    ptr: *mut T,
    len: usize,
}

impl<T> Clone for TensorView<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TensorView<T> {}

// SAFETY: a view is only dereferenced by kernels while the forward call that
// dispatched it holds the tensor table mutably. Concurrent tasks write
// disjoint output ranges and only read inputs.
unsafe impl<T: Send> Send for TensorView<T> {}
unsafe impl<T: Sync> Sync for TensorView<T> {}

/// Precomputed table owned by a descriptor.
#[derive(Debug, Clone)]
pub enum LookupTable {
    /// Activation answers for every int8 input, indexed by `value + 128`.
    Activation(Arc<Lut8>),
    /// Real value of every int8 divisor, indexed by `value + 128`.
    Divisor(Arc<[f32]>),
}

/// Descriptor for one elementwise task over up to two broadcast inputs.
#[derive(Debug, Clone)]
pub struct ElemwiseArgs<T> {
    input0: TensorView<T>,
    input1: Option<TensorView<T>>,
    output: TensorView<T>,
    output_shape: Vec<usize>,
    output_strides: Vec<usize>,
    input0_strides: Vec<usize>,
    input1_strides: Vec<usize>,
    range: Range<usize>,
    pub input0_exponent: i32,
    pub input1_exponent: i32,
    pub output_exponent: i32,
    table: Option<LookupTable>,
}

impl<T: TensorElement> ElemwiseArgs<T> {
    /// Descriptor covering the whole output of `tensors[output]`.
    ///
    /// Every input must broadcast to the output's shape. All checks happen
    /// before any buffer pointer is taken.
    pub(crate) fn bind(tensors: &mut [TensorBase], inputs: &[usize], output: usize) -> QResult<Self> {
        let output_shape = tensors[output].shape().to_vec();
        let rank = output_shape.len();

        let input0_strides = broadcast_strides(tensors[inputs[0]].shape(), &output_shape)?;
        let input1_strides = match inputs.get(1) {
            Some(&i) => broadcast_strides(tensors[i].shape(), &output_shape)?,
            None => vec![0; rank],
        };
        let input0_exponent = tensors[inputs[0]].exponent;
        let input1_exponent = inputs.get(1).map_or(0, |&i| tensors[i].exponent);
        let output_exponent = tensors[output].exponent;

        let input0 = view(&mut tensors[inputs[0]])?;
        let input1 = match inputs.get(1) {
            Some(&i) => Some(view(&mut tensors[i])?),
            None => None,
        };
        let output_view = view(&mut tensors[output])?;

        Ok(Self {
            input0,
            input1,
            output: output_view,
            output_strides: contiguous_strides(&output_shape),
            range: 0..numel(&output_shape),
            output_shape,
            input0_strides,
            input1_strides,
            input0_exponent,
            input1_exponent,
            output_exponent,
            table: None,
        })
    }
}

fn view<T: TensorElement>(tensor: &mut TensorBase) -> QResult<TensorView<T>> {
    let (ptr, len) = tensor.raw_parts::<T>()?;
    Ok(TensorView { ptr, len })
}

impl<T: QuantElement> ElemwiseArgs<T> {
    /// Flat output elements this task owns.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    pub fn table(&self) -> Option<&LookupTable> {
        self.table.as_ref()
    }

    pub(crate) fn with_table(mut self, table: Option<LookupTable>) -> Self {
        self.table = table;
        self
    }

    /// Split into `[start, point)` and `[point, end)`.
    pub fn split_at(&self, point: usize) -> QResult<(Self, Self)> {
        if point <= self.range.start || point >= self.range.end {
            return Err(QError::configuration(format!(
                "split point {} outside ({}, {})",
                point, self.range.start, self.range.end
            )));
        }
        let mut first = self.clone();
        let mut second = self.clone();
        first.range = self.range.start..point;
        second.range = point..self.range.end;
        Ok((first, second))
    }

    /// Halfway boundary along the outermost non-unit output dimension, so
    /// each half is a run of whole rows. `None` when nothing can be split.
    pub fn partition_point(&self) -> Option<usize> {
        let axis = self.output_shape.iter().position(|&d| d > 1)?;
        let rows = self.output_shape[axis];
        let point = self.range.start + (rows / 2) * self.output_strides[axis];
        (point > self.range.start && point < self.range.end).then_some(point)
    }

    /// Visit every owned output element as `(output, input0, input1)` offsets.
    pub(crate) fn for_each_offset<F: FnMut(usize, usize, usize)>(&self, mut f: F) {
        if self.range.is_empty() {
            return;
        }
        let rank = self.output_shape.len();
        let mut coord = vec![0usize; rank];
        let mut rest = self.range.start;
        for (c, &stride) in coord.iter_mut().zip(self.output_strides.iter()) {
            *c = rest / stride;
            rest %= stride;
        }
        let dot = |strides: &[usize]| coord.iter().zip(strides).map(|(c, s)| c * s).sum::<usize>();
        let mut off0 = dot(&self.input0_strides);
        let mut off1 = dot(&self.input1_strides);

        for out in self.range.clone() {
            f(out, off0, off1);
            let mut axis = rank;
            while axis > 0 {
                axis -= 1;
                coord[axis] += 1;
                off0 += self.input0_strides[axis];
                off1 += self.input1_strides[axis];
                if coord[axis] < self.output_shape[axis] {
                    break;
                }
                off0 -= self.input0_strides[axis] * self.output_shape[axis];
                off1 -= self.input1_strides[axis] * self.output_shape[axis];
                coord[axis] = 0;
            }
        }
    }

    #[inline]
    pub(crate) fn load0(&self, offset: usize) -> T {
        debug_assert!(offset < self.input0.len);
        // SAFETY: broadcast strides keep every input offset below the input's
        // element count, checked when the descriptor was bound.
        unsafe { *self.input0.ptr.add(offset) }
    }

    #[inline]
    pub(crate) fn load1(&self, offset: usize) -> T {
        match self.input1 {
            Some(v) => {
                debug_assert!(offset < v.len);
                // SAFETY: as in `load0`.
                unsafe { *v.ptr.add(offset) }
            }
            None => T::default(),
        }
    }

    #[inline]
    pub(crate) fn store(&self, offset: usize, value: T) {
        debug_assert!(offset < self.output.len);
        // SAFETY: `offset` lies in this task's range, which is inside the
        // output buffer and disjoint from every other task's range.
        unsafe { *self.output.ptr.add(offset) = value }
    }
}

/// Descriptor tagged with its element width.
#[derive(Debug, Clone)]
pub enum TaskArgs {
    Int8(ElemwiseArgs<i8>),
    Int16(ElemwiseArgs<i16>),
}

impl TaskArgs {
    pub fn quant_type(&self) -> QuantType {
        match self {
            TaskArgs::Int8(_) => QuantType::Symm8Bit,
            TaskArgs::Int16(_) => QuantType::Symm16Bit,
        }
    }

    pub fn range(&self) -> Range<usize> {
        match self {
            TaskArgs::Int8(a) => a.range(),
            TaskArgs::Int16(a) => a.range(),
        }
    }
}

impl From<ElemwiseArgs<i8>> for TaskArgs {
    fn from(args: ElemwiseArgs<i8>) -> Self {
        TaskArgs::Int8(args)
    }
}

impl From<ElemwiseArgs<i16>> for TaskArgs {
    fn from(args: ElemwiseArgs<i16>) -> Self {
        TaskArgs::Int16(args)
    }
}

/// Turn a whole-output descriptor into one or two tasks.
pub(crate) fn plan_tasks<T>(
    args: ElemwiseArgs<T>,
    mode: RuntimeMode,
    splittable: bool,
    config: &RuntimeConfig,
) -> QResult<Vec<TaskArgs>>
where
    T: QuantElement,
    TaskArgs: From<ElemwiseArgs<T>>,
{
    let split = splittable
        && config.dual_core_enabled
        && match mode {
            RuntimeMode::SingleCore => false,
            RuntimeMode::MultiCore => true,
            RuntimeMode::Auto => args.len() >= config.split_threshold,
        };

    if split {
        if let Some(point) = args.partition_point() {
            let (first, second) = args.split_at(point)?;
            return Ok(vec![first.into(), second.into()]);
        }
    }
    Ok(vec![args.into()])
}

/// What a cached descriptor set was built against. Any change in buffer
/// address, length, shape or exponent forces a rebuild.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TaskKey {
    tensors: Vec<(usize, usize, Vec<usize>, i32)>,
    mode: RuntimeMode,
    split_threshold: usize,
    dual_core_enabled: bool,
}

impl TaskKey {
    pub(crate) fn capture(tensors: &[TensorBase], base: &ModuleBase, mode: RuntimeMode, config: &RuntimeConfig) -> Self {
        let tensors = base
            .inputs_index
            .iter()
            .chain(base.outputs_index.iter())
            .map(|&i| {
                let t = &tensors[i];
                (t.buffer_addr(), t.size(), t.shape().to_vec(), t.exponent)
            })
            .collect();
        Self {
            tensors,
            mode,
            split_threshold: config.split_threshold,
            dual_core_enabled: config.dual_core_enabled,
        }
    }
}

/// Descriptors owned by one operator instance, dropped with it.
#[derive(Debug, Default)]
pub(crate) struct TaskCache {
    key: Option<TaskKey>,
    tasks: Vec<TaskArgs>,
}

impl TaskCache {
    pub(crate) fn get_or_build<F>(&mut self, key: TaskKey, build: F) -> QResult<&[TaskArgs]>
    where
        F: FnOnce() -> QResult<Vec<TaskArgs>>,
    {
        if self.key.as_ref() != Some(&key) {
            self.key = None;
            self.tasks = build()?;
            self.key = Some(key);
            debug!(tasks = self.tasks.len(), "built task descriptors");
        }
        Ok(&self.tasks)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn tasks(&self) -> &[TaskArgs] {
        &self.tasks
    }
}

/// Everything an elementwise operator supplies to [`forward_elemwise`].
pub(crate) struct ElemwiseOp {
    pub op_type: &'static str,
    pub splittable: bool,
    pub kernel: KernelFn,
}

/// Shared forward path: validate the output shape, build or reuse the
/// descriptors and dispatch them.
pub(crate) fn forward_elemwise<T, F>(
    op: ElemwiseOp,
    base: &ModuleBase,
    cache: &mut TaskCache,
    tensors: &mut [TensorBase],
    mode: RuntimeMode,
    expected_shape: &[usize],
    table: F,
) -> QResult<()>
where
    T: TensorElement,
    TaskArgs: From<ElemwiseArgs<T>>,
    F: FnOnce(&[TensorBase]) -> Option<LookupTable>,
{
    let output = base.outputs_index[0];
    if tensors[output].shape() != expected_shape {
        return Err(QError::shape_error(
            tensors[output].shape(),
            expected_shape,
            &format!("{} output tensor has the wrong shape", op.op_type),
        ));
    }

    let config = crate::config::get_config();
    let key = TaskKey::capture(tensors, base, mode, &config);
    let tasks = cache.get_or_build(key, || {
        let table = table(&*tensors);
        let args = ElemwiseArgs::<T>::bind(tensors, &base.inputs_index, output)?.with_table(table);
        plan_tasks(args, mode, op.splittable, &config)
    })?;

    dispatch_tasks(op.op_type, op.kernel, tasks)
}
