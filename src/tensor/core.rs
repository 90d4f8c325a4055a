//! Quantized tensor handed to operators by the graph's tensor table

use std::fmt;

use crate::error::{QError, QResult};
use crate::quantization::{to_real, QuantElement, QuantType};
use super::shape::numel;

/// Element buffer of a quantized tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    I8(Vec<i8>),
    I16(Vec<i16>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::I8(v) => v.len(),
            TensorData::I16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn quant_type(&self) -> QuantType {
        match self {
            TensorData::I8(_) => QuantType::Symm8Bit,
            TensorData::I16(_) => QuantType::Symm16Bit,
        }
    }

    /// Address of the first element, used to detect reallocation.
    pub(crate) fn addr(&self) -> usize {
        match self {
            TensorData::I8(v) => v.as_ptr() as usize,
            TensorData::I16(v) => v.as_ptr() as usize,
        }
    }
}

/// Typed access to [`TensorData`].
pub trait TensorElement: QuantElement {
    fn slice(data: &TensorData) -> Option<&[Self]>;
    fn slice_mut(data: &mut TensorData) -> Option<&mut Vec<Self>>;
    fn wrap(values: Vec<Self>) -> TensorData;
}

impl TensorElement for i8 {
    fn slice(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::I8(v) => Some(v),
            _ => None,
        }
    }

    fn slice_mut(data: &mut TensorData) -> Option<&mut Vec<Self>> {
        match data {
            TensorData::I8(v) => Some(v),
            _ => None,
        }
    }

    fn wrap(values: Vec<Self>) -> TensorData {
        TensorData::I8(values)
    }
}

impl TensorElement for i16 {
    fn slice(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::I16(v) => Some(v),
            _ => None,
        }
    }

    fn slice_mut(data: &mut TensorData) -> Option<&mut Vec<Self>> {
        match data {
            TensorData::I16(v) => Some(v),
            _ => None,
        }
    }

    fn wrap(values: Vec<Self>) -> TensorData {
        TensorData::I16(values)
    }
}

/// A quantized tensor: shape, power-of-two exponent and element buffer.
///
/// Owned by the caller's tensor table. Operators only read and write through
/// it and never resize the buffer.
#[derive(Clone, PartialEq)]
pub struct TensorBase {
    shape: Vec<usize>,
    pub exponent: i32,
    data: TensorData,
}

impl TensorBase {
    /// Zero-filled tensor of the given quantization type.
    pub fn zeros(shape: &[usize], exponent: i32, quant_type: QuantType) -> QResult<Self> {
        let n = numel(shape);
        let data = match quant_type {
            QuantType::Symm8Bit => TensorData::I8(vec![0; n]),
            QuantType::Symm16Bit => TensorData::I16(vec![0; n]),
            QuantType::None => {
                return Err(QError::configuration("tensors need a symmetric quantization type"));
            }
        };
        Ok(Self {
            shape: shape.to_vec(),
            exponent,
            data,
        })
    }

    pub fn from_vec<T: TensorElement>(shape: &[usize], exponent: i32, values: Vec<T>) -> QResult<Self> {
        if numel(shape) != values.len() {
            return Err(QError::InvalidInput(format!(
                "shape {:?} holds {} elements, got {}",
                shape,
                numel(shape),
                values.len()
            )));
        }
        Ok(Self {
            shape: shape.to_vec(),
            exponent,
            data: T::wrap(values),
        })
    }

    /// Quantize real values at `exponent`.
    pub fn from_real<T: TensorElement>(shape: &[usize], exponent: i32, values: &[f32]) -> QResult<Self> {
        let quantized = values
            .iter()
            .map(|&x| crate::quantization::to_quant::<T>(x, exponent))
            .collect();
        Self::from_vec(shape, exponent, quantized)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Element count.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn quant_type(&self) -> QuantType {
        self.data.quant_type()
    }

    pub fn element_bytes(&self) -> usize {
        self.quant_type().element_bytes().unwrap_or(0)
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn as_slice<T: TensorElement>(&self) -> QResult<&[T]> {
        T::slice(&self.data).ok_or_else(|| self.dtype_error::<T>())
    }

    pub fn as_slice_mut<T: TensorElement>(&mut self) -> QResult<&mut [T]> {
        let err = self.dtype_error::<T>();
        T::slice_mut(&mut self.data).map(|v| v.as_mut_slice()).ok_or(err)
    }

    /// Raw element pointer and length for building task descriptors.
    ///
    /// Taken through `Vec::as_mut_ptr`, which does not invalidate pointers
    /// previously handed out for the same buffer.
    pub(crate) fn raw_parts<T: TensorElement>(&mut self) -> QResult<(*mut T, usize)> {
        let err = self.dtype_error::<T>();
        let values = T::slice_mut(&mut self.data).ok_or(err)?;
        Ok((values.as_mut_ptr(), values.len()))
    }

    pub(crate) fn buffer_addr(&self) -> usize {
        self.data.addr()
    }

    /// Dequantized copy of the elements.
    pub fn to_real(&self) -> Vec<f32> {
        match &self.data {
            TensorData::I8(v) => v.iter().map(|&x| to_real(x as i32, self.exponent)).collect(),
            TensorData::I16(v) => v.iter().map(|&x| to_real(x as i32, self.exponent)).collect(),
        }
    }

    fn dtype_error<T: TensorElement>(&self) -> QError {
        QError::InvalidInput(format!(
            "tensor holds {} elements, kernel expects {}",
            self.quant_type(),
            T::QUANT_TYPE
        ))
    }
}

impl fmt::Debug for TensorBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorBase")
            .field("shape", &self.shape)
            .field("exponent", &self.exponent)
            .field("quant_type", &self.quant_type())
            .finish()
    }
}
