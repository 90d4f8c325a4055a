//! Quantized tensors and shape algebra.
//!
//! The tensor table itself belongs to the graph executor; this module only
//! defines what an operator can see of a tensor: its shape, exponent and
//! element buffer.

pub mod core;
pub mod shape;

pub use self::core::{TensorBase, TensorData, TensorElement};
pub use self::shape::{broadcast_strides, channel_broadcast, contiguous_strides, multidirectional_broadcast, numel};
