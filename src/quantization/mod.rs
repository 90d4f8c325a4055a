//! Symmetric power-of-two quantization: types, rounding law and lookup tables

pub mod core;
pub mod fixed;
pub mod lut;

pub use self::core::*;
pub use self::fixed::*;
pub use self::lut::{LutProvider, SigmoidLut, SIGMOID_LUT_EXPONENT};
