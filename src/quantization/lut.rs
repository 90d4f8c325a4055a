//! Lookup-table acceleration for 8-bit activations.
//!
//! An 8-bit input has 256 representable values, so an activation whose output
//! exponent is fixed can be answered by a table indexed with `value + 128`.
//! Tables are keyed by the input exponent.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use tracing::debug;

use super::core::QuantElement;
use super::fixed::{rescale_factor, round_half_even, scale, truncate};

/// Output exponent the sigmoid tables are precomputed for. Sigmoid lies in
/// (0, 1), which 2^-7 covers with the full int8 range.
pub const SIGMOID_LUT_EXPONENT: i32 = -7;

pub type Lut8 = [i8; 256];

/// Source of precomputed activation tables.
pub trait LutProvider: Send + Sync {
    /// Table for inputs quantized at `exponent`. Pure and deterministic.
    fn table_for(&self, exponent: i32) -> Arc<Lut8>;

    /// Output exponent the tables answer for.
    fn output_exponent(&self) -> i32;
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Per-element float path: dequantize, apply `f`, requantize.
#[inline]
pub fn activation_quant<T: QuantElement>(f: fn(f32) -> f32, value: T, in_exponent: i32, out_exponent: i32) -> T {
    let real = f(value.to_f32() * scale(in_exponent));
    truncate(round_half_even(real * rescale_factor(out_exponent)))
}

/// Evaluate `f` through the float path for every int8 input.
pub fn build_table(f: fn(f32) -> f32, in_exponent: i32, out_exponent: i32) -> Lut8 {
    let mut table = [0i8; 256];
    for (slot, value) in table.iter_mut().zip(i8::MIN..=i8::MAX) {
        *slot = activation_quant(f, value, in_exponent, out_exponent);
    }
    table
}

#[inline]
pub fn lookup(table: &Lut8, value: i8) -> i8 {
    table[(value as i32 + 128) as usize]
}

lazy_static! {
    static ref SIGMOID_TABLES: RwLock<HashMap<i32, Arc<Lut8>>> = RwLock::new(HashMap::new());
}

/// Sigmoid tables at [`SIGMOID_LUT_EXPONENT`], built on first use and shared
/// process-wide.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigmoidLut;

impl LutProvider for SigmoidLut {
    fn table_for(&self, exponent: i32) -> Arc<Lut8> {
        if let Some(table) = SIGMOID_TABLES.read().get(&exponent) {
            return table.clone();
        }
        let mut tables = SIGMOID_TABLES.write();
        tables
            .entry(exponent)
            .or_insert_with(|| {
                debug!(exponent, "building sigmoid lookup table");
                Arc::new(build_table(sigmoid, exponent, SIGMOID_LUT_EXPONENT))
            })
            .clone()
    }

    fn output_exponent(&self) -> i32 {
        SIGMOID_LUT_EXPONENT
    }
}
