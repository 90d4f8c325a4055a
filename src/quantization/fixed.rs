//! Power-of-two fixed-point scale model.
//!
//! A stored integer `v` with exponent `e` represents the real value `v * 2^e`.
//! Every kernel quantizes its output through [`to_quant`] / [`rescale`], so the
//! rounding law lives in exactly one place.

use super::core::QuantElement;

/// `2^exponent`, the factor from quantized to real.
#[inline]
pub fn scale(exponent: i32) -> f32 {
    2f32.powi(exponent)
}

/// `2^-exponent`, the factor from real to quantized.
#[inline]
pub fn rescale_factor(exponent: i32) -> f32 {
    2f32.powi(-exponent)
}

/// Round to nearest, ties to even.
#[inline]
pub fn round_half_even(x: f32) -> f32 {
    x.round_ties_even()
}

/// Saturate a rounded value into the range of `T`. NaN maps to zero.
#[inline]
pub fn truncate<T: QuantElement>(x: f32) -> T {
    if x.is_nan() {
        return T::default();
    }
    let clamped = x.clamp(T::MIN as f32, T::MAX as f32);
    T::from_i32(clamped as i32)
}

#[inline]
pub fn to_real(value: i32, exponent: i32) -> f32 {
    value as f32 * scale(exponent)
}

/// Quantize a real value at `exponent`, saturating into `T`.
#[inline]
pub fn to_quant<T: QuantElement>(x: f32, exponent: i32) -> T {
    truncate(round_half_even(x * rescale_factor(exponent)))
}

/// Move a quantized value from `in_exponent` to `out_exponent`.
#[inline]
pub fn rescale<T: QuantElement>(value: i32, in_exponent: i32, out_exponent: i32) -> T {
    truncate(round_half_even(value as f32 * scale(in_exponent - out_exponent)))
}
