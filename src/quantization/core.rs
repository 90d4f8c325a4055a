//! Core quantization types

use std::fmt;
use serde::{Deserialize, Serialize};

/// Quantization scheme of an operator.
///
/// Fixed when the operator is constructed. It selects the element width and
/// which kernel instantiation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantType {
    None,
    Symm8Bit,
    Symm16Bit,
}

impl QuantType {
    /// Element width in bytes, `None` for an unquantized type.
    pub const fn element_bytes(&self) -> Option<usize> {
        match self {
            QuantType::None => None,
            QuantType::Symm8Bit => Some(1),
            QuantType::Symm16Bit => Some(2),
        }
    }

    /// Whether a fixed-point kernel exists for this type.
    pub const fn is_symmetric(&self) -> bool {
        matches!(self, QuantType::Symm8Bit | QuantType::Symm16Bit)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            QuantType::None => "none",
            QuantType::Symm8Bit => "symm 8bit",
            QuantType::Symm16Bit => "symm 16bit",
        }
    }

    pub const fn as_i64(&self) -> i64 {
        match self {
            QuantType::None => 0,
            QuantType::Symm8Bit => 1,
            QuantType::Symm16Bit => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(QuantType::None),
            1 => Some(QuantType::Symm8Bit),
            2 => Some(QuantType::Symm16Bit),
            _ => None,
        }
    }

    /// Parse the names a model exporter may write for a quantization type.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" | "quant_type_none" => Some(QuantType::None),
            "symm8" | "symm 8bit" | "int8" | "quant_type_symm_8bit" => Some(QuantType::Symm8Bit),
            "symm16" | "symm 16bit" | "int16" | "quant_type_symm_16bit" => Some(QuantType::Symm16Bit),
            _ => None,
        }
    }
}

/// Name used in operator descriptions and logs.
pub fn quant_type_to_string(quant_type: QuantType) -> &'static str {
    quant_type.as_str()
}

impl fmt::Display for QuantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(quant_type_to_string(*self))
    }
}

/// Integer element of a symmetric quantized tensor.
pub trait QuantElement: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const QUANT_TYPE: QuantType;
    const MIN: i32;
    const MAX: i32;

    fn to_i32(self) -> i32;

    /// Narrowing conversion; `value` must already be in `[MIN, MAX]`.
    fn from_i32(value: i32) -> Self;

    fn to_f32(self) -> f32 {
        self.to_i32() as f32
    }
}

macro_rules! impl_quant_element {
    ($($t:ty => $qt:expr),*) => {
        $(
            impl QuantElement for $t {
                const QUANT_TYPE: QuantType = $qt;
                const MIN: i32 = <$t>::MIN as i32;
                const MAX: i32 = <$t>::MAX as i32;

                #[inline]
                fn to_i32(self) -> i32 {
                    self as i32
                }

                #[inline]
                fn from_i32(value: i32) -> Self {
                    value as $t
                }
            }
        )*
    };
}

impl_quant_element!(i8 => QuantType::Symm8Bit, i16 => QuantType::Symm16Bit);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quant_type_widths() {
        assert_eq!(QuantType::Symm8Bit.element_bytes(), Some(1));
        assert_eq!(QuantType::Symm16Bit.element_bytes(), Some(2));
        assert_eq!(QuantType::None.element_bytes(), None);
        assert!(!QuantType::None.is_symmetric());
    }

    #[test]
    fn test_quant_type_parse() {
        assert_eq!(QuantType::parse("QUANT_TYPE_SYMM_8BIT"), Some(QuantType::Symm8Bit));
        assert_eq!(QuantType::parse("int16"), Some(QuantType::Symm16Bit));
        assert_eq!(QuantType::parse("fp8"), None);
        for qt in [QuantType::None, QuantType::Symm8Bit, QuantType::Symm16Bit] {
            assert_eq!(QuantType::from_i64(qt.as_i64()), Some(qt));
            assert_eq!(QuantType::parse(qt.as_str()), Some(qt));
        }
    }

    #[test]
    fn test_element_ranges() {
        assert_eq!((i8::MIN, i8::MAX), (-128, 127));
        assert_eq!(<i16 as QuantElement>::MIN, -32768);
        assert_eq!(<i16 as QuantElement>::QUANT_TYPE, QuantType::Symm16Bit);
    }
}
