//! qmodule - quantized operator core for dual-core microcontroller inference
//!
//! Features:
//! - Power-of-two fixed-point arithmetic with round-half-even and saturation
//! - Int8 / int16 elementwise operators (Add, Div, Sigmoid) with broadcasting
//! - Lookup-table acceleration for int8 activations
//! - Cached task descriptors split across a primary and a secondary core
//! - Operator reconstruction from serialized graph nodes

pub mod config;
pub mod error;
pub mod model;
pub mod ops;
pub mod quantization;
pub mod tensor;

pub use config::{get_config, update_config, ConfigBuilder, RuntimeConfig};
pub use error::{ErrorCode, QError, QResult};
pub use model::{AttributeValue, GraphModel, ModelReader, NodeDef};
pub use ops::{Add, Div, InplacePolicy, Module, ModuleRegistry, ModuleState, RuntimeMode, Sigmoid};
pub use quantization::{QuantType, SIGMOID_LUT_EXPONENT};
pub use tensor::TensorBase;

/// Install a `tracing` fmt subscriber. Safe to call more than once.
pub fn init() -> QResult<()> {
    if tracing_subscriber::fmt().try_init().is_ok() {
        tracing::info!("qmodule {} initialized", version());
    }
    Ok(())
}

/// Get the current crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
