//! Quantized operators, their task descriptors and the dual-core executor

pub mod add;
pub mod args;
pub mod core;
pub mod div;
pub mod dual_core;
pub mod registry;
pub mod sigmoid;

pub use self::add::Add;
pub use self::args::{ElemwiseArgs, LookupTable, TaskArgs};
pub use self::core::{InplacePolicy, Module, ModuleBase, ModuleDeserialize, ModuleState, RuntimeMode};
pub use self::div::Div;
pub use self::dual_core::{dispatch_tasks, secondary_core, KernelFn, SecondaryCore, ThreadCore};
pub use self::registry::{DeserializeFn, ModuleRegistry};
pub use self::sigmoid::Sigmoid;
