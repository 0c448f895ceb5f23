//! SSA-form intermediate representation between Wasm bytecode and QBE IL.
//!
//! The IR is a control-flow graph of basic blocks per function. Operand
//! stack values become numbered variables, block results merge through phi
//! nodes, and locals stay in addressable slots so QBE can promote them.

mod types;
pub use types::*;

pub mod builder;
pub use builder::{build_functions, build_module_init, static_init, IrBuilder, StaticInit};
