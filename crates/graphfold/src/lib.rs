pub mod executor;
pub mod fold;
pub mod ir;
pub mod tensor;
mod env;
mod symbol;

pub use executor::{ExecutorFactory, ExecutorRegistry, GraphExecutor, DEFAULT_EXECUTOR};
pub use fold::{fold_constants, ConstantFoldPass, FoldConfig, FoldError, FoldStats, ParamMap};
pub use ir::{Graph, NodeKind};
pub use symbol::Symbol;
pub use tensor::{DType, Tensor};
