pub mod interpreter;

use std::sync::Arc;

use graphfold::executor::{ExecutorFactory, ExecutorRegistry, GraphExecutor, DEFAULT_EXECUTOR};
use graphfold::ir::Graph;

pub use interpreter::Interpreter;

/// Name the interpreter is registered under besides the default name.
pub const REF_EXECUTOR: &str = "ref";

/// Register the reference interpreter with `registry`.
///
/// The interpreter is registered under both "ref" and the default name, so a registry with
/// nothing else linked in still resolves a default engine.
pub fn register_ref_executor(registry: &mut ExecutorRegistry) {
    let factory: ExecutorFactory = Arc::new(create_interpreter);

    registry.register_factory(REF_EXECUTOR, Arc::clone(&factory));
    registry.register_factory(DEFAULT_EXECUTOR, factory);
}

fn create_interpreter(graph: Graph) -> anyhow::Result<Box<dyn GraphExecutor>> {
    Ok(Box::new(Interpreter::new(graph)))
}

/// Registry with only the reference interpreter in it.
pub fn ref_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    register_ref_executor(&mut registry);
    registry
}
