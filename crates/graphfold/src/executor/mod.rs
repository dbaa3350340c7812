//! Graph execution engines and the registry that selects among them by name.

mod registry;

pub use registry::{ExecutorRegistry, RegistryError, DEFAULT_EXECUTOR};

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::fold::ParamMap;
use crate::ir::Graph;
use crate::tensor::Tensor;

/// An engine that owns a graph and evaluates it on concrete inputs.
pub trait GraphExecutor: Send + Sync {
    /// Registered name of the engine kind (e.g. "ref").
    fn name(&self) -> &str;

    fn graph(&self) -> &Graph;

    /// Runs the graph with one tensor per root-block input, in input order, and returns the
    /// root-block outputs.
    fn run(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>>;
}

/// Builds an engine from an owned graph.
pub type ExecutorFactory = Arc<dyn Fn(Graph) -> Result<Box<dyn GraphExecutor>> + Send + Sync>;

/// Lines up parameter tensors and caller-provided tensors with the root-block inputs.
///
/// Each input is looked up by unique name, first in `params` and then in `runtime`.
pub fn collect_inputs(
    graph: &Graph,
    params: &ParamMap,
    runtime: &BTreeMap<String, Tensor>,
) -> Result<Vec<Tensor>> {
    let mut inputs = Vec::with_capacity(graph.block_inputs(graph.root()).len());
    for &input in graph.block_inputs(graph.root()) {
        let name = graph.value(input).unique_name();
        match params.get(&name).or_else(|| runtime.get(&name)) {
            Some(tensor) => inputs.push(tensor.clone()),
            None => bail!("no tensor provided for graph input `%{name}`"),
        }
    }
    Ok(inputs)
}
