//! Graph-level constant folding for exported operator graphs (opset 9 and 10).
//!
//! Nodes whose inputs are all statically known (literal `Constant` nodes or root-block inputs
//! bound to parameter tensors) are evaluated eagerly. Each result becomes a new parameter-bound
//! root input, and the node together with its now orphaned constant producers is removed.

mod classifier;
mod evaluate;
mod pass;
mod slice;

pub use classifier::{are_inputs_constant, input_values, is_constant, ParamBindings, ParamMap};
pub use evaluate::{evaluate, FoldOutcome, Rejection};
pub use pass::{erase_unused_block_inputs, ConstantFoldPass};
pub use slice::resolve_slice_bounds;

use thiserror::Error;

use crate::env;
use crate::ir::{Graph, GraphError};

/// Operator-set revisions the pass knows how to fold.
pub const SUPPORTED_OPSETS: [i64; 2] = [9, 10];

/// Opset assumed when neither the caller nor the graph names one.
pub const DEFAULT_OPSET: i64 = 9;

/// Hard failures that abort a folding run.
#[derive(Debug, Error)]
pub enum FoldError {
    /// The graph contradicts what the classifier established about it.
    #[error("constant folding invariant violated: {0}")]
    InternalConsistency(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldConfig {
    pub opset_version: i64,
    /// Lint the graph once folding finishes.
    pub verify: bool,
}

impl Default for FoldConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl FoldConfig {
    /// Default opset with `GRAPHFOLD_VERIFY` applied.
    pub fn from_env() -> Self {
        Self {
            opset_version: DEFAULT_OPSET,
            verify: env::verify_enabled(),
        }
    }

    /// Configuration for `graph`, taking the opset it records when present.
    pub fn for_graph(graph: &Graph) -> Self {
        Self {
            opset_version: graph.opset_version().unwrap_or(DEFAULT_OPSET),
            ..Self::default()
        }
    }
}

/// Summary of one folding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldStats {
    /// Nodes replaced by a parameter-bound input.
    pub folded: usize,
    /// Literal constant producers destroyed alongside folded nodes.
    pub erased_constants: usize,
    /// Unused root inputs erased at the end of the run.
    pub erased_inputs: usize,
    /// Constant-input nodes the numeric backend declined to evaluate.
    pub rejected: usize,
}

impl FoldStats {
    pub fn changed(&self) -> bool {
        self.folded > 0 || self.erased_inputs > 0
    }

    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: FoldStats) -> FoldStats {
        FoldStats {
            folded: self.folded + other.folded,
            erased_constants: self.erased_constants + other.erased_constants,
            erased_inputs: self.erased_inputs + other.erased_inputs,
            rejected: self.rejected + other.rejected,
        }
    }
}

/// Folds constants in the root block of `graph`, rewriting `params` in place.
pub fn fold_constants(
    graph: &mut Graph,
    params: &mut ParamMap,
    opset_version: i64,
) -> Result<FoldStats, FoldError> {
    ConstantFoldPass::new(opset_version).run(graph, params)
}
