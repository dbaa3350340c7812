use tracing::{debug, info, warn};

use super::classifier::{are_inputs_constant, input_values, ParamBindings, ParamMap};
use super::evaluate::{evaluate, FoldOutcome, Rejection};
use super::{FoldConfig, FoldError, FoldStats, SUPPORTED_OPSETS};
use crate::ir::{lint, BlockId, Graph, GraphError, NodeId, NodeKind, ValueId};
use crate::tensor::Tensor;

/// Replaces constant-input nodes of the root block with parameter-bound inputs.
#[derive(Debug, Clone, Default)]
pub struct ConstantFoldPass {
    config: FoldConfig,
}

impl ConstantFoldPass {
    pub const NAME: &'static str = "onnx-constant-fold";

    pub fn new(opset_version: i64) -> Self {
        Self::with_config(FoldConfig {
            opset_version,
            ..FoldConfig::default()
        })
    }

    pub fn with_config(config: FoldConfig) -> Self {
        Self { config }
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn config(&self) -> &FoldConfig {
        &self.config
    }

    /// Folds the root block of `graph` and rebuilds `params` from the surviving bindings.
    ///
    /// Only root-block inputs are bound; nested blocks are left alone. On a hard error the
    /// graph may be partially rewritten and `params` holds every entry it started with plus
    /// the bindings created so far.
    pub fn run(&self, graph: &mut Graph, params: &mut ParamMap) -> Result<FoldStats, FoldError> {
        let opset = self.config.opset_version;
        if !SUPPORTED_OPSETS.contains(&opset) {
            warn!(
                pass = Self::NAME,
                opset, "constant folding only supports opset 9 and 10; graph left unchanged"
            );
            return Ok(FoldStats::default());
        }

        let root = graph.root();
        let mut bindings = ParamBindings::from_block_inputs(graph, root, std::mem::take(params));

        let outcome = self
            .fold_block(graph, root, &mut bindings)
            .and_then(|mut stats| {
                let dropped = bindings.retain_used(graph);
                stats.erased_inputs = erase_unused_block_inputs(graph, root)?;
                debug!(pass = Self::NAME, dropped, "purged dead parameter bindings");
                Ok(stats)
            });
        let stats = match outcome {
            Ok(stats) => {
                bindings.write_back(params);
                stats
            }
            Err(err) => {
                bindings.restore(params);
                return Err(err);
            }
        };

        if self.config.verify {
            lint(graph)?;
        }
        info!(
            pass = Self::NAME,
            opset,
            folded = stats.folded,
            erased_constants = stats.erased_constants,
            erased_inputs = stats.erased_inputs,
            rejected = stats.rejected,
            params = params.len(),
            "constant folding finished"
        );
        Ok(stats)
    }

    fn fold_block(
        &self,
        graph: &mut Graph,
        block: BlockId,
        bindings: &mut ParamBindings,
    ) -> Result<FoldStats, FoldError> {
        let mut stats = FoldStats::default();
        let mut cursor = graph.first_node(block);
        while let Some(node_id) = cursor {
            // Captured before any mutation so destroying `node_id` cannot lose our place.
            cursor = graph.next_node(node_id);

            let node = graph.node(node_id);
            if node.outputs().len() > 1 || !are_inputs_constant(graph, node_id, bindings) {
                continue;
            }
            let Some(output) = node.output() else {
                continue;
            };
            let inputs = input_values(graph, node_id, bindings)?;
            if inputs.is_empty() {
                continue;
            }
            let tensor = match evaluate(node, &inputs, self.config.opset_version) {
                FoldOutcome::Folded(tensor) => tensor,
                FoldOutcome::Unsupported(reason) => {
                    log_rejection(node.kind(), &reason);
                    stats.rejected += 1;
                    continue;
                }
            };

            let erased = splice_folded(graph, block, bindings, node_id, output, tensor)?;
            stats.folded += 1;
            stats.erased_constants += erased;
        }
        Ok(stats)
    }
}

fn log_rejection(kind: &NodeKind, reason: &Rejection) {
    match reason {
        Rejection::UnhandledKind(_) => {
            debug!(pass = ConstantFoldPass::NAME, op = %kind, "no constant evaluator for node kind");
        }
        _ => {
            warn!(pass = ConstantFoldPass::NAME, op = %kind, %reason, "constant node left unfolded");
        }
    }
}

/// Binds `tensor` to a fresh input of `block`, reroutes `output` to it and removes `node`
/// together with the `Constant` producers only it consumed. Returns how many producers went.
fn splice_folded(
    graph: &mut Graph,
    block: BlockId,
    bindings: &mut ParamBindings,
    node: NodeId,
    output: ValueId,
    tensor: Tensor,
) -> Result<usize, GraphError> {
    let input = graph.add_input(block, None)?;
    let name = fresh_param_name(graph, bindings, input);
    graph.set_debug_name(input, &name)?;
    graph.infer_type_from(input, &tensor);
    debug!(
        pass = ConstantFoldPass::NAME,
        op = %graph.node(node).kind(),
        param = %name,
        shape = ?tensor.shape(),
        "folded node into parameter"
    );
    bindings.bind(input, name, tensor);
    graph.replace_all_uses_with(output, input);

    let orphaned = orphaned_constants(graph, node);
    graph.remove_all_inputs(node);
    for &producer in &orphaned {
        graph.destroy_node(producer)?;
    }
    graph.destroy_node(node)?;
    Ok(orphaned.len())
}

/// `Constant` producers of `node`'s inputs whose every use is an input slot of `node`.
fn orphaned_constants(graph: &Graph, node: NodeId) -> Vec<NodeId> {
    let mut producers: Vec<NodeId> = Vec::new();
    for &input in graph.node(node).inputs() {
        let value = graph.value(input);
        let producer = value.producer();
        if *graph.node(producer).kind() != NodeKind::Constant || producers.contains(&producer) {
            continue;
        }
        if value.uses().iter().all(|use_| use_.user == node) {
            producers.push(producer);
        }
    }
    producers
}

fn fresh_param_name(graph: &Graph, bindings: &ParamBindings, value: ValueId) -> String {
    let base = format!("folded_{}", value.index());
    let mut candidate = base.clone();
    let mut suffix = 1usize;
    while graph.value_by_name(&candidate).is_some() || bindings.contains_name(&candidate) {
        candidate = format!("{base}_{suffix}");
        suffix += 1;
    }
    candidate
}

/// Erases every input of `block` without uses, highest index first. Returns how many went.
pub fn erase_unused_block_inputs(graph: &mut Graph, block: BlockId) -> Result<usize, GraphError> {
    let mut erased = 0;
    for index in (0..graph.block_inputs(block).len()).rev() {
        let input = graph.block_inputs(block)[index];
        if !graph.value(input).has_uses() {
            graph.erase_input(block, index)?;
            erased += 1;
        }
    }
    Ok(erased)
}
