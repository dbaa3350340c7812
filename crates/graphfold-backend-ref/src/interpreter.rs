//! Node-by-node interpreter over the root block.
//!
//! Every node is evaluated with the same kernels the folding pass uses, so a folded graph and
//! its unfolded original are expected to produce identical outputs.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use graphfold::executor::GraphExecutor;
use graphfold::fold::{evaluate, FoldOutcome, DEFAULT_OPSET};
use graphfold::ir::{Graph, NodeKind, ValueId};
use graphfold::tensor::Tensor;
use tracing::{debug, trace};

use crate::REF_EXECUTOR;

pub struct Interpreter {
    graph: Graph,
    opset_version: i64,
}

impl Interpreter {
    pub fn new(graph: Graph) -> Self {
        let opset_version = graph.opset_version().unwrap_or(DEFAULT_OPSET);
        Self {
            graph,
            opset_version,
        }
    }

    pub fn opset_version(&self) -> i64 {
        self.opset_version
    }

    fn operand<'a>(values: &'a HashMap<ValueId, Tensor>, id: ValueId) -> Result<&'a Tensor> {
        values
            .get(&id)
            .ok_or_else(|| anyhow!("operand {id} has no tensor value"))
    }
}

impl GraphExecutor for Interpreter {
    fn name(&self) -> &str {
        REF_EXECUTOR
    }

    fn graph(&self) -> &Graph {
        &self.graph
    }

    fn run(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let graph = &self.graph;
        let root = graph.root();
        let params = graph.block_inputs(root);
        if params.len() != inputs.len() {
            bail!(
                "graph takes {} inputs but {} tensors were provided",
                params.len(),
                inputs.len()
            );
        }

        let mut values: HashMap<ValueId, Tensor> = params
            .iter()
            .copied()
            .zip(inputs.iter().cloned())
            .collect();

        debug!(
            executor = REF_EXECUTOR,
            opset = self.opset_version,
            inputs = inputs.len(),
            "running graph"
        );

        for (index, node_id) in graph.block_nodes(root).enumerate() {
            let node = graph.node(node_id);
            if !node.blocks().is_empty() {
                bail!(
                    "node {index} ({}) carries nested blocks, which the reference executor does not run",
                    node.kind()
                );
            }
            // The absent-value sentinel produces nothing a kernel can consume.
            if graph.must_be_none(node_id) {
                continue;
            }
            let output = node.output().ok_or_else(|| {
                anyhow!(
                    "node {index} ({}) has {} outputs; only single-output nodes are executed",
                    node.kind(),
                    node.outputs().len()
                )
            })?;

            let result = if *node.kind() == NodeKind::Constant {
                node.t("value")
                    .cloned()
                    .ok_or_else(|| anyhow!("node {index} (Constant) has no `value` tensor"))?
            } else {
                let operands = node
                    .inputs()
                    .iter()
                    .map(|&id| Self::operand(&values, id))
                    .collect::<Result<Vec<_>>>()
                    .with_context(|| format!("node {index} ({})", node.kind()))?;
                match evaluate(node, &operands, self.opset_version) {
                    FoldOutcome::Folded(tensor) => tensor,
                    FoldOutcome::Unsupported(reason) => {
                        bail!("node {index} ({}) cannot be executed: {reason}", node.kind())
                    }
                }
            };
            trace!(node = index, kind = %node.kind(), shape = ?result.shape(), "evaluated");
            values.insert(output, result);
        }

        graph
            .block_outputs(root)
            .iter()
            .map(|&id| Self::operand(&values, id).cloned())
            .collect()
    }
}
