use std::collections::BTreeMap;

use super::FoldError;
use crate::ir::{AttributeKind, BlockId, Graph, NodeId, NodeKind, ValueId};
use crate::tensor::Tensor;

/// Externally owned parameter table: name to tensor.
pub type ParamMap = BTreeMap<String, Tensor>;

/// Root-block inputs bound to parameter tensors, keyed by value.
///
/// Table entries that match no input are kept aside so a failed run can hand the table back
/// intact; a successful run drops them when the table is rebuilt.
#[derive(Debug, Clone, Default)]
pub struct ParamBindings {
    entries: BTreeMap<ValueId, (String, Tensor)>,
    detached: ParamMap,
}

impl ParamBindings {
    /// Binds every input of `block` whose unique name appears in `params`.
    pub fn from_block_inputs(graph: &Graph, block: BlockId, mut params: ParamMap) -> Self {
        let mut entries = BTreeMap::new();
        for &input in graph.block_inputs(block) {
            let name = graph.value(input).unique_name();
            if let Some(tensor) = params.remove(&name) {
                entries.insert(input, (name, tensor));
            }
        }
        Self {
            entries,
            detached: params,
        }
    }

    pub fn bind(&mut self, value: ValueId, name: String, tensor: Tensor) {
        self.entries.insert(value, (name, tensor));
    }

    pub fn get(&self, value: ValueId) -> Option<&Tensor> {
        self.entries.get(&value).map(|(_, tensor)| tensor)
    }

    pub fn name(&self, value: ValueId) -> Option<&str> {
        self.entries.get(&value).map(|(name, _)| name.as_str())
    }

    pub fn contains(&self, value: ValueId) -> bool {
        self.entries.contains_key(&value)
    }

    /// True if `name` is taken by a binding or by an unbound table entry.
    pub fn contains_name(&self, name: &str) -> bool {
        self.detached.contains_key(name) || self.entries.values().any(|(bound, _)| bound == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueId, &str, &Tensor)> {
        self.entries
            .iter()
            .map(|(&value, (name, tensor))| (value, name.as_str(), tensor))
    }

    /// Drops bindings whose value has no remaining uses; returns how many were dropped.
    pub fn retain_used(&mut self, graph: &Graph) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|&value, _| graph.contains_value(value) && graph.value(value).has_uses());
        before - self.entries.len()
    }

    /// Rebuilds `params` from the surviving bindings only.
    pub fn write_back(self, params: &mut ParamMap) {
        params.clear();
        params.extend(self.entries.into_values());
    }

    /// Returns every entry, bound or not, to `params`.
    pub fn restore(self, params: &mut ParamMap) {
        params.clear();
        params.extend(self.detached);
        params.extend(self.entries.into_values());
    }
}

/// True if `value` is statically known: a parameter-bound root input or the output of a
/// literal `Constant` node.
pub fn is_constant(graph: &Graph, value: ValueId, bindings: &ParamBindings) -> bool {
    if bindings.contains(value) {
        return true;
    }
    let producer = graph.value(value).producer();
    let node = graph.node(producer);
    *node.kind() == NodeKind::Constant
        && !graph.must_be_none(producer)
        && node.attr_kind("value") == Some(AttributeKind::Tensor)
}

/// True if every input of `node` is constant. Vacuously true for nodes without inputs.
pub fn are_inputs_constant(graph: &Graph, node: NodeId, bindings: &ParamBindings) -> bool {
    graph
        .node(node)
        .inputs()
        .iter()
        .all(|&input| is_constant(graph, input, bindings))
}

/// Fetches the tensor behind each input of `node`, in input order.
///
/// Callers establish [`are_inputs_constant`] first; any input that turns out to have no tensor
/// is an internal inconsistency.
pub fn input_values<'a>(
    graph: &'a Graph,
    node: NodeId,
    bindings: &'a ParamBindings,
) -> Result<Vec<&'a Tensor>, FoldError> {
    let root_params = graph.param_node(graph.root());
    let inputs = graph.node(node).inputs();
    let mut values = Vec::with_capacity(inputs.len());
    for &input in inputs {
        let producer = graph.value(input).producer();
        let producer_kind = graph.node(producer).kind();
        let tensor = if producer == root_params {
            bindings.get(input).ok_or_else(|| {
                FoldError::InternalConsistency(format!(
                    "root input %{} has no parameter binding",
                    graph.value(input).unique_name()
                ))
            })?
        } else if *producer_kind == NodeKind::Constant {
            graph.node(producer).t("value").ok_or_else(|| {
                FoldError::InternalConsistency(format!(
                    "Constant producing %{} carries no tensor value",
                    graph.value(input).unique_name()
                ))
            })?
        } else {
            return Err(FoldError::InternalConsistency(format!(
                "input %{} of {} is produced by {producer_kind}, which is neither a parameter \
                 nor a constant",
                graph.value(input).unique_name(),
                graph.node(node).kind()
            )));
        };
        values.push(tensor);
    }
    Ok(values)
}
