use std::collections::HashSet;

use super::graph::{BlockId, Graph, GraphError, NodeId, ValueId};

/// Checks definition-before-use ordering and use-list consistency for every block.
pub fn lint(graph: &Graph) -> Result<(), GraphError> {
    let mut available = HashSet::new();
    lint_block(graph, graph.root(), &mut available)
}

fn lint_block(
    graph: &Graph,
    block: BlockId,
    available: &mut HashSet<ValueId>,
) -> Result<(), GraphError> {
    let param = graph.param_node(block);
    for (offset, &input) in graph.block_inputs(block).iter().enumerate() {
        check_definition(graph, input, param, offset)?;
        available.insert(input);
    }

    for node_id in graph.block_nodes(block) {
        let node = graph.node(node_id);
        if node.owning_block() != block {
            return Err(GraphError::Lint(format!(
                "{node_id} is listed in block {} but owned by block {}",
                block.index(),
                node.owning_block().index()
            )));
        }
        check_inputs(graph, node_id, available)?;
        for &nested in node.blocks() {
            // Values defined inside a nested block are not visible after it.
            let mut scope = available.clone();
            lint_block(graph, nested, &mut scope)?;
        }
        for (offset, &output) in node.outputs().iter().enumerate() {
            check_definition(graph, output, node_id, offset)?;
            available.insert(output);
        }
    }

    check_inputs(graph, graph.return_node(block), available)
}

fn check_inputs(
    graph: &Graph,
    node_id: NodeId,
    available: &HashSet<ValueId>,
) -> Result<(), GraphError> {
    for (offset, &input) in graph.node(node_id).inputs().iter().enumerate() {
        if !graph.contains_value(input) || !available.contains(&input) {
            return Err(GraphError::Lint(format!(
                "value {input} is used by {node_id} before it is defined"
            )));
        }
        let recorded = graph
            .value(input)
            .uses()
            .iter()
            .any(|use_| use_.user == node_id && use_.offset == offset);
        if !recorded {
            return Err(GraphError::Lint(format!(
                "use of {input} at input {offset} of {node_id} is missing from its use-list"
            )));
        }
    }
    Ok(())
}

fn check_definition(
    graph: &Graph,
    value: ValueId,
    producer: NodeId,
    offset: usize,
) -> Result<(), GraphError> {
    let data = graph.value(value);
    if data.producer() != producer || data.offset() != offset {
        return Err(GraphError::Lint(format!(
            "value {value} records producer {} output {} but is output {offset} of {producer}",
            data.producer(),
            data.offset()
        )));
    }
    for use_ in data.uses() {
        let consistent = graph.contains_node(use_.user)
            && graph.node(use_.user).inputs().get(use_.offset) == Some(&value);
        if !consistent {
            return Err(GraphError::Lint(format!(
                "use-list of {value} names input {} of {}, which does not consume it",
                use_.offset, use_.user
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::NodeKind;

    #[test]
    fn well_formed_graph_passes() {
        let mut graph = Graph::new();
        let root = graph.root();
        let x = graph.add_input(root, Some("x")).unwrap();
        let node = graph.append_node(root, NodeKind::Transpose, &[x], 1);
        let out = graph.node(node).outputs()[0];
        graph.register_output(root, out);
        lint(&graph).unwrap();
    }

    #[test]
    fn use_before_definition_is_reported() {
        let mut graph = Graph::new();
        let root = graph.root();
        let x = graph.add_input(root, Some("x")).unwrap();
        let first = graph.append_node(root, NodeKind::Transpose, &[x], 1);
        let second = graph.append_node(root, NodeKind::Cast, &[x], 1);
        let late = graph.node(second).outputs()[0];
        let first_out = graph.node(first).outputs()[0];
        // Rewire the first node to consume a value produced after it.
        graph.replace_all_uses_with(x, late);
        graph.register_output(root, first_out);
        assert!(matches!(lint(&graph), Err(GraphError::Lint(_))));
    }
}
