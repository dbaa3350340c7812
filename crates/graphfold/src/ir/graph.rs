//! Arena-backed operator graph.
//!
//! Nodes, values and blocks live in index-addressed arenas. Destroying a node clears its slot
//! and unlinks it from its block's node list; ids are never reused, so a handle captured before
//! a mutation either still names the same entity or names a destroyed one.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use smallvec::SmallVec;
use thiserror::Error;

use super::attr::{Attribute, AttributeKind};
use super::kind::NodeKind;
use crate::tensor::{DType, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Static type carried by a value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValueType {
    #[default]
    Unknown,
    /// Type of the "None" sentinel produced by an absent optional input.
    None,
    Tensor { dtype: DType, shape: Vec<usize> },
}

impl ValueType {
    pub fn of_tensor(tensor: &Tensor) -> Self {
        ValueType::Tensor {
            dtype: tensor.dtype(),
            shape: tensor.shape().to_vec(),
        }
    }
}

/// One consuming input slot of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub user: NodeId,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct Value {
    id: ValueId,
    debug_name: Option<String>,
    ty: ValueType,
    producer: NodeId,
    offset: usize,
    uses: Vec<Use>,
}

impl Value {
    pub fn id(&self) -> ValueId {
        self.id
    }

    pub fn debug_name(&self) -> Option<&str> {
        self.debug_name.as_deref()
    }

    /// Debug name if one was assigned, otherwise the numeric id.
    pub fn unique_name(&self) -> String {
        match &self.debug_name {
            Some(name) => name.clone(),
            None => self.id.0.to_string(),
        }
    }

    pub fn ty(&self) -> &ValueType {
        &self.ty
    }

    pub fn producer(&self) -> NodeId {
        self.producer
    }

    /// Position of this value among its producer's outputs.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn uses(&self) -> &[Use] {
        &self.uses
    }

    pub fn has_uses(&self) -> bool {
        !self.uses.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    inputs: SmallVec<[ValueId; 4]>,
    outputs: SmallVec<[ValueId; 2]>,
    attributes: BTreeMap<String, Attribute>,
    blocks: Vec<BlockId>,
    owner: BlockId,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    /// The sole output, when the node has exactly one.
    pub fn output(&self) -> Option<ValueId> {
        match self.outputs.as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    pub fn attributes(&self) -> &BTreeMap<String, Attribute> {
        &self.attributes
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attr_kind(&self, name: &str) -> Option<AttributeKind> {
        self.attr(name).map(Attribute::kind)
    }

    pub fn i(&self, name: &str) -> Option<i64> {
        match self.attr(name)? {
            Attribute::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is(&self, name: &str) -> Option<&[i64]> {
        match self.attr(name)? {
            Attribute::Ints(values) => Some(values),
            _ => None,
        }
    }

    pub fn f(&self, name: &str) -> Option<f64> {
        match self.attr(name)? {
            Attribute::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn s(&self, name: &str) -> Option<&str> {
        match self.attr(name)? {
            Attribute::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn t(&self, name: &str) -> Option<&Tensor> {
        match self.attr(name)? {
            Attribute::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    /// Nested blocks owned by this node (control flow bodies).
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    pub fn owning_block(&self) -> BlockId {
        self.owner
    }
}

#[derive(Debug, Clone)]
struct BlockData {
    param_node: NodeId,
    return_node: NodeId,
    first: Option<NodeId>,
    last: Option<NodeId>,
    owner: Option<NodeId>,
}

/// Structural errors raised by graph mutations and verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("debug name `{0}` is invalid: names are non-empty, not purely numeric, and use [A-Za-z0-9_.]")]
    InvalidName(String),
    #[error("debug name `{0}` is already used by another value")]
    DuplicateName(String),
    #[error("block input {index} still has {uses} use(s)")]
    InputInUse { index: usize, uses: usize },
    #[error("block input index {index} is out of range ({len} inputs)")]
    InputIndexOutOfRange { index: usize, len: usize },
    #[error("{node} ({kind}) cannot be destroyed while its outputs have uses")]
    OutputsInUse { node: NodeId, kind: String },
    #[error("{0} nodes frame a block and cannot be destroyed directly")]
    BoundaryNode(String),
    #[error("graph verification failed: {0}")]
    Lint(String),
}

/// Operator graph with a root block and optional nested blocks.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    values: Vec<Option<Value>>,
    blocks: Vec<BlockData>,
    names: HashMap<String, ValueId>,
    opset_version: Option<i64>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        let mut graph = Graph {
            nodes: Vec::new(),
            values: Vec::new(),
            blocks: Vec::new(),
            names: HashMap::new(),
            opset_version: None,
        };
        graph.new_block(None);
        graph
    }

    pub fn root(&self) -> BlockId {
        BlockId(0)
    }

    /// Operator-set revision the exporter targeted, when recorded.
    pub fn opset_version(&self) -> Option<i64> {
        self.opset_version
    }

    pub fn set_opset_version(&mut self, version: Option<i64>) {
        self.opset_version = version;
    }

    /// Returns the node behind `id`.
    ///
    /// # Panics
    /// Panics if the node was destroyed.
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("{id} was destroyed"))
    }

    /// Returns the value behind `id`.
    ///
    /// # Panics
    /// Panics if the value's producer was destroyed.
    pub fn value(&self, id: ValueId) -> &Value {
        self.values[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("value {id} was destroyed"))
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.index()), Some(Some(_)))
    }

    pub fn contains_value(&self, id: ValueId) -> bool {
        matches!(self.values.get(id.index()), Some(Some(_)))
    }

    pub fn value_by_name(&self, name: &str) -> Option<ValueId> {
        self.names.get(name).copied()
    }

    pub fn param_node(&self, block: BlockId) -> NodeId {
        self.blocks[block.index()].param_node
    }

    pub fn return_node(&self, block: BlockId) -> NodeId {
        self.blocks[block.index()].return_node
    }

    /// Node that owns `block`, or `None` for the root block.
    pub fn block_owner(&self, block: BlockId) -> Option<NodeId> {
        self.blocks[block.index()].owner
    }

    pub fn block_inputs(&self, block: BlockId) -> &[ValueId] {
        self.node(self.param_node(block)).outputs()
    }

    pub fn block_outputs(&self, block: BlockId) -> &[ValueId] {
        self.node(self.return_node(block)).inputs()
    }

    pub fn first_node(&self, block: BlockId) -> Option<NodeId> {
        self.blocks[block.index()].first
    }

    pub fn next_node(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).next
    }

    /// Iterates the nodes of `block` in program order.
    pub fn block_nodes(&self, block: BlockId) -> BlockNodes<'_> {
        BlockNodes {
            graph: self,
            next: self.first_node(block),
        }
    }

    /// Appends a formal input to `block`.
    pub fn add_input(&mut self, block: BlockId, name: Option<&str>) -> Result<ValueId, GraphError> {
        if let Some(name) = name {
            self.check_name(name)?;
        }
        let param = self.param_node(block);
        let offset = self.node(param).outputs.len();
        let value = self.alloc_value(param, offset);
        self.node_mut(param).outputs.push(value);
        if let Some(name) = name {
            self.assign_name(value, name);
        }
        Ok(value)
    }

    /// Removes the block input at `index`; it must be unused.
    pub fn erase_input(&mut self, block: BlockId, index: usize) -> Result<(), GraphError> {
        let param = self.param_node(block);
        let outputs = &self.node(param).outputs;
        let value = *outputs.get(index).ok_or(GraphError::InputIndexOutOfRange {
            index,
            len: outputs.len(),
        })?;
        let uses = self.value(value).uses.len();
        if uses > 0 {
            return Err(GraphError::InputInUse { index, uses });
        }
        self.node_mut(param).outputs.remove(index);
        let shifted: Vec<ValueId> = self.node(param).outputs[index..].to_vec();
        for (step, shifted_value) in shifted.into_iter().enumerate() {
            self.value_mut(shifted_value).offset = index + step;
        }
        self.free_value(value);
        Ok(())
    }

    /// Appends `value` to the outputs of `block`.
    pub fn register_output(&mut self, block: BlockId, value: ValueId) -> usize {
        let ret = self.return_node(block);
        let offset = self.node(ret).inputs.len();
        self.add_use(value, ret, offset);
        self.node_mut(ret).inputs.push(value);
        offset
    }

    /// Creates a node at the end of `block` consuming `inputs` and producing `num_outputs` values.
    ///
    /// # Panics
    /// Panics when asked to append a `Param` or `Return` node.
    pub fn append_node(
        &mut self,
        block: BlockId,
        kind: NodeKind,
        inputs: &[ValueId],
        num_outputs: usize,
    ) -> NodeId {
        assert!(
            !kind.is_block_boundary(),
            "{kind} nodes are created with their block"
        );
        let id = self.alloc_node(kind, block);
        for (offset, &input) in inputs.iter().enumerate() {
            self.add_use(input, id, offset);
        }
        let outputs: SmallVec<[ValueId; 2]> = (0..num_outputs)
            .map(|offset| self.alloc_value(id, offset))
            .collect();

        let prev = self.blocks[block.index()].last;
        {
            let node = self.node_mut(id);
            node.inputs = inputs.iter().copied().collect();
            node.outputs = outputs;
            node.prev = prev;
        }
        match prev {
            Some(last) => self.node_mut(last).next = Some(id),
            None => self.blocks[block.index()].first = Some(id),
        }
        self.blocks[block.index()].last = Some(id);
        id
    }

    /// Adds a nested block owned by `node`.
    pub fn add_nested_block(&mut self, node: NodeId) -> BlockId {
        let block = self.new_block(Some(node));
        self.node_mut(node).blocks.push(block);
        block
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, attr: impl Into<Attribute>) {
        self.node_mut(node)
            .attributes
            .insert(name.to_string(), attr.into());
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) -> Option<Attribute> {
        self.node_mut(node).attributes.remove(name)
    }

    pub fn set_value_type(&mut self, value: ValueId, ty: ValueType) {
        self.value_mut(value).ty = ty;
    }

    /// Sets the complete tensor type of `value` from a concrete tensor.
    pub fn infer_type_from(&mut self, value: ValueId, tensor: &Tensor) {
        self.value_mut(value).ty = ValueType::of_tensor(tensor);
    }

    pub fn set_debug_name(&mut self, value: ValueId, name: &str) -> Result<(), GraphError> {
        if self.value(value).debug_name() == Some(name) {
            return Ok(());
        }
        self.check_name(name)?;
        if let Some(previous) = self.value_mut(value).debug_name.take() {
            self.names.remove(&previous);
        }
        self.assign_name(value, name);
        Ok(())
    }

    /// True for the `Constant` sentinel standing in for an absent optional value.
    pub fn must_be_none(&self, node: NodeId) -> bool {
        let node = self.node(node);
        node.kind == NodeKind::Constant
            && node
                .output()
                .is_some_and(|output| *self.value(output).ty() == ValueType::None)
    }

    /// Rewires every consumer of `from` to consume `to` instead.
    pub fn replace_all_uses_with(&mut self, from: ValueId, to: ValueId) {
        if from == to {
            return;
        }
        let uses = std::mem::take(&mut self.value_mut(from).uses);
        for use_ in uses {
            self.node_mut(use_.user).inputs[use_.offset] = to;
            self.value_mut(to).uses.push(use_);
        }
    }

    /// Disconnects every input of `node`, updating the use-lists of the inputs.
    pub fn remove_all_inputs(&mut self, node: NodeId) {
        let inputs = std::mem::take(&mut self.node_mut(node).inputs);
        for (offset, input) in inputs.into_iter().enumerate() {
            self.remove_use(input, node, offset);
        }
    }

    /// Destroys `node` together with its outputs and nested blocks.
    pub fn destroy_node(&mut self, node: NodeId) -> Result<(), GraphError> {
        let (kind, outputs, blocks) = {
            let data = self.node(node);
            (data.kind.clone(), data.outputs.clone(), data.blocks.clone())
        };
        if kind.is_block_boundary() {
            return Err(GraphError::BoundaryNode(kind.to_string()));
        }
        if outputs.iter().any(|&output| self.value(output).has_uses()) {
            return Err(GraphError::OutputsInUse {
                node,
                kind: kind.to_string(),
            });
        }
        for block in blocks.into_iter().rev() {
            self.destroy_block(block)?;
        }
        self.remove_all_inputs(node);
        self.unlink(node);
        for output in outputs {
            self.free_value(output);
        }
        self.nodes[node.index()] = None;
        Ok(())
    }

    fn destroy_block(&mut self, block: BlockId) -> Result<(), GraphError> {
        let ret = self.return_node(block);
        self.remove_all_inputs(ret);
        let mut cursor = self.blocks[block.index()].last;
        while let Some(node) = cursor {
            cursor = self.node(node).prev;
            self.destroy_node(node)?;
        }
        let param = self.param_node(block);
        let inputs = self.node(param).outputs.clone();
        for input in inputs {
            self.free_value(input);
        }
        self.nodes[param.index()] = None;
        self.nodes[ret.index()] = None;
        Ok(())
    }

    fn new_block(&mut self, owner: Option<NodeId>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        let param_node = self.alloc_node(NodeKind::Param, id);
        let return_node = self.alloc_node(NodeKind::Return, id);
        self.blocks.push(BlockData {
            param_node,
            return_node,
            first: None,
            last: None,
            owner,
        });
        id
    }

    fn alloc_node(&mut self, kind: NodeKind, owner: BlockId) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(Node {
            id,
            kind,
            inputs: SmallVec::new(),
            outputs: SmallVec::new(),
            attributes: BTreeMap::new(),
            blocks: Vec::new(),
            owner,
            prev: None,
            next: None,
        }));
        id
    }

    fn alloc_value(&mut self, producer: NodeId, offset: usize) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Some(Value {
            id,
            debug_name: None,
            ty: ValueType::Unknown,
            producer,
            offset,
            uses: Vec::new(),
        }));
        id
    }

    fn free_value(&mut self, value: ValueId) {
        if let Some(freed) = self.values[value.index()].take() {
            if let Some(name) = freed.debug_name {
                self.names.remove(&name);
            }
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("{id} was destroyed"))
    }

    fn value_mut(&mut self, id: ValueId) -> &mut Value {
        self.values[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("value {id} was destroyed"))
    }

    fn add_use(&mut self, value: ValueId, user: NodeId, offset: usize) {
        self.value_mut(value).uses.push(Use { user, offset });
    }

    fn remove_use(&mut self, value: ValueId, user: NodeId, offset: usize) {
        let uses = &mut self.value_mut(value).uses;
        if let Some(pos) = uses
            .iter()
            .position(|use_| use_.user == user && use_.offset == offset)
        {
            uses.remove(pos);
        }
    }

    fn unlink(&mut self, node: NodeId) {
        let (prev, next, owner) = {
            let data = self.node(node);
            (data.prev, data.next, data.owner)
        };
        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.blocks[owner.index()].first = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.blocks[owner.index()].last = prev,
        }
        let data = self.node_mut(node);
        data.prev = None;
        data.next = None;
    }

    fn check_name(&self, name: &str) -> Result<(), GraphError> {
        let valid = !name.is_empty()
            && !name.bytes().all(|b| b.is_ascii_digit())
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.');
        if !valid {
            return Err(GraphError::InvalidName(name.to_string()));
        }
        if self.names.contains_key(name) {
            return Err(GraphError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn assign_name(&mut self, value: ValueId, name: &str) {
        self.value_mut(value).debug_name = Some(name.to_string());
        self.names.insert(name.to_string(), value);
    }
}

/// Program-order iterator over a block's nodes.
pub struct BlockNodes<'a> {
    graph: &'a Graph,
    next: Option<NodeId>,
}

impl<'a> Iterator for BlockNodes<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.graph.node(id).next;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (Graph, ValueId, NodeId, NodeId) {
        let mut graph = Graph::new();
        let root = graph.root();
        let x = graph.add_input(root, Some("x")).unwrap();
        let a = graph.append_node(root, NodeKind::Transpose, &[x], 1);
        let a_out = graph.node(a).outputs()[0];
        let b = graph.append_node(root, NodeKind::Cast, &[a_out], 1);
        let b_out = graph.node(b).outputs()[0];
        graph.register_output(root, b_out);
        (graph, x, a, b)
    }

    #[test]
    fn use_lists_track_consumers() {
        let (graph, x, a, b) = chain();
        assert_eq!(graph.value(x).uses(), &[Use { user: a, offset: 0 }]);
        let b_out = graph.node(b).outputs()[0];
        let ret = graph.return_node(graph.root());
        assert_eq!(graph.value(b_out).uses(), &[Use { user: ret, offset: 0 }]);
        assert_eq!(graph.block_nodes(graph.root()).collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn destroy_requires_dead_outputs() {
        let (mut graph, x, a, b) = chain();
        assert!(matches!(
            graph.destroy_node(a),
            Err(GraphError::OutputsInUse { .. })
        ));
        let a_out = graph.node(a).outputs()[0];
        let b_out = graph.node(b).outputs()[0];
        graph.replace_all_uses_with(b_out, x);
        graph.replace_all_uses_with(a_out, x);
        graph.destroy_node(b).unwrap();
        graph.destroy_node(a).unwrap();
        assert!(!graph.contains_node(a));
        assert!(graph.first_node(graph.root()).is_none());
        assert_eq!(graph.block_outputs(graph.root()), &[x]);
    }

    #[test]
    fn erase_input_renumbers_offsets() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = graph.add_input(root, Some("a")).unwrap();
        let b = graph.add_input(root, Some("b")).unwrap();
        let c = graph.add_input(root, None).unwrap();
        graph.register_output(root, b);
        assert!(matches!(
            graph.erase_input(root, 1),
            Err(GraphError::InputInUse { .. })
        ));
        graph.erase_input(root, 0).unwrap();
        assert!(!graph.contains_value(a));
        assert_eq!(graph.block_inputs(root), &[b, c]);
        assert_eq!(graph.value(c).offset(), 1);
        assert!(graph.value_by_name("a").is_none());
    }

    #[test]
    fn numeric_and_duplicate_names_are_rejected() {
        let mut graph = Graph::new();
        let root = graph.root();
        assert_eq!(
            graph.add_input(root, Some("12")),
            Err(GraphError::InvalidName("12".into()))
        );
        graph.add_input(root, Some("w")).unwrap();
        assert_eq!(
            graph.add_input(root, Some("w")),
            Err(GraphError::DuplicateName("w".into()))
        );
        let unnamed = graph.add_input(root, None).unwrap();
        assert_eq!(graph.value(unnamed).unique_name(), unnamed.index().to_string());
    }

    #[test]
    fn destroying_a_node_drops_its_nested_blocks() {
        let mut graph = Graph::new();
        let root = graph.root();
        let cond = graph.add_input(root, Some("cond")).unwrap();
        let branch = graph.append_node(root, NodeKind::Other("If".into()), &[cond], 1);
        let body = graph.add_nested_block(branch);
        let inner = graph.append_node(body, NodeKind::Transpose, &[cond], 1);
        let inner_out = graph.node(inner).outputs()[0];
        graph.register_output(body, inner_out);

        graph.destroy_node(branch).unwrap();
        assert!(!graph.contains_node(inner));
        assert!(!graph.value(cond).has_uses());
    }
}
