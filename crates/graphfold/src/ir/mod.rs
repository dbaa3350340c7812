//! Operator graph representation: blocks of nodes connected by values with exact use-lists.

mod attr;
mod graph;
mod kind;
mod lint;
mod text;

pub use attr::{Attribute, AttributeKind};
pub use graph::{
    BlockId, BlockNodes, Graph, GraphError, Node, NodeId, Use, Value, ValueId, ValueType,
};
pub use kind::NodeKind;
pub use lint::lint;
pub use text::{parse_graph, parse_graph_with_symbols, ParsedGraph, TextIrError};
