use std::fmt;

use crate::Symbol;

/// Operator kind of a graph node.
///
/// The foldable operators are spelled out so that evaluation dispatch is an exhaustive match;
/// everything else an exporter may emit is carried as [`NodeKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Owner of a block's formal inputs.
    Param,
    /// Sink whose inputs are a block's outputs.
    Return,
    Constant,
    Slice,
    Concat,
    Unsqueeze,
    Transpose,
    Cast,
    Other(Symbol),
}

impl NodeKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "Param" => NodeKind::Param,
            "Return" => NodeKind::Return,
            "Constant" => NodeKind::Constant,
            "Slice" => NodeKind::Slice,
            "Concat" => NodeKind::Concat,
            "Unsqueeze" => NodeKind::Unsqueeze,
            "Transpose" => NodeKind::Transpose,
            "Cast" => NodeKind::Cast,
            other => NodeKind::Other(Symbol::from(other)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Param => "Param",
            NodeKind::Return => "Return",
            NodeKind::Constant => "Constant",
            NodeKind::Slice => "Slice",
            NodeKind::Concat => "Concat",
            NodeKind::Unsqueeze => "Unsqueeze",
            NodeKind::Transpose => "Transpose",
            NodeKind::Cast => "Cast",
            NodeKind::Other(symbol) => symbol.as_str(),
        }
    }

    /// Param and Return nodes frame a block and never appear in its node list.
    pub fn is_block_boundary(&self) -> bool {
        matches!(self, NodeKind::Param | NodeKind::Return)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
