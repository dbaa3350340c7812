//! Compact textual form of a [`Graph`], used by tests and the command-line tool.
//!
//! ```text
//! graph opset=10 (%x: f32[2, 3], %w: f32[4]) {
//!   %c = Constant() {value = i64[1] [0]} : i64[1]
//!   %s = Slice(%x, %c, %c)
//!   %n = Constant() : none
//!   return(%s)
//! }
//! ```
//!
//! Unnamed values print as `%<id>`. Purely numeric names are accepted by the parser and left
//! unnamed in the resulting graph. Nested blocks are printed but not parsed.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use super::attr::Attribute;
use super::graph::{BlockId, Graph, GraphError, ValueId, ValueType};
use super::kind::NodeKind;
use crate::tensor::{with_element_type, DType, Tensor, TensorError};

/// Errors raised while parsing the textual graph format.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextIrError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("invalid tensor literal: {0}")]
    Tensor(#[from] TensorError),
}

impl TextIrError {
    fn new(msg: impl Into<String>) -> Self {
        TextIrError::Message(msg.into())
    }
}

/// Parses a graph in the textual format.
///
/// # Example
/// ```
/// use graphfold::ir::parse_graph;
///
/// let graph = parse_graph(r#"
/// graph (%x: f32[2, 3]) {
///   %t = Transpose(%x) {perm = [1, 0]}
///   return(%t)
/// }
/// "#).expect("valid graph");
/// assert_eq!(graph.block_nodes(graph.root()).count(), 1);
/// ```
pub fn parse_graph(src: &str) -> Result<Graph, TextIrError> {
    Parser::new(src).parse().map(|parsed| parsed.graph)
}

/// Parses a graph and keeps the mapping from textual value names to value ids.
pub fn parse_graph_with_symbols(src: &str) -> Result<ParsedGraph, TextIrError> {
    Parser::new(src).parse()
}

/// Graph paired with the mapping from textual value names to value ids.
#[derive(Debug, Clone)]
pub struct ParsedGraph {
    pub graph: Graph,
    pub value_names: HashMap<String, ValueId>,
}

impl ParsedGraph {
    pub fn value(&self, name: &str) -> Option<ValueId> {
        self.value_names.get(normalize_value_name(name)).copied()
    }
}

struct Parser<'a> {
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self { source }
    }

    fn parse(&self) -> Result<ParsedGraph, TextIrError> {
        let trimmed = self.source.trim();
        if trimmed.is_empty() {
            return Err(TextIrError::new("input is empty"));
        }
        let header_end = trimmed
            .find('{')
            .ok_or_else(|| TextIrError::new("missing `{` to start graph body"))?;
        let body_end = trimmed
            .rfind('}')
            .ok_or_else(|| TextIrError::new("missing `}` to end graph body"))?;
        if body_end < header_end {
            return Err(TextIrError::new("graph body is not closed"));
        }
        let header = trimmed[..header_end].trim();
        let body = trimmed[header_end + 1..body_end].trim();

        let (opset, params) = parse_header(header)?;
        let mut graph = Graph::new();
        graph.set_opset_version(opset);
        let root = graph.root();
        let mut value_map: HashMap<String, ValueId> = HashMap::new();

        for param in params {
            let (name, ty) = match param.split_once(':') {
                Some((name, ty)) => (normalize_value_name(name.trim()), Some(parse_type(ty)?)),
                None => (normalize_value_name(param.trim()), None),
            };
            let value = graph.add_input(root, debug_name(name))?;
            if let Some(ty) = ty {
                graph.set_value_type(value, ty);
            }
            bind_name(&mut value_map, name, value)?;
        }

        let mut returned: Option<Vec<ValueId>> = None;
        for line in body.lines() {
            let statement = line.trim();
            if statement.is_empty() || statement.starts_with("//") {
                continue;
            }
            if returned.is_some() {
                return Err(TextIrError::new("statements after `return` are not allowed"));
            }
            if let Some(values) = statement.strip_prefix("return") {
                let values = values
                    .trim()
                    .strip_prefix('(')
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| TextIrError::new("malformed `return` statement"))?;
                returned = Some(lookup_operands(values, &value_map)?);
                continue;
            }
            if statement.starts_with("block") {
                return Err(TextIrError::new(
                    "nested blocks are not supported by the text parser",
                ));
            }
            parse_statement(statement, &mut graph, root, &mut value_map)?;
        }

        let outputs = returned.ok_or_else(|| {
            TextIrError::new("graph body must end with a `return(...)` statement")
        })?;
        for value in outputs {
            graph.register_output(root, value);
        }

        Ok(ParsedGraph {
            graph,
            value_names: value_map,
        })
    }
}

fn parse_header(header: &str) -> Result<(Option<i64>, Vec<&str>), TextIrError> {
    let rest = header
        .strip_prefix("graph")
        .ok_or_else(|| TextIrError::new("graph header must start with `graph`"))?
        .trim();
    let open = rest
        .find('(')
        .ok_or_else(|| TextIrError::new("graph header is missing its input list"))?;
    let prefix = rest[..open].trim();
    let opset = if prefix.is_empty() {
        None
    } else {
        let version = prefix
            .strip_prefix("opset=")
            .ok_or_else(|| TextIrError::new(format!("unexpected header token `{prefix}`")))?;
        Some(
            version
                .trim()
                .parse::<i64>()
                .map_err(|_| TextIrError::new(format!("invalid opset `{version}`")))?,
        )
    };
    let close = find_matching(rest, open, '(', ')')
        .ok_or_else(|| TextIrError::new("unbalanced parentheses in graph header"))?;
    if !rest[close + 1..].trim().is_empty() {
        return Err(TextIrError::new("unexpected text after graph inputs"));
    }
    Ok((opset, split_top_level(&rest[open + 1..close], ',')))
}

fn parse_statement(
    statement: &str,
    graph: &mut Graph,
    block: BlockId,
    value_map: &mut HashMap<String, ValueId>,
) -> Result<(), TextIrError> {
    let (result_names, rest) = if statement.starts_with('%') {
        let (lhs, rhs) = statement.split_once('=').ok_or_else(|| {
            TextIrError::new("statements must be of the form `%result = Op(...)`")
        })?;
        let names: Vec<&str> = split_top_level(lhs, ',')
            .into_iter()
            .map(normalize_value_name)
            .collect();
        if names.iter().any(|name| name.is_empty()) {
            return Err(TextIrError::new("result identifier cannot be empty"));
        }
        (names, rhs.trim())
    } else {
        (Vec::new(), statement)
    };

    let open = rest
        .find('(')
        .ok_or_else(|| TextIrError::new(format!("missing operand list in `{statement}`")))?;
    let op_name = rest[..open].trim();
    if op_name.is_empty() {
        return Err(TextIrError::new("operation name cannot be empty"));
    }
    let kind = NodeKind::from_name(op_name);
    if kind.is_block_boundary() {
        return Err(TextIrError::new(format!(
            "`{op_name}` nodes cannot be written as statements"
        )));
    }
    let close = find_matching(rest, open, '(', ')')
        .ok_or_else(|| TextIrError::new(format!("unbalanced parentheses in `{statement}`")))?;
    let inputs = lookup_operands(&rest[open + 1..close], value_map)?;

    let mut tail = rest[close + 1..].trim();
    let mut attributes = Vec::new();
    if tail.starts_with('{') {
        let end = find_matching(tail, 0, '{', '}')
            .ok_or_else(|| TextIrError::new("unbalanced braces in attribute list"))?;
        attributes = parse_attributes(&tail[1..end])?;
        tail = tail[end + 1..].trim();
    }
    let types = if let Some(types) = tail.strip_prefix(':') {
        split_top_level(types, ',')
            .into_iter()
            .map(parse_type)
            .collect::<Result<Vec<_>, _>>()?
    } else if tail.is_empty() {
        Vec::new()
    } else {
        return Err(TextIrError::new(format!("unexpected trailing text `{tail}`")));
    };
    if !types.is_empty() && types.len() != result_names.len() {
        return Err(TextIrError::new(format!(
            "{} result type(s) given for {} result(s)",
            types.len(),
            result_names.len()
        )));
    }

    let node = graph.append_node(block, kind, &inputs, result_names.len());
    for (name, attr) in attributes {
        graph.set_attr(node, &name, attr);
    }
    let outputs = graph.node(node).outputs().to_vec();
    for (idx, (name, value)) in result_names.into_iter().zip(outputs).enumerate() {
        if let Some(debug) = debug_name(name) {
            graph.set_debug_name(value, debug)?;
        }
        if let Some(ty) = types.get(idx) {
            graph.set_value_type(value, ty.clone());
        }
        bind_name(value_map, name, value)?;
    }
    Ok(())
}

fn lookup_operands(
    operands: &str,
    value_map: &HashMap<String, ValueId>,
) -> Result<Vec<ValueId>, TextIrError> {
    split_top_level(operands, ',')
        .into_iter()
        .map(|operand| {
            let name = normalize_value_name(operand);
            value_map
                .get(name)
                .copied()
                .ok_or_else(|| TextIrError::new(format!("unknown value `%{name}`")))
        })
        .collect()
}

fn bind_name(
    value_map: &mut HashMap<String, ValueId>,
    name: &str,
    value: ValueId,
) -> Result<(), TextIrError> {
    if value_map.insert(name.to_string(), value).is_some() {
        return Err(TextIrError::new(format!("value `%{name}` is defined twice")));
    }
    Ok(())
}

fn normalize_value_name(name: &str) -> &str {
    name.trim().trim_start_matches('%')
}

fn debug_name(name: &str) -> Option<&str> {
    if name.bytes().all(|b| b.is_ascii_digit()) {
        None
    } else {
        Some(name)
    }
}

fn parse_attributes(src: &str) -> Result<Vec<(String, Attribute)>, TextIrError> {
    split_top_level(src, ',')
        .into_iter()
        .map(|entry| {
            let (name, value) = entry
                .split_once('=')
                .ok_or_else(|| TextIrError::new(format!("attribute `{entry}` has no value")))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(TextIrError::new("attribute name cannot be empty"));
            }
            Ok((name.to_string(), parse_attribute_value(value.trim())?))
        })
        .collect()
}

fn parse_attribute_value(src: &str) -> Result<Attribute, TextIrError> {
    if let Some(inner) = src.strip_prefix('"') {
        let text = inner
            .strip_suffix('"')
            .ok_or_else(|| TextIrError::new(format!("unterminated string `{src}`")))?;
        return Ok(Attribute::String(text.to_string()));
    }
    if let Some(inner) = src.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| TextIrError::new(format!("unterminated list `{src}`")))?;
        let items = split_top_level(inner, ',');
        // An empty list reads back as ints.
        if items.iter().any(|item| is_float_literal(item)) {
            return items
                .into_iter()
                .map(parse_float)
                .collect::<Result<Vec<_>, _>>()
                .map(Attribute::Floats);
        }
        return items
            .into_iter()
            .map(parse_int)
            .collect::<Result<Vec<_>, _>>()
            .map(Attribute::Ints);
    }
    if src.starts_with(|c: char| c.is_ascii_alphabetic()) && src.contains('[') {
        return parse_tensor_literal(src).map(Attribute::Tensor);
    }
    if is_float_literal(src) {
        return parse_float(src).map(Attribute::Float);
    }
    parse_int(src).map(Attribute::Int)
}

fn is_float_literal(src: &str) -> bool {
    src.contains(['.', 'e', 'E']) || src.ends_with("inf") || src == "NaN"
}

fn parse_int(src: &str) -> Result<i64, TextIrError> {
    src.trim()
        .parse::<i64>()
        .map_err(|_| TextIrError::new(format!("invalid integer `{src}`")))
}

fn parse_float(src: &str) -> Result<f64, TextIrError> {
    src.trim()
        .parse::<f64>()
        .map_err(|_| TextIrError::new(format!("invalid float `{src}`")))
}

/// `dtype[dims] [data]`, data in row-major order.
fn parse_tensor_literal(src: &str) -> Result<Tensor, TextIrError> {
    let open = src
        .find('[')
        .ok_or_else(|| TextIrError::new(format!("tensor literal `{src}` has no shape")))?;
    let dtype = parse_dtype(&src[..open])?;
    let close = find_matching(src, open, '[', ']')
        .ok_or_else(|| TextIrError::new(format!("unbalanced shape in `{src}`")))?;
    let dims = parse_dimensions(&src[open + 1..close])?;
    let data = src[close + 1..]
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| TextIrError::new(format!("tensor literal `{src}` has no data list")))?;
    let items = split_top_level(data, ',');
    with_element_type!(dtype, T => {
        let values = items
            .iter()
            .map(|item| {
                item.parse::<T>()
                    .map_err(|_| TextIrError::new(format!("invalid {dtype} element `{item}`")))
            })
            .collect::<Result<Vec<T>, _>>()?;
        Ok(Tensor::from_vec::<T>(&dims, values)?)
    })
}

fn parse_type(src: &str) -> Result<ValueType, TextIrError> {
    let trimmed = src.trim();
    match trimmed {
        "?" => return Ok(ValueType::Unknown),
        "none" => return Ok(ValueType::None),
        _ => {}
    }
    let open = trimmed
        .find('[')
        .ok_or_else(|| TextIrError::new(format!("unsupported type `{trimmed}`")))?;
    let dims = trimmed[open + 1..]
        .strip_suffix(']')
        .ok_or_else(|| TextIrError::new(format!("unterminated shape in `{trimmed}`")))?;
    Ok(ValueType::Tensor {
        dtype: parse_dtype(&trimmed[..open])?,
        shape: parse_dimensions(dims)?,
    })
}

fn parse_dtype(src: &str) -> Result<DType, TextIrError> {
    let name = src.trim();
    DType::parse(name).ok_or_else(|| TextIrError::new(format!("unsupported dtype `{name}`")))
}

fn parse_dimensions(src: &str) -> Result<Vec<usize>, TextIrError> {
    split_top_level(src, ',')
        .into_iter()
        .map(|dim| {
            dim.parse::<usize>()
                .map_err(|_| TextIrError::new(format!("invalid dimension `{dim}`")))
        })
        .collect()
}

fn find_matching(src: &str, open_index: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, ch) in src[open_index..].char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(open_index + offset);
            }
        }
    }
    None
}

fn split_top_level(input: &str, delimiter: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut start = 0usize;
    for (idx, ch) in input.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            _ if in_string => {}
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth = depth.saturating_sub(1),
            c if c == delimiter && depth == 0 => {
                pieces.push(input[start..idx].trim());
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    let last = input[start..].trim();
    if !last.is_empty() || !pieces.is_empty() {
        pieces.push(last);
    }
    pieces
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Unknown => f.write_str("?"),
            ValueType::None => f.write_str("none"),
            ValueType::Tensor { dtype, shape } => {
                write!(f, "{dtype}[")?;
                write_list(f, shape.iter())?;
                f.write_str("]")
            }
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Int(value) => write!(f, "{value}"),
            Attribute::Float(value) => write!(f, "{value:?}"),
            Attribute::Ints(values) => {
                f.write_str("[")?;
                write_list(f, values.iter())?;
                f.write_str("]")
            }
            Attribute::Floats(values) => {
                f.write_str("[")?;
                write_list(f, values.iter().map(|value| format!("{value:?}")))?;
                f.write_str("]")
            }
            Attribute::String(value) => write!(f, "\"{value}\""),
            Attribute::Tensor(tensor) => write_tensor(f, tensor),
        }
    }
}

fn write_tensor(f: &mut fmt::Formatter<'_>, tensor: &Tensor) -> fmt::Result {
    write!(f, "{}[", tensor.dtype())?;
    write_list(f, tensor.shape().iter())?;
    f.write_str("] [")?;
    with_element_type!(tensor.dtype(), T => {
        let values = tensor.to_vec::<T>().unwrap_or_default();
        write_list(f, values.iter().map(|value| format!("{value:?}")))?;
    });
    f.write_str("]")
}

fn write_list<I>(f: &mut fmt::Formatter<'_>, items: I) -> fmt::Result
where
    I: Iterator,
    I::Item: fmt::Display,
{
    for (idx, item) in items.enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("graph")?;
        if let Some(opset) = self.opset_version() {
            write!(f, " opset={opset}")?;
        }
        f.write_str(" (")?;
        write_inputs(self, self.root(), f)?;
        f.write_str(") {\n")?;
        write_block_body(self, self.root(), 1, f)?;
        f.write_str("}\n")
    }
}

fn write_inputs(graph: &Graph, block: BlockId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (idx, &input) in graph.block_inputs(block).iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        let value = graph.value(input);
        write!(f, "%{}", value.unique_name())?;
        if *value.ty() != ValueType::Unknown {
            write!(f, ": {}", value.ty())?;
        }
    }
    Ok(())
}

fn write_block_body(
    graph: &Graph,
    block: BlockId,
    depth: usize,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    let indent = "  ".repeat(depth);
    for node_id in graph.block_nodes(block) {
        let node = graph.node(node_id);
        f.write_str(&indent)?;
        if !node.outputs().is_empty() {
            let names: Vec<String> = node
                .outputs()
                .iter()
                .map(|&output| format!("%{}", graph.value(output).unique_name()))
                .collect();
            write!(f, "{} = ", names.join(", "))?;
        }
        write!(f, "{}(", node.kind())?;
        write_list(
            f,
            node.inputs()
                .iter()
                .map(|&input| format!("%{}", graph.value(input).unique_name())),
        )?;
        f.write_str(")")?;
        if !node.attributes().is_empty() {
            f.write_str(" {")?;
            write_list(
                f,
                node.attributes()
                    .iter()
                    .map(|(name, attr)| format!("{name} = {attr}")),
            )?;
            f.write_str("}")?;
        }
        let typed = node
            .outputs()
            .iter()
            .any(|&output| *graph.value(output).ty() != ValueType::Unknown);
        if typed {
            f.write_str(" : ")?;
            write_list(
                f,
                node.outputs().iter().map(|&output| graph.value(output).ty()),
            )?;
        }
        f.write_str("\n")?;
        for &nested in node.blocks() {
            write!(f, "{indent}  block (")?;
            write_inputs(graph, nested, f)?;
            f.write_str(") {\n")?;
            write_block_body(graph, nested, depth + 2, f)?;
            writeln!(f, "{indent}  }}")?;
        }
    }
    f.write_str(&indent)?;
    f.write_str("return(")?;
    write_list(
        f,
        graph
            .block_outputs(block)
            .iter()
            .map(|&output| format!("%{}", graph.value(output).unique_name())),
    )?;
    f.write_str(")\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_top_level_respects_nesting() {
        assert_eq!(
            split_top_level("a = [1, 2], b = \"x,y\", c = i64[2] [3, 4]", ','),
            vec!["a = [1, 2]", "b = \"x,y\"", "c = i64[2] [3, 4]"]
        );
        assert!(split_top_level("  ", ',').is_empty());
    }

    #[test]
    fn attribute_values_are_typed_by_spelling() {
        assert_eq!(parse_attribute_value("3").unwrap(), Attribute::Int(3));
        assert_eq!(parse_attribute_value("-1.5").unwrap(), Attribute::Float(-1.5));
        assert_eq!(
            parse_attribute_value("[1, -2]").unwrap(),
            Attribute::Ints(vec![1, -2])
        );
        assert_eq!(
            parse_attribute_value("[1, 2.5]").unwrap(),
            Attribute::Floats(vec![1.0, 2.5])
        );
        assert_eq!(
            parse_attribute_value("\"edge\"").unwrap(),
            Attribute::String("edge".into())
        );
        assert_eq!(
            parse_attribute_value("i64[] [7]").unwrap(),
            Attribute::Tensor(Tensor::scalar(7i64))
        );
    }

    #[test]
    fn tensor_literal_checks_element_count() {
        assert!(matches!(
            parse_tensor_literal("f32[2, 2] [1, 2, 3]"),
            Err(TextIrError::Tensor(TensorError::DataLength { .. }))
        ));
        assert!(parse_tensor_literal("u8[1] [300]").is_err());
    }
}
