//! File and stdout helpers for graphs and JSON tensor tables.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use graphfold::ir::{parse_graph, Graph};
use graphfold::tensor::Tensor;

/// Named tensors as stored on disk: `{"name": {"dtype": .., "shape": [..], "data": [..]}}`.
pub type TensorTable = BTreeMap<String, Tensor>;

pub fn read_graph(path: &Path) -> Result<Graph> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read graph {}", path.display()))?;
    parse_graph(&text).with_context(|| format!("failed to parse graph {}", path.display()))
}

pub fn parse_table(json: &str) -> Result<TensorTable> {
    if json.trim().is_empty() {
        return Ok(TensorTable::new());
    }
    let table = serde_json::from_str(json).context("invalid tensor table")?;
    Ok(table)
}

/// Reads a tensor table; a missing path yields an empty table.
pub fn read_table(path: Option<&Path>) -> Result<TensorTable> {
    let Some(path) = path else {
        return Ok(TensorTable::new());
    };
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read tensor table {}", path.display()))?;
    parse_table(&json).with_context(|| format!("in {}", path.display()))
}

pub fn table_to_json(table: &TensorTable) -> Result<String> {
    let mut json = serde_json::to_string_pretty(table).context("failed to encode tensor table")?;
    json.push('\n');
    Ok(json)
}

/// Writes `text` to `path`, or to stdout when no path is given.
pub fn write_text(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(text.as_bytes())
                .context("failed to write to stdout")?;
            stdout.flush().context("failed to flush stdout")
        }
    }
}

pub fn write_table(path: Option<&Path>, table: &TensorTable) -> Result<()> {
    write_text(path, &table_to_json(table)?)
}
