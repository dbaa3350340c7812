#[path = "../src/io.rs"]
mod io;

use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use graphfold::fold::fold_constants;
use graphfold::tensor::{DType, Tensor};
use io::{parse_table, read_graph, read_table, table_to_json, write_table, write_text};

static NEXT_FILE: AtomicUsize = AtomicUsize::new(0);

fn unique_path(ext: &str) -> PathBuf {
    let mut path = env::temp_dir();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos();
    let serial = NEXT_FILE.fetch_add(1, Ordering::Relaxed);
    path.push(format!("graphfold_cli_{timestamp}_{serial}.{ext}"));
    path
}

const GRAPH: &str = r#"
graph opset=9 (%x: f32[2], %w: f32[2]) {
  %c = Concat(%x, %w) {axis = 0}
  %t = Unsqueeze(%w) {axes = [0]}
  return(%c, %t)
}
"#;

#[test]
fn tables_parse_from_json() {
    let table = parse_table(
        r#"{"w": {"dtype": "f32", "shape": [2], "data": [0.5, -1.0]},
            "k": {"dtype": "i64", "shape": [], "data": [3]}}"#,
    )
    .expect("table");
    assert_eq!(table.len(), 2);
    assert_eq!(table["w"].dtype(), DType::F32);
    assert_eq!(table["w"].to_vec::<f32>().unwrap(), vec![0.5, -1.0]);
    assert_eq!(table["k"], Tensor::scalar(3i64));

    assert!(parse_table("   \n").unwrap().is_empty());
    assert!(parse_table(r#"{"w": {"dtype": "f32"}}"#).is_err());
}

#[test]
fn missing_table_path_is_empty() {
    assert!(read_table(None).unwrap().is_empty());
    let missing = unique_path("json");
    assert!(read_table(Some(missing.as_path())).is_err());
}

#[test]
fn fold_through_files() {
    let graph_path = unique_path("gf");
    write_text(Some(graph_path.as_path()), GRAPH).unwrap();
    let params_path = unique_path("json");
    let mut params = parse_table(r#"{"w": {"dtype": "f32", "shape": [2], "data": [1.0, 2.0]}}"#)
        .unwrap();
    write_table(Some(params_path.as_path()), &params).unwrap();

    let mut graph = read_graph(&graph_path).unwrap();
    assert_eq!(read_table(Some(params_path.as_path())).unwrap(), params);
    let stats = fold_constants(&mut graph, &mut params, 9).unwrap();
    assert_eq!(stats.folded, 1);

    let out_path = unique_path("json");
    write_table(Some(out_path.as_path()), &params).unwrap();
    let reloaded = read_table(Some(out_path.as_path())).unwrap();
    assert_eq!(reloaded, params);
    assert!(reloaded.contains_key("w"));
    assert_eq!(
        table_to_json(&reloaded).unwrap(),
        table_to_json(&params).unwrap()
    );

    for path in [graph_path, params_path, out_path] {
        let _ = std::fs::remove_file(path);
    }
}

#[test]
fn unparsable_graph_names_the_file() {
    let path = unique_path("gf");
    write_text(Some(path.as_path()), "graph (%x: ?) {\n  %y = Relu(%x)\n}\n").unwrap();
    let err = read_graph(&path).unwrap_err();
    assert!(format!("{err:#}").contains(&path.display().to_string()), "{err:#}");
    let _ = std::fs::remove_file(path);
}
