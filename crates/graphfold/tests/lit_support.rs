use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use graphfold::fold::{ConstantFoldPass, FoldConfig, ParamMap};
use graphfold::ir::{lint, parse_graph};

pub struct Case {
    pub name: String,
    pub meta: String,
    pub input: String,
    pub expected: String,
    pub expected_params: String,
}

/// Fixture format:
/// META:
/// <parameter table as JSON, optional>
/// INPUT:
/// <text graph>
/// EXPECTED:
/// <text graph>
/// EXPECTED_PARAMS:
/// <parameter table as JSON, optional>
/// run_test
/// (repeat)
pub fn load_cases(fixture_rel: &str) -> Vec<Case> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(fixture_rel);
    let contents =
        fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {:?}: {}", path, e));

    #[derive(Clone, Copy, PartialEq)]
    enum Section {
        None,
        Meta,
        Input,
        Expected,
        ExpectedParams,
    }

    let mut cases = Vec::new();
    let mut section = Section::None;
    let mut buffers: HashMap<&'static str, String> = HashMap::new();
    let mut counter = 0;
    for line in contents.lines() {
        match line.trim_end() {
            "META:" => section = Section::Meta,
            "INPUT:" => section = Section::Input,
            "EXPECTED:" => section = Section::Expected,
            "EXPECTED_PARAMS:" => section = Section::ExpectedParams,
            "run_test" => {
                counter += 1;
                let mut take = |key: &str| buffers.remove(key).unwrap_or_default();
                cases.push(Case {
                    name: format!("{fixture_rel}#{counter}"),
                    meta: take("meta"),
                    input: take("input"),
                    expected: take("expected"),
                    expected_params: take("expected_params"),
                });
                section = Section::None;
            }
            other => {
                let key = match section {
                    Section::None => continue,
                    Section::Meta => "meta",
                    Section::Input => "input",
                    Section::Expected => "expected",
                    Section::ExpectedParams => "expected_params",
                };
                let buffer = buffers.entry(key).or_default();
                buffer.push_str(other);
                buffer.push('\n');
            }
        }
    }
    cases
}

pub fn parse_params(json: &str) -> ParamMap {
    if json.trim().is_empty() {
        return ParamMap::new();
    }
    serde_json::from_str(json).unwrap_or_else(|e| panic!("invalid parameter table: {e}"))
}

/// Folds the case input, checks the printed graph and rewritten table, then checks that a
/// second run changes nothing.
pub fn run_case(case: &Case) {
    let mut graph =
        parse_graph(&case.input).unwrap_or_else(|e| panic!("{}: bad input: {e}", case.name));
    let mut params = parse_params(&case.meta);
    let pass = ConstantFoldPass::with_config(FoldConfig {
        verify: true,
        ..FoldConfig::for_graph(&graph)
    });

    pass.run(&mut graph, &mut params)
        .unwrap_or_else(|e| panic!("{}: fold failed: {e}", case.name));
    lint(&graph).unwrap_or_else(|e| panic!("{}: lint failed: {e}", case.name));

    let printed = graph.to_string();
    let (out, renames) = canonicalize_folded_names(&printed);
    assert_eq!(
        out.trim(),
        case.expected.trim(),
        "output mismatch for {}",
        case.name
    );

    let renamed: ParamMap = params
        .clone()
        .into_iter()
        .map(|(name, tensor)| (renames.get(&name).cloned().unwrap_or(name), tensor))
        .collect();
    assert_eq!(
        renamed,
        parse_params(&case.expected_params),
        "parameter mismatch for {}",
        case.name
    );

    let again = pass.run(&mut graph, &mut params).expect("second run");
    assert_eq!(again.folded, 0, "second run folded nodes for {}", case.name);
    assert_eq!(graph.to_string(), printed, "second run changed {}", case.name);
}

/// Renames `folded_<id>` parameters to `folded_0`, `folded_1`, ... in order of first
/// appearance, so fixtures do not depend on value numbering.
pub fn canonicalize_folded_names(text: &str) -> (String, HashMap<String, String>) {
    const PREFIX: &str = "folded_";
    let mut renames: HashMap<String, String> = HashMap::new();
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(PREFIX) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + PREFIX.len()..];
        let len = tail
            .bytes()
            .take_while(|b| b.is_ascii_digit() || *b == b'_')
            .count();
        let name = &rest[pos..pos + PREFIX.len() + len];
        let next = renames.len();
        let canonical = renames
            .entry(name.to_string())
            .or_insert_with(|| format!("{PREFIX}{next}"));
        out.push_str(canonical);
        rest = &tail[len..];
    }
    out.push_str(rest);
    (out, renames)
}
