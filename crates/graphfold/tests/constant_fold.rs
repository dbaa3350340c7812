mod lit_support;

use graphfold::fold::{fold_constants, ConstantFoldPass, FoldConfig, FoldStats, ParamMap};
use graphfold::ir::{lint, parse_graph, parse_graph_with_symbols, Graph, NodeKind};
use graphfold::tensor::{DType, Tensor};
use lit_support::{load_cases, parse_params, run_case};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn constant_fold_cases() {
    let cases = load_cases("constant_fold.lit");
    assert!(!cases.is_empty());
    for case in cases {
        run_case(&case);
    }
}

const TWO_OUTPUTS: &str = r#"
graph opset=9 (%w: i64[4]) {
  %a, %b = Split(%w) {axis = 0}
  return(%a, %b)
}
"#;

#[test]
fn multi_output_nodes_are_never_folded() {
    let mut graph = parse_graph(TWO_OUTPUTS).unwrap();
    let before = graph.to_string();
    let mut params = parse_params(r#"{"w": {"dtype": "i64", "shape": [4], "data": [1, 2, 3, 4]}}"#);
    let stats = fold_constants(&mut graph, &mut params, 9).unwrap();
    assert_eq!(stats, FoldStats::default());
    assert_eq!(graph.to_string(), before);
    assert!(params.contains_key("w"));
}

#[test]
fn unsupported_opset_leaves_everything_untouched() {
    let src = r#"
graph opset=11 (%w: i64[2], %unused: i64[2]) {
  %t = Transpose(%w) {perm = [0]}
  return(%t)
}
"#;
    let mut graph = parse_graph(src).unwrap();
    let before = graph.to_string();
    let original = parse_params(
        r#"{"w": {"dtype": "i64", "shape": [2], "data": [1, 2]},
            "stray": {"dtype": "f32", "shape": [], "data": [0.5]}}"#,
    );
    let mut params = original.clone();
    let stats = ConstantFoldPass::new(11).run(&mut graph, &mut params).unwrap();
    assert_eq!(stats, FoldStats::default());
    assert_eq!(graph.to_string(), before);
    assert_eq!(params, original);
}

#[test]
fn nested_blocks_are_not_visited() {
    let mut graph = Graph::new();
    let root = graph.root();
    let w = graph.add_input(root, Some("w")).unwrap();
    let cond = graph.add_input(root, Some("cond")).unwrap();
    let branch = graph.append_node(root, NodeKind::Other("If".into()), &[cond], 1);
    let body = graph.add_nested_block(branch);
    let inner = graph.append_node(body, NodeKind::Transpose, &[w], 1);
    graph.set_attr(inner, "perm", vec![0i64]);
    let inner_out = graph.node(inner).outputs()[0];
    graph.register_output(body, inner_out);
    let branch_out = graph.node(branch).outputs()[0];
    graph.register_output(root, branch_out);

    let mut params = ParamMap::new();
    params.insert("w".into(), Tensor::vector(vec![1i64, 2]));
    let stats = fold_constants(&mut graph, &mut params, 9).unwrap();

    assert_eq!(stats.folded, 0);
    assert!(graph.contains_node(inner));
    assert_eq!(graph.block_inputs(root), &[w, cond]);
    assert!(params.contains_key("w"));
    lint(&graph).unwrap();
}

#[test]
fn folding_splices_a_typed_parameter_input() {
    let src = r#"
graph opset=9 (%w: f32[2, 3]) {
  %t = Transpose(%w) {perm = [1, 0]}
  %y = Relu(%t)
  return(%y)
}
"#;
    let parsed = parse_graph_with_symbols(src).unwrap();
    let mut graph = parsed.graph;
    let mut params = ParamMap::new();
    params.insert(
        "w".into(),
        Tensor::from_vec(&[2, 3], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
    );

    let stats = ConstantFoldPass::with_config(FoldConfig {
        opset_version: 9,
        verify: true,
    })
    .run(&mut graph, &mut params)
    .unwrap();
    // The Relu sees a bound input afterwards but has no evaluator.
    assert_eq!(stats.folded, 1);
    assert_eq!(stats.erased_inputs, 1);
    assert_eq!(stats.rejected, 1);

    let root = graph.root();
    let inputs = graph.block_inputs(root).to_vec();
    assert_eq!(inputs.len(), 1);
    let folded = graph.value(inputs[0]);
    let name = folded.debug_name().expect("folded inputs are named").to_string();
    assert_eq!(
        *folded.ty(),
        graphfold::ir::ValueType::Tensor {
            dtype: DType::F32,
            shape: vec![3, 2]
        }
    );
    assert_eq!(params.keys().collect::<Vec<_>>(), vec![&name]);
    assert_eq!(
        params[&name].to_vec::<f32>().unwrap(),
        vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]
    );

    let relu = graph.first_node(root).unwrap();
    assert_eq!(*graph.node(relu).kind(), NodeKind::Other("Relu".into()));
    assert_eq!(graph.node(relu).inputs(), &[inputs[0]]);
    assert!(parsed.value_names.contains_key("w"));
}

#[test]
fn folded_names_avoid_existing_parameters() {
    // Value 2 is the first input created by folding, so `folded_2` is already taken.
    let src = r#"
graph opset=9 (%folded_2: i64[2]) {
  %t = Transpose(%folded_2) {perm = [0]}
  return(%t, %folded_2)
}
"#;
    let mut graph = parse_graph(src).unwrap();
    let mut params =
        parse_params(r#"{"folded_2": {"dtype": "i64", "shape": [2], "data": [4, 5]}}"#);
    let stats = fold_constants(&mut graph, &mut params, 9).unwrap();
    assert_eq!(stats.folded, 1);
    assert_eq!(
        params.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["folded_2", "folded_2_1"]
    );
}

#[test]
fn stats_merge_accumulates() {
    let a = FoldStats {
        folded: 2,
        erased_constants: 1,
        erased_inputs: 3,
        rejected: 0,
    };
    let b = FoldStats {
        folded: 1,
        erased_constants: 0,
        erased_inputs: 1,
        rejected: 4,
    };
    let merged = a.merge(b);
    assert_eq!(merged.folded, 3);
    assert_eq!(merged.erased_inputs, 4);
    assert_eq!(merged.rejected, 4);
    assert!(merged.changed());
    assert!(!FoldStats::default().changed());
}

fn literal(data: &[i64]) -> String {
    data.iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[test]
fn randomized_chains_fold_to_eager_results() {
    let mut rng = StdRng::seed_from_u64(0x5eed_f01d);
    for trial in 0..24 {
        let rows = rng.gen_range(1..4usize);
        let cols = rng.gen_range(1..4usize);
        let weights: Vec<i64> = (0..rows * cols).map(|_| rng.gen_range(-50..50)).collect();
        let bias: Vec<i64> = (0..rows * cols).map(|_| rng.gen_range(-50..50)).collect();
        let to_code = [1i64, 4, 7, 11][trial % 4];

        let src = format!(
            r#"
graph opset={opset} (%x: i64[{rows}, {wide}], %w: i64[{rows}, {cols}]) {{
  %c = Constant() {{value = i64[{rows}, {cols}] [{bias}]}}
  %k = Concat(%w, %c) {{axis = -1}}
  %t = Transpose(%k) {{perm = [1, 0]}}
  %z = Cast(%t) {{to = {to_code}}}
  %u = Unsqueeze(%z) {{axes = [-1]}}
  %y = Concat(%x, %k) {{axis = 1}}
  return(%u, %y)
}}
"#,
            opset = 9 + (trial % 2),
            wide = 2 * cols,
            bias = literal(&bias),
        );
        let mut graph = parse_graph(&src).unwrap();
        let w = Tensor::from_vec(&[rows, cols], weights).unwrap();
        let c = Tensor::from_vec(&[rows, cols], bias).unwrap();
        let mut params = ParamMap::new();
        params.insert("w".into(), w.clone());

        let stats = fold_constants(&mut graph, &mut params, 9 + (trial as i64 % 2)).unwrap();
        assert_eq!(stats.folded, 4, "trial {trial}");

        let k = Tensor::cat(&[&w, &c], 1).unwrap();
        let expected_u = k
            .permute(&[1, 0])
            .unwrap()
            .to_dtype(DType::from_onnx_code(to_code).unwrap())
            .unsqueeze(-1)
            .unwrap();

        let root = graph.root();
        let outputs = graph.block_outputs(root).to_vec();
        let u_name = graph.value(outputs[0]).unique_name();
        assert_eq!(params.get(&u_name), Some(&expected_u), "trial {trial}");

        // Only %y survives; it reads %x and the folded concat.
        assert_eq!(graph.block_nodes(root).count(), 1);
        let y = graph.value(outputs[1]).producer();
        let k_input = graph.node(y).inputs()[1];
        let k_name = graph.value(k_input).unique_name();
        assert_eq!(params.get(&k_name), Some(&k), "trial {trial}");

        for &input in graph.block_inputs(root) {
            assert!(graph.value(input).has_uses(), "trial {trial}: dead input");
        }
        assert_eq!(params.len(), 2, "trial {trial}: dead bindings kept");
        lint(&graph).unwrap();

        let printed = graph.to_string();
        let again = fold_constants(&mut graph, &mut params, 9).unwrap();
        assert_eq!(again.folded, 0);
        assert_eq!(graph.to_string(), printed);
    }
}
