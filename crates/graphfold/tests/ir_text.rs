use graphfold::ir::{
    lint, parse_graph, parse_graph_with_symbols, Attribute, Graph, NodeKind, TextIrError,
    ValueType,
};
use graphfold::tensor::{DType, Tensor};

const SAMPLE: &str = r#"
graph opset=10 (%x: f32[2, 3], %w: f32[4]) {
  %c = Constant() {value = i64[1] [0]} : i64[1]
  %s = Slice(%x, %c, %c)
  %n = Constant() : none
  %a, %b = Split(%w) {axis = 0, name = "halves", scale = 0.5, split = [2, 2]}
  return(%s, %a)
}
"#;

const SAMPLE_PRINTED: &str = r#"graph opset=10 (%x: f32[2, 3], %w: f32[4]) {
  %c = Constant() {value = i64[1] [0]} : i64[1]
  %s = Slice(%x, %c, %c)
  %n = Constant() : none
  %a, %b = Split(%w) {axis = 0, name = "halves", scale = 0.5, split = [2, 2]}
  return(%s, %a)
}
"#;

#[test]
fn parse_then_print_is_stable() {
    let graph = parse_graph(SAMPLE).unwrap();
    assert_eq!(graph.to_string(), SAMPLE_PRINTED);
    let reparsed = parse_graph(&graph.to_string()).unwrap();
    assert_eq!(reparsed.to_string(), SAMPLE_PRINTED);
    lint(&graph).unwrap();
}

#[test]
fn parsed_structure_matches_the_text() {
    let parsed = parse_graph_with_symbols(SAMPLE).unwrap();
    let graph = &parsed.graph;
    assert_eq!(graph.opset_version(), Some(10));
    assert_eq!(graph.block_inputs(graph.root()).len(), 2);

    let c = parsed.value("%c").unwrap();
    let constant = graph.node(graph.value(c).producer());
    assert_eq!(*constant.kind(), NodeKind::Constant);
    assert_eq!(constant.t("value"), Some(&Tensor::vector(vec![0i64])));
    assert_eq!(graph.value(c).uses().len(), 2);

    let n = parsed.value("n").unwrap();
    assert_eq!(*graph.value(n).ty(), ValueType::None);
    assert!(graph.must_be_none(graph.value(n).producer()));

    let a = parsed.value("a").unwrap();
    let split = graph.node(graph.value(a).producer());
    assert_eq!(split.outputs().len(), 2);
    assert_eq!(split.s("name"), Some("halves"));
    assert_eq!(split.f("scale"), Some(0.5));
    assert_eq!(split.is("split"), Some(&[2i64, 2][..]));
    assert_eq!(split.attr("axis"), Some(&Attribute::Int(0)));

    assert_eq!(
        *graph.value(parsed.value("x").unwrap()).ty(),
        ValueType::Tensor {
            dtype: DType::F32,
            shape: vec![2, 3]
        }
    );
}

#[test]
fn numeric_names_stay_unnamed() {
    let parsed = parse_graph_with_symbols(
        "graph (%0: i64[2]) {\n  %1 = Transpose(%0) {perm = [0]}\n  return(%1)\n}",
    )
    .unwrap();
    let input = parsed.value("0").unwrap();
    assert_eq!(parsed.graph.value(input).debug_name(), None);
    assert_eq!(parsed.graph.opset_version(), None);
}

#[test]
fn parse_errors_are_reported() {
    let unknown = parse_graph("graph () {\n  %y = Relu(%x)\n  return(%y)\n}");
    assert_eq!(
        unknown.unwrap_err(),
        TextIrError::Message("unknown value `%x`".into())
    );

    let twice = parse_graph("graph (%x) {\n  %x = Relu(%x)\n  return(%x)\n}");
    assert!(twice.is_err());

    let no_return = parse_graph("graph (%x) {\n  %y = Relu(%x)\n}");
    assert!(no_return.is_err());

    let bad_tensor = parse_graph(
        "graph () {\n  %c = Constant() {value = f32[2] [1.0]}\n  return(%c)\n}",
    );
    assert!(matches!(bad_tensor, Err(TextIrError::Tensor(_))));

    let nested = parse_graph("graph (%c) {\n  %y = If(%c)\n    block () {\n    return(%c)\n    }\n  return(%y)\n}");
    assert!(nested.is_err());
}

#[test]
fn nested_blocks_are_printed() {
    let mut graph = Graph::new();
    let root = graph.root();
    let cond = graph.add_input(root, Some("cond")).unwrap();
    let branch = graph.append_node(root, NodeKind::Other("If".into()), &[cond], 1);
    let body = graph.add_nested_block(branch);
    let inner = graph.append_node(body, NodeKind::Transpose, &[cond], 1);
    graph.set_attr(inner, "perm", vec![0i64]);
    let inner_out = graph.node(inner).outputs()[0];
    graph.set_debug_name(inner_out, "t").unwrap();
    graph.register_output(body, inner_out);
    let out = graph.node(branch).outputs()[0];
    graph.set_debug_name(out, "y").unwrap();
    graph.register_output(root, out);

    let expected = "graph (%cond) {
  %y = If(%cond)
    block () {
      %t = Transpose(%cond) {perm = [0]}
      return(%t)
    }
  return(%y)
}
";
    assert_eq!(graph.to_string(), expected);
}

#[test]
fn tensor_literals_round_trip_through_text() {
    let src = "graph () {\n  %c = Constant() {value = f64[2, 2] [1.5, -2.0, 0.25, 1e-7]}\n  return(%c)\n}";
    let graph = parse_graph(src).unwrap();
    let c = graph.block_outputs(graph.root())[0];
    let value = graph.node(graph.value(c).producer()).t("value").unwrap();
    assert_eq!(value.to_vec::<f64>().unwrap(), vec![1.5, -2.0, 0.25, 1e-7]);
    let again = parse_graph(&graph.to_string()).unwrap();
    assert_eq!(again.to_string(), graph.to_string());
}
