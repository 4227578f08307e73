use std::sync::Arc;

use flowfn::graph::{Endpoint, Graph, NodeDef, NodeInit};
use flowfn::instantiate::FunctionDef;
use flowfn::library::{FunctionLibrary, TypeSpec, LIST_TO_ARRAY_OP};
use flowfn::passes::{
    expand_inline_functions, remove_dead_nodes, remove_identity_nodes,
    remove_list_array_converters,
};
use flowfn::types::{attrs, AttrValue};
use flowfn::{DataType, Runtime};

fn float_identity_init(name: &str) -> NodeInit {
    let mut init = NodeInit::new(name, "Identity");
    init.attrs
        .insert("T".to_string(), AttrValue::Type(DataType::Float));
    init.in_types.push(DataType::Float);
    init.out_types.push(DataType::Float);
    init
}

#[test]
fn dead_nodes_are_removed() {
    let mut graph = Graph::new();
    let arg = graph.add_arg(DataType::Float, 0);
    let dead = graph.add_identity(Endpoint::new(arg, 0));
    let ret = graph.add_ret(Endpoint::new(arg, 0), 0);

    assert!(remove_dead_nodes(&mut graph));
    assert!(graph.maybe_node(dead).is_none());
    assert!(graph.maybe_node(arg).is_some());
    assert!(graph.maybe_node(ret).is_some());
    assert!(graph.maybe_node(graph.source()).is_some());
    assert!(graph.maybe_node(graph.sink()).is_some());
}

#[test]
fn stateful_and_control_flow_nodes_are_essential() {
    let mut graph = Graph::new();
    let mut variable = NodeInit::new("v", "Variable");
    variable
        .attrs
        .insert("dtype".to_string(), AttrValue::Type(DataType::Float));
    variable.is_stateful = true;
    variable.out_types.push(DataType::FloatRef);
    let variable = graph.add_node(variable);

    let mut enter = NodeInit::new("enter", "Enter");
    enter
        .attrs
        .insert("T".to_string(), AttrValue::Type(DataType::Float));
    enter.is_control_flow = true;
    enter.in_types.push(DataType::Float);
    enter.out_types.push(DataType::Float);
    let enter = graph.add_node(enter);

    // Neither is connected to anything observable, yet both must survive;
    // this disconnected constant must not.
    let mut konst = NodeInit::new("c", "Const");
    konst
        .attrs
        .insert("dtype".to_string(), AttrValue::Type(DataType::Float));
    konst
        .attrs
        .insert("value".to_string(), AttrValue::Float(1.0));
    konst.out_types.push(DataType::Float);
    let konst = graph.add_node(konst);

    // The constant feeds the control-flow node, so it is backward-reachable
    // from an essential node and survives too.
    graph.add_edge(konst, 0, enter, 0);
    let mut orphan = NodeInit::new("orphan", "Const");
    orphan
        .attrs
        .insert("dtype".to_string(), AttrValue::Type(DataType::Float));
    orphan
        .attrs
        .insert("value".to_string(), AttrValue::Float(2.0));
    orphan.out_types.push(DataType::Float);
    let orphan = graph.add_node(orphan);

    assert!(remove_dead_nodes(&mut graph));
    assert!(graph.maybe_node(variable).is_some());
    assert!(graph.maybe_node(enter).is_some());
    assert!(graph.maybe_node(konst).is_some());
    assert!(graph.maybe_node(orphan).is_none());
}

#[test]
fn single_input_identity_is_spliced_out() {
    let mut graph = Graph::new();
    let arg = graph.add_arg(DataType::Float, 0);
    let identity = graph.add_identity(Endpoint::new(arg, 0));
    let ret = graph.add_ret(Endpoint::new(identity, 0), 0);

    assert!(remove_identity_nodes(&mut graph));
    assert!(graph.maybe_node(identity).is_none());

    // The consumer is rewired straight to the identity's source.
    let input = graph.input_edge(ret, 0).unwrap();
    assert_eq!(input.src, arg);
    assert_eq!(input.src_output(), 0);
}

#[test]
fn chained_identities_collapse_to_the_source() {
    let mut graph = Graph::new();
    let arg = graph.add_arg(DataType::Float, 0);
    let first = graph.add_identity(Endpoint::new(arg, 0));
    let second = graph.add_identity(Endpoint::new(first, 0));
    let ret = graph.add_ret(Endpoint::new(second, 0), 0);

    assert!(remove_identity_nodes(&mut graph));
    let input = graph.input_edge(ret, 0).unwrap();
    assert_eq!(input.src, arg);
}

#[test]
fn identity_with_control_dependency_is_left_alone() {
    let mut graph = Graph::new();
    let arg = graph.add_arg(DataType::Float, 0);
    let barrier = graph.add_no_op();
    let identity = graph.add_identity(Endpoint::new(arg, 0));
    graph.add_control_edge(barrier, identity);
    graph.add_ret(Endpoint::new(identity, 0), 0);

    assert!(!remove_identity_nodes(&mut graph));
    assert!(graph.maybe_node(identity).is_some());
}

#[test]
fn identity_with_multiple_data_inputs_is_left_alone() {
    let mut graph = Graph::new();
    let arg = graph.add_arg(DataType::Float, 0);
    let mut init = float_identity_init("two_input_identity");
    init.in_types.push(DataType::Float);
    let identity = graph.add_node(init);
    graph.add_edge(arg, 0, identity, 0);
    graph.add_edge(arg, 0, identity, 1);
    graph.add_ret(Endpoint::new(identity, 0), 0);

    assert!(!remove_identity_nodes(&mut graph));
    assert!(graph.maybe_node(identity).is_some());
}

#[test]
fn identity_dereferencing_a_ref_output_is_left_alone() {
    let mut graph = Graph::new();
    let mut variable = NodeInit::new("v", "Variable");
    variable
        .attrs
        .insert("dtype".to_string(), AttrValue::Type(DataType::Float));
    variable.is_stateful = true;
    variable.out_types.push(DataType::FloatRef);
    let variable = graph.add_node(variable);

    let identity = graph.add_node(float_identity_init("deref"));
    graph.add_edge(variable, 0, identity, 0);
    graph.add_ret(Endpoint::new(identity, 0), 0);

    assert!(!remove_identity_nodes(&mut graph));
    assert!(graph.maybe_node(identity).is_some());
}

fn converter_init(name: &str, num_inputs: usize, num_outputs: usize) -> NodeInit {
    let mut init = NodeInit::new(name, LIST_TO_ARRAY_OP);
    init.attrs.insert(
        "Tin".to_string(),
        AttrValue::TypeList(vec![DataType::Float; num_inputs]),
    );
    init.attrs
        .insert("N".to_string(), AttrValue::Int(num_outputs as i64));
    init.attrs
        .insert("T".to_string(), AttrValue::Type(DataType::Float));
    init.in_types = std::iter::repeat(DataType::Float).take(num_inputs).collect();
    init.out_types = std::iter::repeat(DataType::Float).take(num_outputs).collect();
    init
}

#[test]
fn converter_is_replaced_by_per_slot_identities() {
    let mut graph = Graph::new();
    let arg0 = graph.add_arg(DataType::Float, 0);
    let arg1 = graph.add_arg(DataType::Float, 1);
    let converter = graph.add_node(converter_init("conv", 2, 2));
    graph.add_edge(arg0, 0, converter, 0);
    graph.add_edge(arg1, 0, converter, 1);
    let ret0 = graph.add_ret(Endpoint::new(converter, 0), 0);
    let ret1 = graph.add_ret(Endpoint::new(converter, 1), 1);

    let control_src = graph.add_no_op();
    graph.add_control_edge(control_src, converter);
    let control_dst = graph.add_no_op();
    graph.add_control_edge(converter, control_dst);

    assert!(remove_list_array_converters(&mut graph));
    assert!(graph.maybe_node(converter).is_none());

    // Each return now reads through an identity of its own slot's source.
    for (ret, arg) in [(ret0, arg0), (ret1, arg1)] {
        let identity = graph.input_edge(ret, 0).unwrap().src;
        assert_eq!(graph.node(identity).op, "Identity");
        assert_eq!(graph.input_edge(identity, 0).unwrap().src, arg);
    }

    // The control consumer now depends on a barrier fed by both identities.
    let barrier = graph
        .in_edges(control_dst)
        .into_iter()
        .find(|edge| edge.is_control())
        .unwrap()
        .src;
    assert_eq!(graph.node(barrier).op, "NoOp");
    assert_eq!(
        graph
            .in_edges(barrier)
            .iter()
            .filter(|edge| edge.is_control())
            .count(),
        2
    );
}

#[test]
fn converter_with_mismatched_arity_is_skipped() {
    let mut graph = Graph::new();
    let arg = graph.add_arg(DataType::Float, 0);
    let converter = graph.add_node(converter_init("conv", 1, 2));
    graph.add_edge(arg, 0, converter, 0);
    graph.add_ret(Endpoint::new(converter, 0), 0);
    graph.add_ret(Endpoint::new(converter, 1), 1);

    assert!(!remove_list_array_converters(&mut graph));
    assert!(graph.maybe_node(converter).is_some());
}

fn inner_def() -> FunctionDef {
    FunctionDef::new("Inner")
        .attr("T")
        .arg("x", TypeSpec::attr("T"))
        .node(
            NodeDef::new("y", "Mul")
                .attr("T", AttrValue::Placeholder("T".to_string()))
                .input("x")
                .input("x"),
        )
        .ret("z", TypeSpec::attr("T"), "y")
}

fn outer_def() -> FunctionDef {
    FunctionDef::new("Outer")
        .attr("T")
        .arg("x", TypeSpec::attr("T"))
        .node(
            NodeDef::new("a", "Inner")
                .attr("T", AttrValue::Placeholder("T".to_string()))
                .input("x"),
        )
        .node(
            NodeDef::new("b", "Inner")
                .attr("T", AttrValue::Placeholder("T".to_string()))
                .input("a"),
        )
        .ret("z", TypeSpec::attr("T"), "b")
}

fn nested_runtime() -> Runtime {
    let mut lib = FunctionLibrary::with_defaults();
    lib.add_function(inner_def()).unwrap();
    lib.add_function(outer_def()).unwrap();
    Runtime::new(Arc::new(lib))
}

#[test]
fn inlining_preserves_the_external_contract() {
    let rt = nested_runtime();
    let outer = rt
        .instantiate("Outer", &attrs([("T", AttrValue::Type(DataType::Float))]))
        .unwrap();

    let body = rt.function_body(outer);
    let mut graph = body.graph.clone();
    let nodes_before = graph.num_nodes();

    assert!(expand_inline_functions(&rt, &mut graph));

    // Placeholders survive untouched and the node count grows by the spliced
    // callee bodies.
    for (&arg, dtype) in body.arg_nodes.iter().zip(body.arg_types.iter()) {
        assert_eq!(graph.node(arg).output_type(0), *dtype);
    }
    for (&ret, dtype) in body.ret_nodes.iter().zip(body.ret_types.iter()) {
        assert_eq!(graph.node(ret).input_type(0), *dtype);
    }
    assert!(graph.num_nodes() > nodes_before);
}

#[test]
fn nested_calls_expand_to_a_fixpoint() {
    let rt = nested_runtime();
    let outer = rt
        .instantiate("Outer", &attrs([("T", AttrValue::Type(DataType::Float))]))
        .unwrap();
    let mut graph = rt.function_body(outer).graph.clone();

    while expand_inline_functions(&rt, &mut graph) {}

    let call_nodes = graph
        .op_node_ids()
        .filter(|&id| {
            let op = graph.node(id).op.as_str();
            op == "Inner" || op == "Outer"
        })
        .count();
    assert_eq!(call_nodes, 0);
}

#[test]
fn call_node_with_mismatched_types_is_not_inlined() {
    let rt = nested_runtime();
    rt.instantiate("Inner", &attrs([("T", AttrValue::Type(DataType::Double))]))
        .unwrap();

    // Hand-build a caller whose call node claims float while the cached body
    // (keyed by the node's own attrs) is double: the types no longer match.
    let mut graph = Graph::new();
    let arg = graph.add_arg(DataType::Float, 0);
    let mut call = NodeInit::new("bad_call", "Inner");
    call.attrs
        .insert("T".to_string(), AttrValue::Type(DataType::Double));
    call.in_types.push(DataType::Float);
    call.out_types.push(DataType::Float);
    let call = graph.add_node(call);
    graph.add_edge(arg, 0, call, 0);
    graph.add_ret(Endpoint::new(call, 0), 0);

    expand_inline_functions(&rt, &mut graph);
    assert!(graph.maybe_node(call).is_some(), "mismatched call must stay");
}
