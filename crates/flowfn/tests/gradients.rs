use std::sync::Arc;

use flowfn::graph::NodeDef;
use flowfn::instantiate::FunctionDef;
use flowfn::library::{FunctionLibrary, TypeSpec};
use flowfn::types::{attrs, AttrValue};
use flowfn::{DataType, Options, Runtime, Value};

fn id_def() -> FunctionDef {
    FunctionDef::new("IdFn")
        .attr("T")
        .arg("x", TypeSpec::attr("T"))
        .node(
            NodeDef::new("y", "Identity")
                .attr("T", AttrValue::Placeholder("T".to_string()))
                .input("x"),
        )
        .ret("z", TypeSpec::attr("T"), "y")
}

fn square_def() -> FunctionDef {
    FunctionDef::new("Square")
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

fn runtime() -> Runtime {
    let mut lib = FunctionLibrary::with_defaults();
    lib.add_function(id_def()).unwrap();
    lib.add_function(square_def()).unwrap();
    Runtime::new(Arc::new(lib))
}

fn gradient_request(target: &str) -> flowfn::types::AttrMap {
    attrs([(
        "f",
        AttrValue::Func {
            name: target.to_string(),
            attrs: attrs([("T", AttrValue::Type(DataType::Float))]),
        },
    )])
}

#[test]
fn gradient_signature_appends_seeds_and_returns_input_gradients() {
    let rt = runtime();
    let handle = rt
        .instantiate("SymbolicGradient", &gradient_request("Square"))
        .unwrap();
    let body = rt.function_body(handle);

    // g takes f's argument plus one seed per return, and returns one
    // gradient per original argument.
    assert_eq!(body.arg_types, vec![DataType::Float, DataType::Float]);
    assert_eq!(body.ret_types, vec![DataType::Float]);
    assert_eq!(body.arg_nodes.len(), 2);
    assert_eq!(body.ret_nodes.len(), 1);
}

#[test]
fn gradient_of_identity_returns_the_seed() {
    let rt = runtime();
    let handle = rt
        .instantiate("SymbolicGradient", &gradient_request("IdFn"))
        .unwrap();
    let rets = rt
        .run_sync(
            Options::default(),
            handle,
            vec![Value::Float(3.0), Value::Float(5.0)],
        )
        .unwrap();
    assert_eq!(rets, vec![Value::Float(5.0)]);
}

#[test]
fn gradient_of_square_is_two_x_dy() {
    let rt = runtime();
    let handle = rt
        .instantiate("SymbolicGradient", &gradient_request("Square"))
        .unwrap();

    let rets = rt
        .run_sync(
            Options::default(),
            handle,
            vec![Value::Float(3.0), Value::Float(1.0)],
        )
        .unwrap();
    assert_eq!(rets, vec![Value::Float(6.0)]);

    // The seed scales the gradient linearly.
    let rets = rt
        .run_sync(
            Options::default(),
            handle,
            vec![Value::Float(3.0), Value::Float(5.0)],
        )
        .unwrap();
    assert_eq!(rets, vec![Value::Float(30.0)]);
}

#[test]
fn gradient_of_a_primitive_goes_through_the_rule_registry() {
    let rt = runtime();
    let handle = rt
        .instantiate("SymbolicGradient", &gradient_request("Mul"))
        .unwrap();
    let body = rt.function_body(handle);
    assert_eq!(
        body.arg_types,
        vec![DataType::Float, DataType::Float, DataType::Float]
    );
    assert_eq!(body.ret_types, vec![DataType::Float, DataType::Float]);

    // d(x*y) = (dz*y, dz*x)
    let rets = rt
        .run_sync(
            Options::default(),
            handle,
            vec![Value::Float(3.0), Value::Float(4.0), Value::Float(2.0)],
        )
        .unwrap();
    assert_eq!(rets, vec![Value::Float(8.0), Value::Float(6.0)]);
}

#[test]
fn gradient_requests_are_cached_like_any_other() {
    let rt = runtime();
    let first = rt
        .instantiate("SymbolicGradient", &gradient_request("Square"))
        .unwrap();
    let second = rt
        .instantiate("SymbolicGradient", &gradient_request("Square"))
        .unwrap();
    assert_eq!(first, second);
}
