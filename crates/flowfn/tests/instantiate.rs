use std::sync::Arc;
use std::thread;

use flowfn::instantiate::FunctionDef;
use flowfn::graph::NodeDef;
use flowfn::library::{FunctionLibrary, TypeSpec};
use flowfn::types::{attrs, AttrValue};
use flowfn::{DataType, Error, Runtime};

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

fn square_lib() -> Arc<FunctionLibrary> {
    let mut lib = FunctionLibrary::with_defaults();
    lib.add_function(square_def()).unwrap();
    Arc::new(lib)
}

#[test]
fn equal_requests_share_a_handle() {
    let rt = Runtime::new(square_lib());
    let float_attrs = attrs([("T", AttrValue::Type(DataType::Float))]);
    let first = rt.instantiate("Square", &float_attrs).unwrap();
    let second = rt.instantiate("Square", &float_attrs).unwrap();
    assert_eq!(first, second);
}

#[test]
fn distinct_attrs_get_distinct_handles() {
    let rt = Runtime::new(square_lib());
    let float_handle = rt
        .instantiate("Square", &attrs([("T", AttrValue::Type(DataType::Float))]))
        .unwrap();
    let double_handle = rt
        .instantiate("Square", &attrs([("T", AttrValue::Type(DataType::Double))]))
        .unwrap();
    assert_ne!(float_handle, double_handle);
}

#[test]
fn concurrent_instantiation_coalesces() {
    let rt = Runtime::new(square_lib());
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let rt = rt.clone();
            thread::spawn(move || {
                rt.instantiate("Square", &attrs([("T", AttrValue::Type(DataType::Float))]))
                    .unwrap()
            })
        })
        .collect();
    let handles: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
    for handle in &handles {
        assert_eq!(*handle, handles[0]);
    }
}

#[test]
fn unknown_function_is_not_found() {
    let rt = Runtime::new(square_lib());
    let err = rt.instantiate("Cube", &attrs([])).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
}

#[test]
fn missing_template_attr_is_invalid_argument() {
    let rt = Runtime::new(square_lib());
    let err = rt.instantiate("Square", &attrs([])).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "got {err:?}");
}

#[test]
fn gradient_without_target_attr_is_invalid_argument() {
    let rt = Runtime::new(square_lib());
    let err = rt.instantiate("SymbolicGradient", &attrs([])).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "got {err:?}");
}

#[test]
fn gradient_of_op_without_rule_is_invalid_argument() {
    let rt = Runtime::new(square_lib());
    let request = attrs([(
        "f",
        AttrValue::Func {
            name: "AddN".to_string(),
            attrs: attrs([("T", AttrValue::Type(DataType::Float))]),
        },
    )]);
    let err = rt.instantiate("SymbolicGradient", &request).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "got {err:?}");
}

#[test]
fn instantiated_body_satisfies_signature_invariants() {
    let rt = Runtime::new(square_lib());
    let handle = rt
        .instantiate("Square", &attrs([("T", AttrValue::Type(DataType::Float))]))
        .unwrap();
    let body = rt.function_body(handle);
    assert_eq!(body.arg_types, vec![DataType::Float]);
    assert_eq!(body.ret_types, vec![DataType::Float]);
    assert_eq!(body.arg_nodes.len(), body.arg_types.len());
    assert_eq!(body.ret_nodes.len(), body.ret_types.len());
}
