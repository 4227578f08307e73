use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use flowfn::exec::CancellationToken;
use flowfn::graph::NodeDef;
use flowfn::instantiate::FunctionDef;
use flowfn::library::{FunctionLibrary, TypeSpec};
use flowfn::types::{attrs, AttrValue};
use flowfn::{DataType, Error, Options, Runtime, Value};

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

fn runtime() -> Runtime {
    let mut lib = FunctionLibrary::with_defaults();
    lib.add_function(square_def()).unwrap();
    lib.add_function(inner_def()).unwrap();
    lib.add_function(outer_def()).unwrap();
    Runtime::new(Arc::new(lib))
}

fn float_attrs() -> flowfn::types::AttrMap {
    attrs([("T", AttrValue::Type(DataType::Float))])
}

#[test]
fn square_runs_end_to_end() {
    let rt = runtime();
    let handle = rt.instantiate("Square", &float_attrs()).unwrap();
    let rets = rt
        .run_sync(Options::default(), handle, vec![Value::Float(3.0)])
        .unwrap();
    assert_eq!(rets, vec![Value::Float(9.0)]);
}

#[test]
fn nested_calls_run_end_to_end() {
    let rt = runtime();
    let handle = rt.instantiate("Outer", &float_attrs()).unwrap();
    let rets = rt
        .run_sync(Options::default(), handle, vec![Value::Float(2.0)])
        .unwrap();
    // Inner(Inner(2)) = (2^2)^2
    assert_eq!(rets, vec![Value::Float(16.0)]);
}

#[test]
fn repeated_runs_reuse_the_cached_item() {
    let rt = runtime();
    let handle = rt.instantiate("Square", &float_attrs()).unwrap();
    for x in [1.0f32, 2.0, 4.0] {
        let rets = rt
            .run_sync(Options::default(), handle, vec![Value::Float(x)])
            .unwrap();
        assert_eq!(rets, vec![Value::Float(x * x)]);
    }
}

#[test]
fn concurrent_runs_share_one_handle() {
    let rt = runtime();
    let handle = rt.instantiate("Square", &float_attrs()).unwrap();
    let threads: Vec<_> = (1..=8)
        .map(|i| {
            let rt = rt.clone();
            thread::spawn(move || {
                let rets = rt
                    .run_sync(Options::default(), handle, vec![Value::Float(i as f32)])
                    .unwrap();
                assert_eq!(rets, vec![Value::Float((i * i) as f32)]);
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
}

#[test]
fn argument_type_mismatch_fails_before_execution() {
    let rt = runtime();
    let handle = rt.instantiate("Square", &float_attrs()).unwrap();
    let err = rt
        .run_sync(Options::default(), handle, vec![Value::Int32(3)])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "got {err:?}");
}

#[test]
fn wrong_arity_fails_before_execution() {
    let rt = runtime();
    let handle = rt.instantiate("Square", &float_attrs()).unwrap();
    let err = rt
        .run_sync(
            Options::default(),
            handle,
            vec![Value::Float(1.0), Value::Float(2.0)],
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "got {err:?}");
}

#[test]
fn pre_cancelled_run_completes_with_cancelled() {
    let rt = runtime();
    let handle = rt.instantiate("Square", &float_attrs()).unwrap();
    let token = Arc::new(CancellationToken::new());
    token.cancel();
    let opts = Options {
        step_id: 0,
        cancellation: Some(token),
    };
    let err = rt.run_sync(opts, handle, vec![Value::Float(3.0)]).unwrap_err();
    assert_eq!(err, Error::Cancelled);
}

#[test]
fn failures_are_delivered_through_the_completion_callback() {
    let rt = runtime();
    let handle = rt.instantiate("Square", &float_attrs()).unwrap();
    let delivered = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&delivered);
    rt.run(
        Options::default(),
        handle,
        vec![Value::Int32(3)],
        move |result| {
            assert!(result.is_err());
            observed.fetch_add(1, Ordering::SeqCst);
        },
    );
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
}

#[test]
fn caller_supplied_runner_receives_the_work() {
    let dispatched = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dispatched);
    let mut config = flowfn::RuntimeConfig::default();
    config.runner = Arc::new(move |work| {
        counter.fetch_add(1, Ordering::SeqCst);
        work();
    });

    let mut lib = FunctionLibrary::with_defaults();
    lib.add_function(square_def()).unwrap();
    let rt = Runtime::with_config(Arc::new(lib), config);

    let handle = rt.instantiate("Square", &float_attrs()).unwrap();
    let rets = rt
        .run_sync(Options::default(), handle, vec![Value::Float(3.0)])
        .unwrap();
    assert_eq!(rets, vec![Value::Float(9.0)]);
    assert!(dispatched.load(Ordering::SeqCst) >= 1);
}
