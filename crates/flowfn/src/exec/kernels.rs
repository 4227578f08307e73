//! Primitive-op evaluators.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::library::{ARRAY_TO_LIST_OP, LIST_TO_ARRAY_OP};
use crate::types::{AttrMap, DataType, Value};

/// Evaluates one primitive op given its node attributes and input values.
pub type PrimitiveFn = fn(&AttrMap, &[Value]) -> Result<Vec<Value>>;

#[derive(Default)]
pub struct KernelRegistry {
    kernels: HashMap<String, PrimitiveFn>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        KernelRegistry::default()
    }

    pub fn with_default_kernels() -> Self {
        let mut registry = KernelRegistry::new();
        registry.register("Identity", identity);
        registry.register("Const", constant);
        registry.register("Add", add);
        registry.register("Sub", sub);
        registry.register("Mul", mul);
        registry.register("Neg", neg);
        registry.register("ZerosLike", zeros_like);
        registry.register("AddN", add_n);
        // Unrewritten adapters pass every input straight through.
        registry.register(LIST_TO_ARRAY_OP, pass_on);
        registry.register(ARRAY_TO_LIST_OP, pass_on);
        registry
    }

    pub fn register(&mut self, op: impl Into<String>, func: PrimitiveFn) {
        self.kernels.insert(op.into(), func);
    }

    pub fn lookup(&self, op: &str) -> Option<PrimitiveFn> {
        self.kernels.get(op).copied()
    }
}

fn one_input<'a>(inputs: &'a [Value]) -> Result<&'a Value> {
    match inputs {
        [value] => Ok(value),
        _ => Err(Error::internal(format!(
            "expected 1 input, got {}",
            inputs.len()
        ))),
    }
}

fn two_inputs<'a>(inputs: &'a [Value]) -> Result<(&'a Value, &'a Value)> {
    match inputs {
        [x, y] => Ok((x, y)),
        _ => Err(Error::internal(format!(
            "expected 2 inputs, got {}",
            inputs.len()
        ))),
    }
}

fn identity(_attrs: &AttrMap, inputs: &[Value]) -> Result<Vec<Value>> {
    Ok(vec![one_input(inputs)?.clone()])
}

fn pass_on(_attrs: &AttrMap, inputs: &[Value]) -> Result<Vec<Value>> {
    Ok(inputs.to_vec())
}

fn constant(attrs: &AttrMap, _inputs: &[Value]) -> Result<Vec<Value>> {
    let dtype = attrs
        .get("dtype")
        .ok_or_else(|| Error::invalid_argument("Const is missing attr dtype"))?
        .as_type()?;
    let value = attrs
        .get("value")
        .ok_or_else(|| Error::invalid_argument("Const is missing attr value"))?;
    let value = match (dtype, value) {
        (DataType::Float, crate::types::AttrValue::Float(v)) => Value::Float(*v as f32),
        (DataType::Double, crate::types::AttrValue::Float(v)) => Value::Double(*v),
        (DataType::Int32, crate::types::AttrValue::Int(v)) => Value::Int32(*v as i32),
        (DataType::Int64, crate::types::AttrValue::Int(v)) => Value::Int64(*v),
        (DataType::Bool, crate::types::AttrValue::Bool(v)) => Value::Bool(*v),
        (dtype, value) => {
            return Err(Error::invalid_argument(format!(
                "Const value {value} does not match dtype {dtype}"
            )))
        }
    };
    Ok(vec![value])
}

fn add(_attrs: &AttrMap, inputs: &[Value]) -> Result<Vec<Value>> {
    let (x, y) = two_inputs(inputs)?;
    Ok(vec![add_values(x, y)?])
}

fn sub(_attrs: &AttrMap, inputs: &[Value]) -> Result<Vec<Value>> {
    let (x, y) = two_inputs(inputs)?;
    let result = match (x, y) {
        (Value::Float(a), Value::Float(b)) => Value::Float(a - b),
        (Value::Double(a), Value::Double(b)) => Value::Double(a - b),
        (Value::Int32(a), Value::Int32(b)) => Value::Int32(a - b),
        (Value::Int64(a), Value::Int64(b)) => Value::Int64(a - b),
        (x, y) => return Err(operand_mismatch("Sub", x, y)),
    };
    Ok(vec![result])
}

fn mul(_attrs: &AttrMap, inputs: &[Value]) -> Result<Vec<Value>> {
    let (x, y) = two_inputs(inputs)?;
    let result = match (x, y) {
        (Value::Float(a), Value::Float(b)) => Value::Float(a * b),
        (Value::Double(a), Value::Double(b)) => Value::Double(a * b),
        (Value::Int32(a), Value::Int32(b)) => Value::Int32(a * b),
        (Value::Int64(a), Value::Int64(b)) => Value::Int64(a * b),
        (x, y) => return Err(operand_mismatch("Mul", x, y)),
    };
    Ok(vec![result])
}

fn neg(_attrs: &AttrMap, inputs: &[Value]) -> Result<Vec<Value>> {
    let result = match one_input(inputs)? {
        Value::Float(v) => Value::Float(-v),
        Value::Double(v) => Value::Double(-v),
        Value::Int32(v) => Value::Int32(-v),
        Value::Int64(v) => Value::Int64(-v),
        Value::Bool(_) => {
            return Err(Error::invalid_argument("Neg is not defined for bool"))
        }
    };
    Ok(vec![result])
}

fn zeros_like(_attrs: &AttrMap, inputs: &[Value]) -> Result<Vec<Value>> {
    Ok(vec![one_input(inputs)?.zero_like()])
}

fn add_n(_attrs: &AttrMap, inputs: &[Value]) -> Result<Vec<Value>> {
    let (first, rest) = inputs
        .split_first()
        .ok_or_else(|| Error::invalid_argument("AddN needs at least one input"))?;
    let mut sum = first.clone();
    for value in rest {
        sum = add_values(&sum, value)?;
    }
    Ok(vec![sum])
}

fn add_values(x: &Value, y: &Value) -> Result<Value> {
    match (x, y) {
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a + b)),
        (Value::Int32(a), Value::Int32(b)) => Ok(Value::Int32(a + b)),
        (Value::Int64(a), Value::Int64(b)) => Ok(Value::Int64(a + b)),
        (x, y) => Err(operand_mismatch("Add", x, y)),
    }
}

fn operand_mismatch(op: &str, x: &Value, y: &Value) -> Error {
    Error::invalid_argument(format!(
        "{op} operand type mismatch: {} vs. {}",
        x.dtype(),
        y.dtype()
    ))
}
