//! Argument/return marshaling for one function invocation.

use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::types::{DataType, Value};

/// Binds a flat argument list to argument indices and collects return values
/// by index, type-checked against the declared signature on both sides.
#[derive(Debug)]
pub struct CallFrame {
    arg_types: Vec<DataType>,
    ret_types: Vec<DataType>,
    args: Vec<Value>,
    rets: Mutex<Vec<Option<Value>>>,
}

impl CallFrame {
    pub fn new(
        arg_types: Vec<DataType>,
        ret_types: Vec<DataType>,
        args: Vec<Value>,
    ) -> Result<Self> {
        if args.len() != arg_types.len() {
            return Err(Error::invalid_argument(format!(
                "expected {} arguments, got {}",
                arg_types.len(),
                args.len()
            )));
        }
        for (index, (value, expected)) in args.iter().zip(arg_types.iter()).enumerate() {
            if value.dtype() != *expected {
                return Err(Error::invalid_argument(format!(
                    "argument {index} type mismatch: actual {} vs. expect {expected}",
                    value.dtype()
                )));
            }
        }
        let rets = Mutex::new(vec![None; ret_types.len()]);
        Ok(CallFrame {
            arg_types,
            ret_types,
            args,
            rets,
        })
    }

    pub fn num_args(&self) -> usize {
        self.arg_types.len()
    }

    pub fn num_retvals(&self) -> usize {
        self.ret_types.len()
    }

    pub fn get_arg(&self, index: usize) -> Result<Value> {
        self.args
            .get(index)
            .cloned()
            .ok_or_else(|| Error::invalid_argument(format!("argument index {index} out of range")))
    }

    pub fn set_retval(&self, index: usize, value: Value) -> Result<()> {
        let expected = *self.ret_types.get(index).ok_or_else(|| {
            Error::invalid_argument(format!("return index {index} out of range"))
        })?;
        if value.dtype() != expected {
            return Err(Error::invalid_argument(format!(
                "return {index} type mismatch: actual {} vs. expect {expected}",
                value.dtype()
            )));
        }
        let mut rets = self.rets.lock().expect("call frame poisoned");
        if rets[index].replace(value).is_some() {
            return Err(Error::internal(format!("return {index} is already set")));
        }
        Ok(())
    }

    /// Reads back all return values in index order; every slot must have
    /// been set.
    pub fn take_retvals(&self) -> Result<Vec<Value>> {
        let mut rets = self.rets.lock().expect("call frame poisoned");
        rets.iter_mut()
            .enumerate()
            .map(|(index, slot)| {
                slot.take()
                    .ok_or_else(|| Error::internal(format!("return {index} does not have a value")))
            })
            .collect()
    }
}
