//! Scalar types, runtime values, and attribute bindings.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element types flowing along graph edges. The `*Ref` variants denote
/// reference-carrying outputs produced by stateful ops; rewrite passes must
/// never splice through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Float,
    Double,
    Int32,
    Int64,
    Bool,
    FloatRef,
    DoubleRef,
    Int32Ref,
    Int64Ref,
    BoolRef,
}

impl DataType {
    /// Returns `true` when the type is a mutable reference to a value.
    pub fn is_ref(self) -> bool {
        matches!(
            self,
            DataType::FloatRef
                | DataType::DoubleRef
                | DataType::Int32Ref
                | DataType::Int64Ref
                | DataType::BoolRef
        )
    }

    /// Strips the reference qualifier, if any.
    pub fn base_type(self) -> DataType {
        match self {
            DataType::FloatRef => DataType::Float,
            DataType::DoubleRef => DataType::Double,
            DataType::Int32Ref => DataType::Int32,
            DataType::Int64Ref => DataType::Int64,
            DataType::BoolRef => DataType::Bool,
            other => other,
        }
    }

    /// Wraps the type into its reference-carrying counterpart.
    pub fn ref_type(self) -> DataType {
        match self {
            DataType::Float => DataType::FloatRef,
            DataType::Double => DataType::DoubleRef,
            DataType::Int32 => DataType::Int32Ref,
            DataType::Int64 => DataType::Int64Ref,
            DataType::Bool => DataType::BoolRef,
            other => other,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Bool => "bool",
            DataType::FloatRef => "float_ref",
            DataType::DoubleRef => "double_ref",
            DataType::Int32Ref => "int32_ref",
            DataType::Int64Ref => "int64_ref",
            DataType::BoolRef => "bool_ref",
        };
        f.write_str(name)
    }
}

/// Marshaled runtime value. The executor core only inspects the dtype; the
/// payload representation is owned by the kernel collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f32),
    Double(f64),
    Int32(i32),
    Int64(i64),
    Bool(bool),
}

impl Value {
    pub fn dtype(&self) -> DataType {
        match self {
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::Bool(_) => DataType::Bool,
        }
    }

    /// Additive zero of the same dtype.
    pub fn zero_like(&self) -> Value {
        match self {
            Value::Float(_) => Value::Float(0.0),
            Value::Double(_) => Value::Double(0.0),
            Value::Int32(_) => Value::Int32(0),
            Value::Int64(_) => Value::Int64(0),
            Value::Bool(_) => Value::Bool(false),
        }
    }
}

/// Tagged attribute value bound to a node or instantiation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Type(DataType),
    TypeList(Vec<DataType>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// Reference to a function together with its attribute bindings, used by
    /// higher-order ops such as the gradient pseudo-function.
    Func { name: String, attrs: AttrMap },
    /// Unresolved reference to a declared attribute parameter; only valid
    /// inside function templates, resolved during instantiation.
    Placeholder(String),
}

/// Attribute bindings. Ordered so canonicalization is deterministic.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// Builds an [`AttrMap`] from `(name, value)` pairs.
pub fn attrs<const N: usize>(pairs: [(&str, AttrValue); N]) -> AttrMap {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

impl AttrValue {
    pub fn as_type(&self) -> Result<DataType> {
        match self {
            AttrValue::Type(dt) => Ok(*dt),
            other => Err(Error::invalid_argument(format!(
                "expected type attr, got {other}"
            ))),
        }
    }

    pub fn as_type_list(&self) -> Result<&[DataType]> {
        match self {
            AttrValue::TypeList(list) => Ok(list),
            other => Err(Error::invalid_argument(format!(
                "expected type-list attr, got {other}"
            ))),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            AttrValue::Int(v) => Ok(*v),
            other => Err(Error::invalid_argument(format!(
                "expected int attr, got {other}"
            ))),
        }
    }

    pub fn as_func(&self) -> Result<(&str, &AttrMap)> {
        match self {
            AttrValue::Func { name, attrs } => Ok((name, attrs)),
            other => Err(Error::invalid_argument(format!(
                "expected func attr, got {other}"
            ))),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Type(dt) => write!(f, "{dt}"),
            AttrValue::TypeList(list) => {
                f.write_str("[")?;
                for (i, dt) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{dt}")?;
                }
                f.write_str("]")
            }
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Bool(v) => write!(f, "{v}"),
            AttrValue::Str(v) => write!(f, "{v:?}"),
            AttrValue::Func { name, attrs } => write!(f, "{}", canonical_key(name, attrs)),
            AttrValue::Placeholder(name) => write!(f, "${name}"),
        }
    }
}

/// Canonical cache key for an instantiation request: the function name plus
/// the sorted attribute bindings. Two requests with equal `(name, attrs)`
/// canonicalize identically and therefore share a handle.
pub fn canonical_key(name: &str, attrs: &AttrMap) -> String {
    use fmt::Write;

    let mut key = String::with_capacity(name.len() + 16);
    key.push_str(name);
    key.push('[');
    for (i, (attr_name, value)) in attrs.iter().enumerate() {
        if i > 0 {
            key.push(',');
        }
        let _ = write!(key, "{attr_name}={value}");
    }
    key.push(']');
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_is_order_insensitive() {
        let a = attrs([
            ("T", AttrValue::Type(DataType::Float)),
            ("N", AttrValue::Int(2)),
        ]);
        let b = attrs([
            ("N", AttrValue::Int(2)),
            ("T", AttrValue::Type(DataType::Float)),
        ]);
        assert_eq!(canonical_key("AddN", &a), canonical_key("AddN", &b));
        assert_eq!(canonical_key("AddN", &a), "AddN[N=2,T=float]");
    }

    #[test]
    fn canonical_key_nests_function_attrs() {
        let inner = attrs([("T", AttrValue::Type(DataType::Float))]);
        let outer = attrs([(
            "f",
            AttrValue::Func {
                name: "Mul".to_string(),
                attrs: inner,
            },
        )]);
        assert_eq!(
            canonical_key("SymbolicGradient", &outer),
            "SymbolicGradient[f=Mul[T=float]]"
        );
    }
}
