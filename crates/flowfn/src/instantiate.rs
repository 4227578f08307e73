//! Function templates and their expansion into interchange graphs.
//!
//! A [`FunctionDef`] is a declarative template: a typed signature
//! parameterized over attribute bindings, a body of node templates whose
//! attributes may hold placeholders, and bindings naming the endpoint behind
//! each return value. [`instantiate`] substitutes a concrete binding map and
//! yields the raw graph definition the cache converts into a `FunctionBody`.

use crate::error::{Error, Result};
use crate::graph::{GraphDef, NodeDef};
use crate::library::{ARG_OP, RET_OP, TypeSpec};
use crate::types::{AttrMap, AttrValue, DataType};

#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: String,
    pub ty: TypeSpec,
}

#[derive(Debug, Clone)]
pub struct RetSpec {
    pub name: String,
    pub ty: TypeSpec,
    /// Input string (interchange grammar) naming the endpoint returned here.
    pub binding: String,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    /// Declared attribute parameters; every one must be bound at
    /// instantiation time.
    pub attr_params: Vec<String>,
    pub args: Vec<ArgSpec>,
    pub rets: Vec<RetSpec>,
    pub nodes: Vec<NodeDef>,
}

impl FunctionDef {
    pub fn new(name: impl Into<String>) -> Self {
        FunctionDef {
            name: name.into(),
            attr_params: Vec::new(),
            args: Vec::new(),
            rets: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>) -> Self {
        self.attr_params.push(name.into());
        self
    }

    pub fn arg(mut self, name: impl Into<String>, ty: TypeSpec) -> Self {
        self.args.push(ArgSpec {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn ret(
        mut self,
        name: impl Into<String>,
        ty: TypeSpec,
        binding: impl Into<String>,
    ) -> Self {
        self.rets.push(RetSpec {
            name: name.into(),
            ty,
            binding: binding.into(),
        });
        self
    }

    pub fn node(mut self, node: NodeDef) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn resolve_arg_types(&self, attrs: &AttrMap) -> Result<Vec<DataType>> {
        self.args
            .iter()
            .map(|arg| resolve_signature_type(&self.name, &arg.ty, attrs))
            .collect()
    }

    pub fn resolve_ret_types(&self, attrs: &AttrMap) -> Result<Vec<DataType>> {
        self.rets
            .iter()
            .map(|ret| resolve_signature_type(&self.name, &ret.ty, attrs))
            .collect()
    }
}

/// Output of template expansion: the body in interchange form plus the
/// resolved signature types.
#[derive(Debug, Clone)]
pub struct InstantiationResult {
    pub gdef: GraphDef,
    pub arg_types: Vec<DataType>,
    pub ret_types: Vec<DataType>,
}

/// Expands `fdef` against `attrs` into a concrete graph definition with
/// synthesized argument/return placeholder nodes.
pub fn instantiate(fdef: &FunctionDef, attrs: &AttrMap) -> Result<InstantiationResult> {
    for param in &fdef.attr_params {
        if !attrs.contains_key(param) {
            return Err(Error::invalid_argument(format!(
                "function {} is missing attr {param}",
                fdef.name
            )));
        }
    }

    let arg_types = fdef.resolve_arg_types(attrs)?;
    let ret_types = fdef.resolve_ret_types(attrs)?;

    let mut gdef = GraphDef::default();
    for (index, (arg, dtype)) in fdef.args.iter().zip(arg_types.iter()).enumerate() {
        gdef.nodes.push(
            NodeDef::new(arg.name.clone(), ARG_OP)
                .attr("T", AttrValue::Type(*dtype))
                .attr("index", AttrValue::Int(index as i64)),
        );
    }
    for template in &fdef.nodes {
        let mut node = template.clone();
        node.attrs = substitute_attrs(&fdef.name, &node.attrs, attrs)?;
        gdef.nodes.push(node);
    }
    for (index, (ret, dtype)) in fdef.rets.iter().zip(ret_types.iter()).enumerate() {
        gdef.nodes.push(
            NodeDef::new(ret.name.clone(), RET_OP)
                .attr("T", AttrValue::Type(*dtype))
                .attr("index", AttrValue::Int(index as i64))
                .input(ret.binding.clone()),
        );
    }

    Ok(InstantiationResult {
        gdef,
        arg_types,
        ret_types,
    })
}

fn resolve_signature_type(func: &str, ty: &TypeSpec, attrs: &AttrMap) -> Result<DataType> {
    match ty {
        TypeSpec::Fixed(dt) => Ok(*dt),
        TypeSpec::Attr(name) => attrs
            .get(name)
            .ok_or_else(|| {
                Error::invalid_argument(format!("function {func} is missing attr {name}"))
            })?
            .as_type(),
        other => Err(Error::invalid_argument(format!(
            "function {func} signature cannot use variadic spec {other:?}"
        ))),
    }
}

fn substitute_attrs(func: &str, template: &AttrMap, bindings: &AttrMap) -> Result<AttrMap> {
    let mut resolved = AttrMap::new();
    for (name, value) in template {
        resolved.insert(name.clone(), substitute_value(func, value, bindings)?);
    }
    Ok(resolved)
}

fn substitute_value(func: &str, value: &AttrValue, bindings: &AttrMap) -> Result<AttrValue> {
    match value {
        AttrValue::Placeholder(param) => bindings.get(param).cloned().ok_or_else(|| {
            Error::invalid_argument(format!("function {func} is missing attr {param}"))
        }),
        AttrValue::Func { name, attrs } => Ok(AttrValue::Func {
            name: name.clone(),
            attrs: substitute_attrs(func, attrs, bindings)?,
        }),
        other => Ok(other.clone()),
    }
}
