//! Explicit registry context: op signatures, function definitions, and
//! gradient-construction rules.
//!
//! Every component that needs op or function metadata receives a
//! [`FunctionLibrary`] reference; there is no ambient global registry.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::graph::{NodeDef, NodeInit};
use crate::instantiate::FunctionDef;
use crate::types::{AttrMap, DataType};

/// Argument-placeholder op kind; reads one value out of the call frame.
pub const ARG_OP: &str = "_Arg";
/// Return-placeholder op kind; writes one value into the call frame.
pub const RET_OP: &str = "_Retval";
/// The gradient pseudo-function dispatched by the instantiation cache.
pub const GRADIENT_OP: &str = "SymbolicGradient";
/// Variadic list-to-array adapter eliminated by the converter pass.
pub const LIST_TO_ARRAY_OP: &str = "_ListToArray";
/// Variadic array-to-list adapter eliminated by the converter pass.
pub const ARRAY_TO_LIST_OP: &str = "_ArrayToList";

/// How one signature slot's types are derived from a node's attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    Fixed(DataType),
    /// Single type taken from a type attribute.
    Attr(String),
    /// Variadic slot expanded from a type-list attribute.
    List(String),
    /// Variadic slot: `count_attr` copies of the type in `type_attr`.
    Repeated {
        count_attr: String,
        type_attr: String,
    },
}

impl TypeSpec {
    pub fn attr(name: &str) -> Self {
        TypeSpec::Attr(name.to_string())
    }

    pub fn list(name: &str) -> Self {
        TypeSpec::List(name.to_string())
    }

    pub fn repeated(count_attr: &str, type_attr: &str) -> Self {
        TypeSpec::Repeated {
            count_attr: count_attr.to_string(),
            type_attr: type_attr.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlotDef {
    pub name: String,
    pub ty: TypeSpec,
    pub is_ref: bool,
}

#[derive(Debug, Clone)]
pub struct OpDef {
    pub name: String,
    pub inputs: Vec<SlotDef>,
    pub outputs: Vec<SlotDef>,
    pub is_stateful: bool,
    pub is_control_flow: bool,
}

impl OpDef {
    pub fn new(name: impl Into<String>) -> Self {
        OpDef {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            is_stateful: false,
            is_control_flow: false,
        }
    }

    pub fn input(mut self, name: &str, ty: TypeSpec) -> Self {
        self.inputs.push(SlotDef {
            name: name.to_string(),
            ty,
            is_ref: false,
        });
        self
    }

    pub fn output(mut self, name: &str, ty: TypeSpec) -> Self {
        self.outputs.push(SlotDef {
            name: name.to_string(),
            ty,
            is_ref: false,
        });
        self
    }

    pub fn ref_output(mut self, name: &str, ty: TypeSpec) -> Self {
        self.outputs.push(SlotDef {
            name: name.to_string(),
            ty,
            is_ref: true,
        });
        self
    }

    pub fn stateful(mut self) -> Self {
        self.is_stateful = true;
        self
    }

    pub fn control_flow(mut self) -> Self {
        self.is_control_flow = true;
        self
    }
}

/// Primitive-op signature registry.
#[derive(Debug, Default)]
pub struct OpRegistry {
    ops: HashMap<String, OpDef>,
}

impl OpRegistry {
    pub fn new() -> Self {
        OpRegistry::default()
    }

    /// Registry pre-populated with the runtime's built-in op set: call-frame
    /// placeholders, the gradient pseudo-op, list/array adapters, arithmetic
    /// primitives, and control-flow/stateful markers.
    pub fn with_default_ops() -> Self {
        let mut registry = OpRegistry::new();
        registry.register(
            OpDef::new(ARG_OP)
                .output("output", TypeSpec::attr("T"))
                .stateful(),
        );
        registry.register(
            OpDef::new(RET_OP)
                .input("input", TypeSpec::attr("T"))
                .stateful(),
        );
        registry.register(OpDef::new("NoOp"));
        registry.register(
            OpDef::new("Identity")
                .input("input", TypeSpec::attr("T"))
                .output("output", TypeSpec::attr("T")),
        );
        registry.register(OpDef::new("Const").output("output", TypeSpec::attr("dtype")));
        for binary in ["Add", "Sub", "Mul"] {
            registry.register(
                OpDef::new(binary)
                    .input("x", TypeSpec::attr("T"))
                    .input("y", TypeSpec::attr("T"))
                    .output("z", TypeSpec::attr("T")),
            );
        }
        for unary in ["Neg", "ZerosLike"] {
            registry.register(
                OpDef::new(unary)
                    .input("x", TypeSpec::attr("T"))
                    .output("y", TypeSpec::attr("T")),
            );
        }
        registry.register(
            OpDef::new("AddN")
                .input("inputs", TypeSpec::repeated("N", "T"))
                .output("sum", TypeSpec::attr("T")),
        );
        registry.register(
            OpDef::new(GRADIENT_OP)
                .input("inputs", TypeSpec::list("Tin"))
                .output("outputs", TypeSpec::list("Tout")),
        );
        registry.register(
            OpDef::new(LIST_TO_ARRAY_OP)
                .input("input", TypeSpec::list("Tin"))
                .output("output", TypeSpec::repeated("N", "T")),
        );
        registry.register(
            OpDef::new(ARRAY_TO_LIST_OP)
                .input("input", TypeSpec::repeated("N", "T"))
                .output("output", TypeSpec::list("Tout")),
        );
        registry.register(
            OpDef::new("Variable")
                .ref_output("ref", TypeSpec::attr("dtype"))
                .stateful(),
        );
        registry.register(
            OpDef::new("Assign")
                .input("ref", TypeSpec::attr("T"))
                .input("value", TypeSpec::attr("T"))
                .ref_output("output_ref", TypeSpec::attr("T"))
                .stateful(),
        );
        for unary_flow in ["Enter", "Exit", "NextIteration"] {
            registry.register(
                OpDef::new(unary_flow)
                    .input("data", TypeSpec::attr("T"))
                    .output("output", TypeSpec::attr("T"))
                    .control_flow(),
            );
        }
        registry.register(
            OpDef::new("Switch")
                .input("data", TypeSpec::attr("T"))
                .input("pred", TypeSpec::Fixed(DataType::Bool))
                .output("output_false", TypeSpec::attr("T"))
                .output("output_true", TypeSpec::attr("T"))
                .control_flow(),
        );
        registry.register(
            OpDef::new("Merge")
                .input("inputs", TypeSpec::repeated("N", "T"))
                .output("output", TypeSpec::attr("T"))
                .control_flow(),
        );
        registry
    }

    pub fn register(&mut self, op: OpDef) {
        self.ops.insert(op.name.clone(), op);
    }

    pub fn lookup(&self, name: &str) -> Option<&OpDef> {
        self.ops.get(name)
    }
}

/// Builds the function definition of a primitive op's gradient, given the
/// forward op's attribute bindings.
pub type GradientRule = fn(&AttrMap) -> Result<FunctionDef>;

/// The context object threaded through instantiation, rewriting, gradient
/// synthesis, and kernel construction.
pub struct FunctionLibrary {
    ops: OpRegistry,
    functions: HashMap<String, FunctionDef>,
    gradients: HashMap<String, GradientRule>,
}

impl FunctionLibrary {
    pub fn new(ops: OpRegistry) -> Self {
        FunctionLibrary {
            ops,
            functions: HashMap::new(),
            gradients: HashMap::new(),
        }
    }

    pub fn op(&self, name: &str) -> Option<&OpDef> {
        self.ops.lookup(name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }

    pub fn add_function(&mut self, fdef: FunctionDef) -> Result<()> {
        if self.functions.contains_key(&fdef.name) {
            return Err(Error::invalid_argument(format!(
                "function {} is already defined",
                fdef.name
            )));
        }
        self.functions.insert(fdef.name.clone(), fdef);
        Ok(())
    }

    pub fn register_gradient(&mut self, op: impl Into<String>, rule: GradientRule) {
        self.gradients.insert(op.into(), rule);
    }

    pub fn gradient(&self, op: &str) -> Option<GradientRule> {
        self.gradients.get(op).copied()
    }

    /// Whether the named op (or function) is stateful.
    pub fn is_stateful(&self, name: &str) -> bool {
        self.ops.lookup(name).is_some_and(|op| op.is_stateful)
    }

    /// Resolves a node definition into a fully typed [`NodeInit`], consulting
    /// the op registry first and falling back to function signatures for
    /// call nodes.
    pub fn resolve_node(&self, ndef: &NodeDef) -> Result<NodeInit> {
        let mut init = NodeInit::new(ndef.name.clone(), ndef.op.clone());
        init.attrs = ndef.attrs.clone();
        if let Some(op) = self.ops.lookup(&ndef.op) {
            init.is_stateful = op.is_stateful;
            init.is_control_flow = op.is_control_flow;
            init.in_types = resolve_slots(&op.name, &op.inputs, &ndef.attrs)?;
            init.out_types = resolve_slots(&op.name, &op.outputs, &ndef.attrs)?;
            return Ok(init);
        }
        if let Some(fdef) = self.functions.get(&ndef.op) {
            init.in_types = fdef.resolve_arg_types(&ndef.attrs)?.into_iter().collect();
            init.out_types = fdef.resolve_ret_types(&ndef.attrs)?.into_iter().collect();
            return Ok(init);
        }
        Err(Error::not_found(format!(
            "op or function {} is not defined",
            ndef.op
        )))
    }

    /// Library with the default op set and the built-in gradient rules.
    pub fn with_defaults() -> Self {
        let mut lib = FunctionLibrary::new(OpRegistry::with_default_ops());
        for (op, rule) in crate::gradient::default_gradient_rules() {
            lib.register_gradient(op, rule);
        }
        lib
    }
}

impl Default for FunctionLibrary {
    fn default() -> Self {
        FunctionLibrary::with_defaults()
    }
}

/// Expands a slot list into concrete types using the node's attributes.
pub(crate) fn resolve_slots(
    op: &str,
    slots: &[SlotDef],
    attrs: &AttrMap,
) -> Result<SmallVec<[DataType; 4]>> {
    let mut types = SmallVec::new();
    for slot in slots {
        match &slot.ty {
            TypeSpec::Fixed(dt) => types.push(apply_ref(*dt, slot.is_ref)),
            TypeSpec::Attr(attr) => {
                let dt = require_attr(op, attrs, attr)?.as_type()?;
                types.push(apply_ref(dt, slot.is_ref));
            }
            TypeSpec::List(attr) => {
                for dt in require_attr(op, attrs, attr)?.as_type_list()? {
                    types.push(apply_ref(*dt, slot.is_ref));
                }
            }
            TypeSpec::Repeated {
                count_attr,
                type_attr,
            } => {
                let count = require_attr(op, attrs, count_attr)?.as_int()?;
                let dt = require_attr(op, attrs, type_attr)?.as_type()?;
                for _ in 0..count {
                    types.push(apply_ref(dt, slot.is_ref));
                }
            }
        }
    }
    Ok(types)
}

fn apply_ref(dt: DataType, is_ref: bool) -> DataType {
    if is_ref {
        dt.ref_type()
    } else {
        dt
    }
}

fn require_attr<'a>(op: &str, attrs: &'a AttrMap, name: &str) -> Result<&'a crate::types::AttrValue> {
    attrs
        .get(name)
        .ok_or_else(|| Error::invalid_argument(format!("op {op} is missing attr {name}")))
}
