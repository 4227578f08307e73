//! Reverse-mode gradient synthesis.

mod backprop;

use smallvec::SmallVec;

use crate::body::FunctionBody;
use crate::error::Result;
use crate::graph::{Endpoint, NodeDef};
use crate::instantiate::FunctionDef;
use crate::library::{GradientRule, TypeSpec};
use crate::types::{AttrMap, AttrValue};

/// Builds the function body computing the reverse-mode gradient of `f`.
///
/// The result takes `f`'s arguments followed by one gradient seed per return
/// value (same type as the corresponding return), and yields one gradient per
/// original argument, replacing `f`'s returns entirely.
pub fn symbolic_gradient(f: &FunctionBody) -> Result<FunctionBody> {
    // The arena clone keeps node ids stable, so f's node indices remain valid
    // in the copy.
    let mut graph = f.graph.clone();
    let mut arg_types = f.arg_types.clone();
    let mut arg_nodes = f.arg_nodes.clone();

    // One seed argument per return value, appended after f's own arguments.
    let mut y_grads = Vec::with_capacity(f.ret_nodes.len());
    for &ret in &f.ret_nodes {
        let dtype = graph.node(ret).input_type(0);
        let index = arg_nodes.len();
        let seed = graph.add_arg(dtype, index);
        arg_types.push(dtype);
        arg_nodes.push(seed);
        y_grads.push(Endpoint::new(seed, 0));
    }

    let x_endpoints: Vec<Endpoint> = f
        .arg_nodes
        .iter()
        .map(|&arg| Endpoint::new(arg, 0))
        .collect();
    let x_grads = backprop::add_symbolic_gradients(&mut graph, &f.ret_nodes, &x_endpoints, &y_grads)?;

    for &ret in &f.ret_nodes {
        graph.remove_node(ret);
    }

    let ret_types = f.arg_types.clone();
    let mut ret_nodes = SmallVec::new();
    for (index, grad) in x_grads.iter().enumerate() {
        ret_nodes.push(graph.add_ret(*grad, index));
    }

    Ok(FunctionBody {
        fdef: f.fdef.clone(),
        graph,
        arg_types,
        ret_types,
        arg_nodes,
        ret_nodes,
    })
}

/// Gradient rules for the built-in primitive ops. Each rule yields a small
/// function whose arguments are the forward op's inputs followed by the
/// output gradients, and whose returns are the input gradients.
pub fn default_gradient_rules() -> Vec<(&'static str, GradientRule)> {
    vec![
        ("Identity", identity_grad as GradientRule),
        ("Add", add_grad as GradientRule),
        ("Sub", sub_grad as GradientRule),
        ("Mul", mul_grad as GradientRule),
        ("Neg", neg_grad as GradientRule),
    ]
}

fn identity_grad(_attrs: &AttrMap) -> Result<FunctionDef> {
    Ok(FunctionDef::new("IdentityGrad")
        .attr("T")
        .arg("x", TypeSpec::attr("T"))
        .arg("dy", TypeSpec::attr("T"))
        .ret("dx", TypeSpec::attr("T"), "dy"))
}

fn add_grad(_attrs: &AttrMap) -> Result<FunctionDef> {
    Ok(FunctionDef::new("AddGrad")
        .attr("T")
        .arg("x", TypeSpec::attr("T"))
        .arg("y", TypeSpec::attr("T"))
        .arg("dz", TypeSpec::attr("T"))
        .ret("dx", TypeSpec::attr("T"), "dz")
        .ret("dy", TypeSpec::attr("T"), "dz"))
}

fn sub_grad(_attrs: &AttrMap) -> Result<FunctionDef> {
    Ok(FunctionDef::new("SubGrad")
        .attr("T")
        .arg("x", TypeSpec::attr("T"))
        .arg("y", TypeSpec::attr("T"))
        .arg("dz", TypeSpec::attr("T"))
        .node(
            NodeDef::new("neg_dz", "Neg")
                .attr("T", AttrValue::Placeholder("T".to_string()))
                .input("dz"),
        )
        .ret("dx", TypeSpec::attr("T"), "dz")
        .ret("dy", TypeSpec::attr("T"), "neg_dz"))
}

fn mul_grad(_attrs: &AttrMap) -> Result<FunctionDef> {
    Ok(FunctionDef::new("MulGrad")
        .attr("T")
        .arg("x", TypeSpec::attr("T"))
        .arg("y", TypeSpec::attr("T"))
        .arg("dz", TypeSpec::attr("T"))
        .node(
            NodeDef::new("gx", "Mul")
                .attr("T", AttrValue::Placeholder("T".to_string()))
                .input("dz")
                .input("y"),
        )
        .node(
            NodeDef::new("gy", "Mul")
                .attr("T", AttrValue::Placeholder("T".to_string()))
                .input("dz")
                .input("x"),
        )
        .ret("dx", TypeSpec::attr("T"), "gx")
        .ret("dy", TypeSpec::attr("T"), "gy"))
}

fn neg_grad(_attrs: &AttrMap) -> Result<FunctionDef> {
    Ok(FunctionDef::new("NegGrad")
        .attr("T")
        .arg("x", TypeSpec::attr("T"))
        .arg("dy", TypeSpec::attr("T"))
        .node(
            NodeDef::new("dx_value", "Neg")
                .attr("T", AttrValue::Placeholder("T".to_string()))
                .input("dy"),
        )
        .ret("dx", TypeSpec::attr("T"), "dx_value"))
}
