//! Operator builders over expression nodes.
//!
//! Binary helpers coerce plain numbers into scalar nodes and, when either
//! operand is a scalar, rewrite the operator into its `-by-scalar` variant
//! instead of emitting a full binary tensor operator. This keeps the engine
//! from broadcasting a scalar into a whole tensor; left/right asymmetry is
//! preserved for subtraction, division and power.

use std::collections::BTreeMap;

use crate::engine::{AttrKey, OpId};
use crate::symbol::{IntoSymbol, Node, NodeOp, Symbol};
use crate::tensor::Dimension;

fn prim(op: OpId, args: Vec<Symbol>) -> Symbol {
    let mut node = Node::leaf(NodeOp::Prim(op));
    node.args = args;
    Symbol::from_node(node)
}

fn prim_attr(op: OpId, args: Vec<Symbol>, attr: BTreeMap<AttrKey, String>) -> Symbol {
    let mut node = Node::leaf(NodeOp::Prim(op));
    node.args = args;
    node.attr = attr;
    Symbol::from_node(node)
}

fn attr1(key: AttrKey, value: impl ToString) -> BTreeMap<AttrKey, String> {
    let mut attr = BTreeMap::new();
    attr.insert(key, value.to_string());
    attr
}

pub(crate) fn generic_op2(
    op: OpId,
    op_scalar: OpId,
    op_scalar_r: OpId,
    lhs: impl IntoSymbol,
    rhs: impl IntoSymbol,
) -> Symbol {
    let l = lhs.into_symbol();
    let r = rhs.into_symbol();
    if l.is_scalar() {
        return prim_attr(
            op_scalar_r,
            vec![r],
            attr1(AttrKey::Scalar, l.scalar_value()),
        );
    }
    if r.is_scalar() {
        return prim_attr(op_scalar, vec![l], attr1(AttrKey::Scalar, r.scalar_value()));
    }
    prim(op, vec![l, r])
}

pub(crate) fn generic_op1(
    op: OpId,
    op_scalar: OpId,
    l: &Symbol,
    rhs: impl IntoSymbol,
) -> Symbol {
    let r = rhs.into_symbol();
    if r.is_scalar() {
        return prim_attr(
            op_scalar,
            vec![l.clone()],
            attr1(AttrKey::Scalar, r.scalar_value()),
        );
    }
    prim(op, vec![l.clone(), r])
}

pub fn add(lhs: impl IntoSymbol, rhs: impl IntoSymbol) -> Symbol {
    generic_op2(OpId::Add, OpId::AddScalar, OpId::AddScalar, lhs, rhs)
}

pub fn sub(lhs: impl IntoSymbol, rhs: impl IntoSymbol) -> Symbol {
    generic_op2(OpId::Sub, OpId::SubScalar, OpId::SubScalarR, lhs, rhs)
}

pub fn mul(lhs: impl IntoSymbol, rhs: impl IntoSymbol) -> Symbol {
    generic_op2(OpId::Mul, OpId::MulScalar, OpId::MulScalar, lhs, rhs)
}

pub fn div(lhs: impl IntoSymbol, rhs: impl IntoSymbol) -> Symbol {
    generic_op2(OpId::Div, OpId::DivScalar, OpId::DivScalarR, lhs, rhs)
}

pub fn pow(lhs: impl IntoSymbol, rhs: impl IntoSymbol) -> Symbol {
    generic_op2(OpId::Power, OpId::PowerScalar, OpId::PowerScalarR, lhs, rhs)
}

pub fn dot(lhs: impl IntoSymbol, rhs: impl IntoSymbol) -> Symbol {
    prim(OpId::Dot, vec![lhs.into_symbol(), rhs.into_symbol()])
}

pub fn le(a: &Symbol, rhs: impl IntoSymbol) -> Symbol {
    generic_op1(OpId::Le, OpId::LeScalar, a, rhs)
}

pub fn ge(a: &Symbol, rhs: impl IntoSymbol) -> Symbol {
    generic_op1(OpId::Ge, OpId::GeScalar, a, rhs)
}

pub fn eq(a: &Symbol, rhs: impl IntoSymbol) -> Symbol {
    generic_op1(OpId::Eq, OpId::EqScalar, a, rhs)
}

pub fn ne(a: &Symbol, rhs: impl IntoSymbol) -> Symbol {
    generic_op1(OpId::Ne, OpId::NeScalar, a, rhs)
}

pub fn lesser(a: &Symbol, rhs: impl IntoSymbol) -> Symbol {
    generic_op1(OpId::Lesser, OpId::LesserScalar, a, rhs)
}

pub fn greater(a: &Symbol, rhs: impl IntoSymbol) -> Symbol {
    generic_op1(OpId::Greater, OpId::GreaterScalar, a, rhs)
}

pub fn and(a: &Symbol, b: &Symbol) -> Symbol {
    prim(OpId::And, vec![a.clone(), b.clone()])
}

pub fn or(a: &Symbol, b: &Symbol) -> Symbol {
    prim(OpId::Or, vec![a.clone(), b.clone()])
}

pub fn xor(a: &Symbol, b: &Symbol) -> Symbol {
    prim(OpId::Xor, vec![a.clone(), b.clone()])
}

pub fn not(a: &Symbol) -> Symbol {
    prim(OpId::Not, vec![a.clone()])
}

pub fn bcast_add(a: &Symbol, b: &Symbol) -> Symbol {
    prim(OpId::BroadcastAdd, vec![a.clone(), b.clone()])
}

pub fn bcast_sub(a: &Symbol, b: &Symbol) -> Symbol {
    prim(OpId::BroadcastSub, vec![a.clone(), b.clone()])
}

pub fn bcast_mul(a: &Symbol, b: &Symbol) -> Symbol {
    prim(OpId::BroadcastMul, vec![a.clone(), b.clone()])
}

pub fn bcast_div(a: &Symbol, b: &Symbol) -> Symbol {
    prim(OpId::BroadcastDiv, vec![a.clone(), b.clone()])
}

pub fn log(a: &Symbol) -> Symbol {
    prim(OpId::Log, vec![a.clone()])
}

pub fn cosh(a: &Symbol) -> Symbol {
    prim(OpId::Cosh, vec![a.clone()])
}

pub fn log_cosh(a: &Symbol) -> Symbol {
    log(&cosh(a))
}

pub fn exp(a: &Symbol) -> Symbol {
    prim(OpId::Exp, vec![a.clone()])
}

pub fn sin(a: &Symbol) -> Symbol {
    prim(OpId::Sin, vec![a.clone()])
}

pub fn abs(a: &Symbol) -> Symbol {
    prim(OpId::Abs, vec![a.clone()])
}

pub fn square(a: &Symbol) -> Symbol {
    prim(OpId::Square, vec![a.clone()])
}

pub fn sqrt(a: &Symbol) -> Symbol {
    prim(OpId::Sqrt, vec![a.clone()])
}

pub fn sigmoid(a: &Symbol) -> Symbol {
    prim(OpId::Sigmoid, vec![a.clone()])
}

pub fn hard_sigmoid(a: &Symbol) -> Symbol {
    prim(OpId::HardSigmoid, vec![a.clone()])
}

pub fn tanh(a: &Symbol) -> Symbol {
    prim(OpId::Tanh, vec![a.clone()])
}

pub fn relu(a: &Symbol) -> Symbol {
    prim(OpId::Relu, vec![a.clone()])
}

/// Negation via the scalar multiply variant.
pub fn minus(a: &Symbol) -> Symbol {
    prim_attr(
        OpId::MulScalar,
        vec![a.clone()],
        attr1(AttrKey::Scalar, "-1"),
    )
}

/// Picks per-row elements of `a` selected by `label`, keeping dimensions.
pub fn pick(a: &Symbol, label: &Symbol) -> Symbol {
    prim_attr(
        OpId::Pick,
        vec![a.clone(), label.clone()],
        attr1(AttrKey::Keepdims, "1"),
    )
}

fn format_axis(axes: &[i32]) -> String {
    if axes.len() == 1 {
        return format!("{}", axes[0]);
    }
    let parts: Vec<String> = axes.iter().map(|a| format!("{a}")).collect();
    format!("({})", parts.join(","))
}

pub fn log_softmax(a: &Symbol, axis: Option<i32>) -> Symbol {
    let mut attr = BTreeMap::new();
    if let Some(axis) = axis {
        attr.insert(AttrKey::Axis, format!("{axis}"));
    }
    prim_attr(OpId::LogSoftmax, vec![a.clone()], attr)
}

pub fn softmax(a: &Symbol, axis: Option<i32>) -> Symbol {
    let mut attr = BTreeMap::new();
    if let Some(axis) = axis {
        attr.insert(AttrKey::Axis, format!("{axis}"));
    }
    prim_attr(OpId::Softmax, vec![a.clone()], attr)
}

pub fn softmax_activation(a: &Symbol, channel: bool) -> Symbol {
    let mut attr = BTreeMap::new();
    if channel {
        attr.insert(AttrKey::Mode, "channel".to_string());
    }
    prim_attr(OpId::SoftmaxActivation, vec![a.clone()], attr)
}

pub fn softmax_output(a: &Symbol, label: &Symbol, multi_output: bool) -> Symbol {
    let mut attr = BTreeMap::new();
    if multi_output {
        attr.insert(AttrKey::MultiOutput, "1".to_string());
    }
    prim_attr(OpId::SoftmaxOutput, vec![a.clone(), label.clone()], attr)
}

pub fn softmax_cross_entropy(a: &Symbol, label: &Symbol, axis: Option<i32>) -> Symbol {
    let mut attr = BTreeMap::new();
    if let Some(axis) = axis {
        attr.insert(AttrKey::Axis, format!("{axis}"));
    }
    prim_attr(OpId::SoftmaxCrossEntropy, vec![a.clone(), label.clone()], attr)
}

fn reduce(op: OpId, a: &Symbol, axes: &[i32], keepdims: bool, exclude: bool) -> Symbol {
    let mut attr = BTreeMap::new();
    if !axes.is_empty() {
        attr.insert(AttrKey::Axis, format_axis(axes));
    }
    if keepdims {
        attr.insert(AttrKey::Keepdims, "1".to_string());
    }
    if exclude {
        attr.insert(AttrKey::Exclude, "1".to_string());
    }
    prim_attr(op, vec![a.clone()], attr)
}

pub fn sum(a: &Symbol, axes: &[i32]) -> Symbol {
    reduce(OpId::Sum, a, axes, false, false)
}

pub fn sum_nan(a: &Symbol, axes: &[i32]) -> Symbol {
    reduce(OpId::SumNan, a, axes, false, false)
}

/// Sum over the last axis, keeping dimensions.
pub fn sum1(a: &Symbol) -> Symbol {
    reduce(OpId::Sum, a, &[-1], true, false)
}

/// Sum over every axis except the given ones.
pub fn sum_xl(a: &Symbol, axes: &[i32]) -> Symbol {
    reduce(OpId::Sum, a, axes, false, true)
}

pub fn mean(a: &Symbol, axes: &[i32]) -> Symbol {
    reduce(OpId::Mean, a, axes, false, false)
}

pub fn mean_kd(a: &Symbol, axes: &[i32]) -> Symbol {
    reduce(OpId::Mean, a, axes, true, false)
}

pub fn mean_xl(a: &Symbol, axes: &[i32]) -> Symbol {
    reduce(OpId::Mean, a, axes, false, true)
}

pub fn stack(args: Vec<Symbol>) -> Symbol {
    let attr = attr1(AttrKey::NumArgs, args.len());
    prim_attr(OpId::Stack, args, attr)
}

/// Stack along the trailing axis.
pub fn stack1(args: Vec<Symbol>) -> Symbol {
    let mut attr = attr1(AttrKey::NumArgs, args.len());
    attr.insert(AttrKey::Axis, "-1".to_string());
    prim_attr(OpId::Stack, args, attr)
}

pub fn concat(args: Vec<Symbol>) -> Symbol {
    let attr = attr1(AttrKey::NumArgs, args.len());
    prim_attr(OpId::Concat, args, attr)
}

#[allow(clippy::too_many_arguments)]
pub fn batch_norm(
    a: &Symbol,
    gamma: &Symbol,
    beta: &Symbol,
    rmean: &Symbol,
    rvar: &Symbol,
    momentum: f32,
    epsilon: f32,
    use_global_stats: bool,
    axis: Option<i32>,
) -> Symbol {
    let mut attr = BTreeMap::new();
    if let Some(axis) = axis {
        attr.insert(AttrKey::Axis, format!("{axis}"));
    }
    if momentum != 0.0 {
        attr.insert(AttrKey::Momentum, format!("{momentum}"));
    }
    if epsilon != 0.0 {
        attr.insert(AttrKey::Eps, format!("{epsilon}"));
    }
    if use_global_stats {
        attr.insert(AttrKey::GlobalStats, "1".to_string());
    }
    prim_attr(
        OpId::BatchNorm,
        vec![
            a.clone(),
            gamma.clone(),
            beta.clone(),
            rmean.clone(),
            rvar.clone(),
        ],
        attr,
    )
}

fn window_attr(attr: &mut BTreeMap<AttrKey, String>, key: AttrKey, d: Dimension) {
    if d.rank() > 1 {
        attr.insert(key, d.to_string());
    } else if d.rank() == 1 {
        attr.insert(key, format!("{}", d.at(0)));
    }
}

#[allow(clippy::too_many_arguments)]
pub fn conv(
    a: &Symbol,
    weight: &Symbol,
    bias: Option<&Symbol>,
    channels: usize,
    kernel: Dimension,
    stride: Dimension,
    padding: Dimension,
    groups: bool,
    layout: &str,
) -> Symbol {
    let mut args = vec![a.clone(), weight.clone()];
    let mut attr = attr1(AttrKey::NumFilter, channels);
    match bias {
        Some(bias) => args.push(bias.clone()),
        None => {
            attr.insert(AttrKey::NoBias, "1".to_string());
        }
    }
    if groups {
        attr.insert(AttrKey::NumGroup, "2".to_string());
    }
    window_attr(&mut attr, AttrKey::Kernel, kernel);
    window_attr(&mut attr, AttrKey::Stride, stride);
    window_attr(&mut attr, AttrKey::Pad, padding);
    if !layout.is_empty() {
        attr.insert(AttrKey::Layout, layout.to_string());
    }
    prim_attr(OpId::Convolution, args, attr)
}

/// Activation kinds routed through the engine's generic activation operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationType {
    #[default]
    Relu,
    SoftRelu,
    SoftSign,
    Sigmoid,
    Tanh,
}

impl ActivationType {
    fn as_str(self) -> &'static str {
        match self {
            ActivationType::Relu => "relu",
            ActivationType::SoftRelu => "softrelu",
            ActivationType::SoftSign => "softsign",
            ActivationType::Sigmoid => "sigmoid",
            ActivationType::Tanh => "tanh",
        }
    }
}

pub fn activation(a: &Symbol, act_type: ActivationType) -> Symbol {
    prim_attr(
        OpId::Activation,
        vec![a.clone()],
        attr1(AttrKey::ActType, act_type.as_str()),
    )
}

pub fn pool(
    a: &Symbol,
    kernel: Dimension,
    stride: Dimension,
    padding: Dimension,
    ceil: bool,
    maxpool: bool,
) -> Symbol {
    let mut attr = BTreeMap::new();
    window_attr(&mut attr, AttrKey::Kernel, kernel);
    window_attr(&mut attr, AttrKey::Stride, stride);
    window_attr(&mut attr, AttrKey::Pad, padding);
    attr.insert(
        AttrKey::PoolType,
        if maxpool { "max" } else { "avg" }.to_string(),
    );
    attr.insert(
        AttrKey::PoolConvention,
        if ceil { "full" } else { "valid" }.to_string(),
    );
    prim_attr(OpId::Pooling, vec![a.clone()], attr)
}

pub fn fully_connected(
    a: &Symbol,
    weight: &Symbol,
    bias: Option<&Symbol>,
    size: usize,
    flatten: bool,
) -> Symbol {
    let mut args = vec![a.clone(), weight.clone()];
    let mut attr = BTreeMap::new();
    match bias {
        Some(bias) => args.push(bias.clone()),
        None => {
            attr.insert(AttrKey::NoBias, "1".to_string());
        }
    }
    if flatten {
        attr.insert(AttrKey::Flatten, "1".to_string());
    }
    attr.insert(AttrKey::NumHidden, format!("{size}"));
    prim_attr(OpId::FullyConnected, args, attr)
}

pub fn flatten(a: &Symbol) -> Symbol {
    prim(OpId::Flatten, vec![a.clone()])
}

pub fn transpose(a: &Symbol, axes: &[i32]) -> Symbol {
    let parts: Vec<String> = axes.iter().map(|a| format!("{a}")).collect();
    prim_attr(
        OpId::Transpose,
        vec![a.clone()],
        attr1(AttrKey::Axes, format!("({})", parts.join(","))),
    )
}

/// Slices `[begin, end)` along one axis, leaving other axes whole.
pub fn slice(a: &Symbol, axis: usize, begin: i32, end: i32) -> Symbol {
    let prefix = "None,".repeat(axis);
    let mut attr = BTreeMap::new();
    attr.insert(AttrKey::Begin, format!("({prefix}{begin})"));
    attr.insert(AttrKey::End, format!("({prefix}{end})"));
    prim_attr(OpId::Slice, vec![a.clone()], attr)
}

/// Selects a single channel along axis 1.
pub fn channel(a: &Symbol, ch: i32) -> Symbol {
    let mut attr = BTreeMap::new();
    attr.insert(AttrKey::Begin, format!("(None,{ch})"));
    attr.insert(AttrKey::End, format!("(None,{})", ch + 1));
    prim_attr(OpId::Slice, vec![a.clone()], attr)
}

pub fn swap_axes(a: &Symbol, x: usize, y: usize) -> Symbol {
    let mut attr = BTreeMap::new();
    attr.insert(AttrKey::Dim1, format!("{x}"));
    attr.insert(AttrKey::Dim2, format!("{y}"));
    prim_attr(OpId::SwapAxis, vec![a.clone()], attr)
}

/// Zero-filled generator. The declared dimension may carry placeholders and
/// is resolved against the network input dimension at compile time.
pub fn zeros(d: Dimension) -> Symbol {
    let mut node = Node::leaf(NodeOp::Prim(OpId::Zeros));
    node.dim = d;
    Symbol::from_node(node)
}

/// One-filled generator, shape resolved like [`zeros`].
pub fn ones(d: Dimension) -> Symbol {
    let mut node = Node::leaf(NodeOp::Prim(OpId::Ones));
    node.dim = d;
    Symbol::from_node(node)
}

/// Normally-distributed generator, shape resolved like [`zeros`].
pub fn normal(loc: f32, scale: f32, d: Dimension) -> Symbol {
    let mut node = Node::leaf(NodeOp::Prim(OpId::RandomNormal));
    node.dim = d;
    node.attr.insert(AttrKey::Loc, format!("{loc}"));
    node.attr.insert(AttrKey::Scale, format!("{scale}"));
    Symbol::from_node(node)
}

pub fn zeros_like(a: &Symbol) -> Symbol {
    prim(OpId::ZerosLike, vec![a.clone()])
}

pub fn ones_like(a: &Symbol) -> Symbol {
    prim(OpId::OnesLike, vec![a.clone()])
}

/// Reshape with a declared dimension, resolved against the input dimension
/// at compile time.
pub fn reshape(a: &Symbol, d: Dimension) -> Symbol {
    let mut node = Node::leaf(NodeOp::Prim(OpId::Reshape));
    node.dim = d;
    node.args = vec![a.clone()];
    Symbol::from_node(node)
}

pub fn reshape_like(a: &Symbol, b: &Symbol) -> Symbol {
    prim(OpId::ReshapeLike, vec![a.clone(), b.clone()])
}

pub fn dropout(a: &Symbol, rate: f32) -> Symbol {
    prim_attr(OpId::Dropout, vec![a.clone()], attr1(AttrKey::P, rate))
}

/// Marks the expression as a loss head for gradient computation.
pub fn make_loss(a: &Symbol) -> Symbol {
    prim(OpId::MakeLoss, vec![a.clone()])
}

/// Stops gradients from flowing through `a`.
pub fn block_grad(a: &Symbol) -> Symbol {
    prim(OpId::BlockGrad, vec![a.clone()])
}

/// Generator operators whose shape attribute is resolved against the input
/// dimension during compilation.
pub(crate) fn is_generator(op: OpId) -> bool {
    matches!(
        op,
        OpId::Zeros | OpId::Ones | OpId::RandomUniform | OpId::RandomNormal | OpId::Reshape
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::var;
    use crate::tensor::dim;

    #[test]
    fn scalar_operand_rewrites_to_scalar_variant() {
        let x = var("x");
        let s = add(&x, 2.0f32);
        assert_eq!(s.op(), NodeOp::Prim(OpId::AddScalar));
        assert_eq!(s.args().len(), 1);
        assert_eq!(s.node().attr.get(&AttrKey::Scalar).unwrap(), "2");
    }

    #[test]
    fn scalar_asymmetry_is_preserved() {
        let x = var("x");
        // x - 2 uses the plain scalar variant, 2 - x the reversed one.
        assert_eq!(sub(&x, 2.0f32).op(), NodeOp::Prim(OpId::SubScalar));
        assert_eq!(sub(2.0f32, &x).op(), NodeOp::Prim(OpId::SubScalarR));
        assert_eq!(div(&x, 2.0f32).op(), NodeOp::Prim(OpId::DivScalar));
        assert_eq!(div(2.0f32, &x).op(), NodeOp::Prim(OpId::DivScalarR));
    }

    #[test]
    fn tensor_operands_emit_full_binary_op() {
        let x = var("x");
        let y = var("y");
        let s = add(&x, &y);
        assert_eq!(s.op(), NodeOp::Prim(OpId::Add));
        assert_eq!(s.args().len(), 2);
    }

    #[test]
    fn slice_builds_none_prefixed_ranges() {
        let x = var("x");
        let s = slice(&x, 1, 2, 5);
        assert_eq!(s.node().attr.get(&AttrKey::Begin).unwrap(), "(None,2)");
        assert_eq!(s.node().attr.get(&AttrKey::End).unwrap(), "(None,5)");
    }

    #[test]
    fn reduce_axis_formatting() {
        let x = var("x");
        let s = sum(&x, &[-1]);
        assert_eq!(s.node().attr.get(&AttrKey::Axis).unwrap(), "-1");
        let m = mean(&x, &[0, 1]);
        assert_eq!(m.node().attr.get(&AttrKey::Axis).unwrap(), "(0,1)");
    }

    #[test]
    fn generators_carry_declared_dims() {
        let z = zeros(dim([0, 10]));
        assert!(is_generator(OpId::Zeros));
        assert_eq!(z.declared_dim(), dim([0, 10]));
    }
}
