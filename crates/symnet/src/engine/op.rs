//! Registered primitive operator identifiers.
//!
//! Every identifier names an operator the engine is expected to provide. The
//! set mirrors what the layer blocks and symbol builders emit; engines reject
//! anything they do not implement.

use serde::{Deserialize, Serialize};

/// Identifier of a primitive engine operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OpId {
    Add,
    AddScalar,
    Sub,
    SubScalar,
    SubScalarR,
    Mul,
    MulScalar,
    Div,
    DivScalar,
    DivScalarR,
    Power,
    PowerScalar,
    PowerScalarR,
    Dot,
    Le,
    LeScalar,
    Ge,
    GeScalar,
    Eq,
    EqScalar,
    Ne,
    NeScalar,
    Lesser,
    LesserScalar,
    Greater,
    GreaterScalar,
    And,
    Or,
    Xor,
    Not,
    BroadcastAdd,
    BroadcastSub,
    BroadcastMul,
    BroadcastDiv,
    Log,
    Exp,
    Cosh,
    Sin,
    Abs,
    Square,
    Sqrt,
    Sigmoid,
    HardSigmoid,
    Tanh,
    Relu,
    Activation,
    Softmax,
    LogSoftmax,
    SoftmaxActivation,
    SoftmaxOutput,
    SoftmaxCrossEntropy,
    Pick,
    Sum,
    SumNan,
    Mean,
    Stack,
    Concat,
    BatchNorm,
    Convolution,
    Pooling,
    FullyConnected,
    Flatten,
    Transpose,
    SwapAxis,
    Slice,
    Reshape,
    ReshapeLike,
    Zeros,
    ZerosLike,
    Ones,
    OnesLike,
    RandomUniform,
    RandomNormal,
    Dropout,
    MakeLoss,
    BlockGrad,
}

impl OpId {
    /// The registered operator name on the engine side.
    pub fn name(self) -> &'static str {
        match self {
            OpId::Add => "add",
            OpId::AddScalar => "add_scalar",
            OpId::Sub => "sub",
            OpId::SubScalar => "sub_scalar",
            OpId::SubScalarR => "sub_scalar_r",
            OpId::Mul => "mul",
            OpId::MulScalar => "mul_scalar",
            OpId::Div => "div",
            OpId::DivScalar => "div_scalar",
            OpId::DivScalarR => "div_scalar_r",
            OpId::Power => "power",
            OpId::PowerScalar => "power_scalar",
            OpId::PowerScalarR => "power_scalar_r",
            OpId::Dot => "dot",
            OpId::Le => "le",
            OpId::LeScalar => "le_scalar",
            OpId::Ge => "ge",
            OpId::GeScalar => "ge_scalar",
            OpId::Eq => "eq",
            OpId::EqScalar => "eq_scalar",
            OpId::Ne => "ne",
            OpId::NeScalar => "ne_scalar",
            OpId::Lesser => "lesser",
            OpId::LesserScalar => "lesser_scalar",
            OpId::Greater => "greater",
            OpId::GreaterScalar => "greater_scalar",
            OpId::And => "logical_and",
            OpId::Or => "logical_or",
            OpId::Xor => "logical_xor",
            OpId::Not => "logical_not",
            OpId::BroadcastAdd => "broadcast_add",
            OpId::BroadcastSub => "broadcast_sub",
            OpId::BroadcastMul => "broadcast_mul",
            OpId::BroadcastDiv => "broadcast_div",
            OpId::Log => "log",
            OpId::Exp => "exp",
            OpId::Cosh => "cosh",
            OpId::Sin => "sin",
            OpId::Abs => "abs",
            OpId::Square => "square",
            OpId::Sqrt => "sqrt",
            OpId::Sigmoid => "sigmoid",
            OpId::HardSigmoid => "hard_sigmoid",
            OpId::Tanh => "tanh",
            OpId::Relu => "relu",
            OpId::Activation => "activation",
            OpId::Softmax => "softmax",
            OpId::LogSoftmax => "log_softmax",
            OpId::SoftmaxActivation => "softmax_activation",
            OpId::SoftmaxOutput => "softmax_output",
            OpId::SoftmaxCrossEntropy => "softmax_cross_entropy",
            OpId::Pick => "pick",
            OpId::Sum => "sum",
            OpId::SumNan => "nansum",
            OpId::Mean => "mean",
            OpId::Stack => "stack",
            OpId::Concat => "concat",
            OpId::BatchNorm => "batch_norm",
            OpId::Convolution => "convolution",
            OpId::Pooling => "pooling",
            OpId::FullyConnected => "fully_connected",
            OpId::Flatten => "flatten",
            OpId::Transpose => "transpose",
            OpId::SwapAxis => "swap_axis",
            OpId::Slice => "slice",
            OpId::Reshape => "reshape",
            OpId::ReshapeLike => "reshape_like",
            OpId::Zeros => "zeros",
            OpId::ZerosLike => "zeros_like",
            OpId::Ones => "ones",
            OpId::OnesLike => "ones_like",
            OpId::RandomUniform => "random_uniform",
            OpId::RandomNormal => "random_normal",
            OpId::Dropout => "dropout",
            OpId::MakeLoss => "make_loss",
            OpId::BlockGrad => "block_grad",
        }
    }
}
