//! Activation helpers and the standalone activation block.

use crate::nn::{next_symbol_id, BatchNorm, Block};
use crate::symbol::{ops, Symbol};

pub fn sigmoid(a: Symbol) -> Symbol {
    ops::activation(&a, ops::ActivationType::Sigmoid)
}

pub fn hard_sigmoid(a: Symbol) -> Symbol {
    ops::hard_sigmoid(&a)
}

pub fn tanh(a: Symbol) -> Symbol {
    ops::activation(&a, ops::ActivationType::Tanh)
}

/// Tanh rescaled into `[0, 1]`.
pub fn tanh25(a: Symbol) -> Symbol {
    ops::add(ops::mul(ops::activation(&a, ops::ActivationType::Tanh), 0.5f32), 0.5f32)
}

pub fn relu(a: Symbol) -> Symbol {
    ops::activation(&a, ops::ActivationType::Relu)
}

pub fn soft_relu(a: Symbol) -> Symbol {
    ops::activation(&a, ops::ActivationType::SoftRelu)
}

pub fn soft_sign(a: Symbol) -> Symbol {
    ops::activation(&a, ops::ActivationType::SoftSign)
}

pub fn softmax(a: Symbol) -> Symbol {
    ops::softmax_activation(&a, false)
}

pub fn channel_softmax(a: Symbol) -> Symbol {
    ops::softmax_activation(&a, true)
}

pub fn swish(a: Symbol) -> Symbol {
    ops::mul(ops::sigmoid(&a), &a)
}

pub fn sin(a: Symbol) -> Symbol {
    ops::sin(&a)
}

/// Applies an activation function (optionally after batch normalization) as
/// its own named layer.
#[derive(Default)]
pub struct Activation {
    pub function: Option<fn(Symbol) -> Symbol>,
    pub batch_norm: bool,
    pub name: Option<String>,
}

impl Block for Activation {
    fn combine(&self, input: Symbol) -> Symbol {
        let ns = match &self.name {
            Some(name) => format!("{name}$A"),
            None => format!("Activation{:02}", next_symbol_id()),
        };
        let mut out = input;
        if self.batch_norm {
            out = BatchNorm {
                name: self.name.clone(),
                ..Default::default()
            }
            .combine(out);
        }
        match self.function {
            Some(function) => function(out).with_name(ns),
            // Nothing was built; renaming the caller's shared input would be
            // wrong, so it passes through untouched.
            None if self.batch_norm => out.with_name(ns),
            None => out,
        }
    }
}
