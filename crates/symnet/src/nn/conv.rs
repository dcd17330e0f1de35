//! Convolution and pooling layers.

use std::sync::Arc;

use crate::nn::{next_symbol_id, BatchNorm, Block, Uniform};
use crate::symbol::{ops, var, Symbol};
use crate::tensor::{dim, Dimension, Initializer};

/// Convolution layer. Parameters are named `<name>_weight` and `<name>_bias`;
/// recurrent rounds share them under a round-suffixed layer name.
#[derive(Default)]
pub struct Convolution {
    pub channels: usize,
    pub kernel: Dimension,
    pub stride: Dimension,
    pub padding: Dimension,
    pub activation: Option<fn(Symbol) -> Symbol>,
    pub weight_init: Option<Arc<dyn Initializer>>,
    /// Bias initializer; a small uniform fill when unset.
    pub bias_init: Option<Arc<dyn Initializer>>,
    pub no_bias: bool,
    pub groups: bool,
    pub batch_norm: bool,
    pub layout: String,
    pub name: Option<String>,
    pub round: usize,
    pub turn_off: bool,
    pub output: bool,
    pub dropout: f32,
}

impl Block for Convolution {
    fn combine(&self, input: Symbol) -> Symbol {
        if self.turn_off {
            return input;
        }
        let mut ns = self
            .name
            .clone()
            .unwrap_or_else(|| format!("Conv{:02}", next_symbol_id()));
        let weight = var(format!("{ns}_weight")).maybe_init(self.weight_init.clone());
        let bias = if self.no_bias {
            None
        } else {
            let init = self
                .bias_init
                .clone()
                .unwrap_or_else(|| Arc::new(Uniform { magnitude: 0.01 }));
            Some(var(format!("{ns}_bias")).with_init(init))
        };
        let kernel = if self.kernel.empty() {
            dim([1, 1])
        } else {
            self.kernel
        };

        if self.round != 0 {
            ns = format!("{ns}$RNN{:02}", self.round);
        }
        let mut out = ops::conv(
            &input,
            &weight,
            bias.as_ref(),
            self.channels,
            kernel,
            self.stride,
            self.padding,
            self.groups,
            &self.layout,
        )
        .with_name(&ns);
        if self.batch_norm && self.round == 0 {
            out = BatchNorm {
                name: Some(ns.clone()),
                ..Default::default()
            }
            .combine(out);
        }
        if let Some(activation) = self.activation {
            out = activation(out).with_name(format!("{ns}$A"));
        }
        if self.dropout > 0.01 {
            out = ops::dropout(&out, self.dropout).with_name(format!("{ns}$D"));
        }
        out.with_output(self.output)
    }
}

/// Max pooling layer.
#[derive(Default)]
pub struct MaxPool {
    pub kernel: Dimension,
    pub stride: Dimension,
    pub padding: Dimension,
    pub ceil: bool,
    pub name: Option<String>,
    pub round: usize,
    pub batch_norm: bool,
}

impl Block for MaxPool {
    fn combine(&self, input: Symbol) -> Symbol {
        pool_block(
            input,
            self.kernel,
            self.stride,
            self.padding,
            self.ceil,
            true,
            &self.name,
            self.round,
            self.batch_norm,
            "MaxPool",
        )
    }
}

/// Average pooling layer.
#[derive(Default)]
pub struct AvgPool {
    pub kernel: Dimension,
    pub stride: Dimension,
    pub padding: Dimension,
    pub ceil: bool,
    pub name: Option<String>,
    pub round: usize,
    pub batch_norm: bool,
}

impl Block for AvgPool {
    fn combine(&self, input: Symbol) -> Symbol {
        pool_block(
            input,
            self.kernel,
            self.stride,
            self.padding,
            self.ceil,
            false,
            &self.name,
            self.round,
            self.batch_norm,
            "AvgPool",
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn pool_block(
    input: Symbol,
    kernel: Dimension,
    stride: Dimension,
    padding: Dimension,
    ceil: bool,
    maxpool: bool,
    name: &Option<String>,
    round: usize,
    batch_norm: bool,
    prefix: &str,
) -> Symbol {
    let mut ns = name
        .clone()
        .unwrap_or_else(|| format!("{prefix}{:02}", next_symbol_id()));
    if round != 0 {
        ns = format!("{ns}$RNN{round:02}");
    }
    let mut out = ops::pool(&input, kernel, stride, padding, ceil, maxpool).with_name(&ns);
    if batch_norm && round == 0 {
        out = BatchNorm {
            name: Some(ns),
            ..Default::default()
        }
        .combine(out);
    }
    out
}
