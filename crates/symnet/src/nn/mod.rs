//! Declarative layer blocks producing symbol trees.
//!
//! A block turns the symbol feeding it into a larger expression. Blocks are
//! thin builders over the symbolic API; nothing here touches the engine.

mod activation;
mod batchnorm;
mod conv;
mod dense;
mod dropout;
mod init;
mod lambda;
mod loss;
mod output;
mod slice;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::symbol::{self, ops, Symbol};

pub use activation::{
    channel_softmax, hard_sigmoid, relu, sigmoid, sin, soft_relu, soft_sign, softmax, swish, tanh,
    tanh25, Activation,
};
pub use batchnorm::BatchNorm;
pub use conv::{AvgPool, Convolution, MaxPool};
pub use dense::{Flatten, FullyConnected};
pub use dropout::Dropout;
pub use init::{Const, Uniform, Xavier};
pub use lambda::Lambda;
pub use loss::{
    CrossEntropyLoss, L0Loss, L1Loss, L2Loss, LcosLoss, LossFn, SoftmaxCrossEntropyLoss,
};
pub use output::Output;
pub use slice::Slice;

/// One composable piece of a network description.
pub trait Block {
    fn combine(&self, input: Symbol) -> Symbol;
}

// Auto-naming shares one counter across every block built during a combine
// pass; the pass itself holds a process-wide lock because the counter resets
// at its start.
static COMBINE_LOCK: Lazy<Mutex<()>> = Lazy::new(Mutex::default);
static SYMBOL_ID: AtomicUsize = AtomicUsize::new(0);

/// Next auto-name ordinal for an anonymous layer.
pub fn next_symbol_id() -> usize {
    SYMBOL_ID.fetch_add(1, Ordering::Relaxed) + 1
}

/// Builds the full symbol tree of a network from its root block, feeding it
/// the input placeholder. Layer auto-naming restarts from 1 for every call.
pub fn combine(nn: &dyn Block) -> Symbol {
    let _guard = COMBINE_LOCK.lock().expect("combine lock poisoned");
    SYMBOL_ID.store(0, Ordering::Relaxed);
    nn.combine(symbol::input())
}

/// Applies blocks one after another.
pub struct Sequence {
    pub blocks: Vec<Box<dyn Block>>,
}

impl Sequence {
    pub fn new(blocks: Vec<Box<dyn Block>>) -> Self {
        Sequence { blocks }
    }
}

impl Block for Sequence {
    fn combine(&self, input: Symbol) -> Symbol {
        let mut s = input;
        for block in &self.blocks {
            s = block.combine(s);
        }
        s
    }
}

/// Feeds the same input to every block and concatenates the results.
pub struct Concat {
    pub blocks: Vec<Box<dyn Block>>,
}

impl Block for Concat {
    fn combine(&self, input: Symbol) -> Symbol {
        let branches: Vec<Symbol> = self
            .blocks
            .iter()
            .map(|b| b.combine(input.clone()))
            .collect();
        ops::concat(branches)
    }
}

/// Feeds the same input to every block and stacks the results along a new
/// axis: the leading one, or the trailing one with `trans` set.
pub struct Stack {
    pub blocks: Vec<Box<dyn Block>>,
    pub trans: bool,
}

impl Block for Stack {
    fn combine(&self, input: Symbol) -> Symbol {
        let branches: Vec<Symbol> = self
            .blocks
            .iter()
            .map(|b| b.combine(input.clone()))
            .collect();
        if self.trans {
            ops::stack1(branches)
        } else {
            ops::stack(branches)
        }
    }
}

/// Adds each block's output back onto its input.
pub struct Residual {
    pub blocks: Vec<Box<dyn Block>>,
}

impl Block for Residual {
    fn combine(&self, input: Symbol) -> Symbol {
        let mut a = input;
        for block in &self.blocks {
            let branch = block.combine(a.clone());
            a = ops::add(&a, &branch);
        }
        a
    }
}
