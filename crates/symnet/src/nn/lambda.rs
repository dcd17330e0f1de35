//! Escape hatch for custom symbolic expressions inside a block pipeline.

use crate::nn::Block;
use crate::symbol::Symbol;

/// Wraps an arbitrary symbol transformation as a block.
pub struct Lambda {
    pub f: fn(Symbol) -> Symbol,
}

impl Block for Lambda {
    fn combine(&self, input: Symbol) -> Symbol {
        (self.f)(input)
    }
}
