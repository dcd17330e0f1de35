//! Side-output block.

use crate::nn::{next_symbol_id, Block};
use crate::symbol::{self, ops, Symbol};

/// Collects the current expression (optionally a slice of it) as a named
/// side output while passing the expression through unchanged.
#[derive(Default)]
pub struct Output {
    pub name: Option<String>,
    pub round: usize,
    pub axis: usize,
    pub begin: i32,
    pub end: i32,
}

impl Block for Output {
    fn combine(&self, input: Symbol) -> Symbol {
        let mut name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("Output{}", next_symbol_id()));
        if self.round > 0 {
            name = format!("{name}$RNN{:02}", self.round);
        }
        let passthrough = input.clone();
        let collected = if self.begin != self.end {
            ops::slice(&input, self.axis, self.begin, self.end).with_name(name.clone())
        } else {
            input
        };
        let side = symbol::output(&collected, name);
        symbol::bound(vec![passthrough, side])
    }
}
