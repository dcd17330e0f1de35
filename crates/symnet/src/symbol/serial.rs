//! Symbolic-description document: an input dimension paired with a symbol
//! tree, round-tripped losslessly including attributes and declared
//! dimensions. Initializer callbacks are not serialized; a loaded network
//! restores its parameters from a parameter stream instead.

use std::io::{Read, Write};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

use crate::symbol::Symbol;
use crate::tensor::Dimension;

#[derive(Serialize, Deserialize)]
pub struct SymbolDoc {
    pub input: Dimension,
    pub symbolic: Symbol,
}

/// Writes the symbolic description of a network to `w`.
pub fn save_symbol<W: Write>(input: Dimension, symbolic: &Symbol, w: W) -> Result<()> {
    let doc = SymbolDoc {
        input,
        symbolic: symbolic.clone(),
    };
    serde_json::to_writer(w, &doc).context("failed to write symbol document")
}

/// Reads a symbolic description, returning the tree and its input dimension.
pub fn load_symbol<R: Read>(r: R) -> Result<(Symbol, Dimension)> {
    let doc: SymbolDoc = serde_json::from_reader(r).context("failed to read symbol document")?;
    Ok((doc.symbolic, doc.input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AttrKey;
    use crate::symbol::{ops, var, NodeOp};
    use crate::tensor::dim;

    #[test]
    fn symbol_document_round_trips() {
        let w = var("fc_weight").with_dim(dim([10, 4]));
        let net = ops::fully_connected(&ops::flatten(&crate::symbol::input()), &w, None, 10, true)
            .with_name("fc");

        let mut buf = Vec::new();
        save_symbol(dim([4]), &net, &mut buf).unwrap();
        let (loaded, input) = load_symbol(buf.as_slice()).unwrap();

        assert_eq!(input, dim([4]));
        assert_eq!(loaded.op(), net.op());
        assert_eq!(loaded.name(), Some("fc"));
        assert_eq!(
            loaded.node().attr.get(&AttrKey::NumHidden).unwrap(),
            net.node().attr.get(&AttrKey::NumHidden).unwrap()
        );
        let weight = &loaded.args()[1];
        assert_eq!(weight.op(), NodeOp::Var);
        assert_eq!(weight.declared_dim(), dim([10, 4]));
    }
}
