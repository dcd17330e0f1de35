//! Structural identity of a compiled graph.

use std::fmt;

use anyhow::{anyhow, Result};

use crate::engine::Engine;
use crate::graph::Graph;

/// Digest of the engine's text serialization of the loss-less graph root.
/// Two graphs compiled from the same symbolic description share an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphIdentity([u8; 32]);

impl fmt::Display for GraphIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl<E: Engine> Graph<E> {
    /// The graph's identity digest, computed on first use and memoized.
    pub fn graph_identity(&self) -> Result<GraphIdentity> {
        self.identity
            .get_or_try_init(|| {
                let sym = self
                    .sym_last
                    .as_ref()
                    .ok_or_else(|| anyhow!("graph has no compiled root"))?;
                let text = self.engine.to_text(sym)?;
                Ok(GraphIdentity(*blake3::hash(text.as_bytes()).as_bytes()))
            })
            .copied()
    }
}
