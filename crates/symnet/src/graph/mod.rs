//! The graph compiler and the compiled, bound graph.
//!
//! [`Graph::compose`] walks a [`Symbol`] tree, deduplicates nodes by
//! identity, resolves shape-dependent generators against the network input
//! dimension, emits the engine's operator graph, requests shape inference,
//! allocates parameter/gradient/auxiliary storage and binds an executor.
//! Construction is all-or-nothing: any engine failure aborts it and the
//! partially-built graph is released on drop.

mod compose;
mod identity;
mod init;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{anyhow, ensure, Result};
use tracing::debug;

use crate::engine::{Context, Engine, NameKind, ShapeRequest};
use crate::symbol::Symbol;
use crate::tensor::{Dimension, Dtype, Initializer, TensorArray};

pub use identity::GraphIdentity;
pub use init::CustomInit;

/// Produces the loss expression for a network's primary output.
pub trait Loss {
    fn loss(&self, out: &Symbol) -> Symbol;
}

/// A compiled and bound computation graph, owning every native resource it
/// created: the executor, the two root symbol handles, one tensor per
/// parameter and gradient, and auxiliary state bound without gradients.
pub struct Graph<E: Engine> {
    pub(crate) engine: Arc<E>,
    pub(crate) ctx: Context,
    pub(crate) dtype: Dtype,
    pub(crate) input_dim: Dimension,

    pub(crate) params: BTreeMap<String, TensorArray<E>>,
    pub(crate) grads: BTreeMap<String, TensorArray<E>>,
    pub(crate) shapes: BTreeMap<String, Dimension>,
    pub(crate) autograd: BTreeSet<String>,
    pub(crate) initializers: BTreeMap<String, Arc<dyn Initializer>>,
    pub(crate) outputs: BTreeMap<String, TensorArray<E>>,

    pub(crate) exec: Option<E::ExecutorHandle>,
    pub(crate) sym_out: Option<E::SymbolHandle>,
    pub(crate) sym_last: Option<E::SymbolHandle>,
    pub(crate) has_loss: bool,
    pub(crate) initialized: bool,
    pub(crate) identity: once_cell::sync::OnceCell<GraphIdentity>,
}

impl<E: Engine> std::fmt::Debug for Graph<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("ctx", &self.ctx)
            .field("dtype", &self.dtype)
            .field("input_dim", &self.input_dim)
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .field("has_loss", &self.has_loss)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl<E: Engine> Graph<E> {
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn ctx(&self) -> Context {
        self.ctx
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// The batch-extended input dimension the graph was compiled for.
    pub fn input_dim(&self) -> Dimension {
        self.input_dim
    }

    /// Parameter tensors by name, including `_input` and internal state.
    pub fn params(&self) -> &BTreeMap<String, TensorArray<E>> {
        &self.params
    }

    /// Gradient tensors, present only for trainable names on a loss-bearing
    /// graph.
    pub fn grads(&self) -> &BTreeMap<String, TensorArray<E>> {
        &self.grads
    }

    pub fn param(&self, name: &str) -> Option<&TensorArray<E>> {
        self.params.get(name)
    }

    /// Whether `name` was registered as a trainable parameter.
    pub fn is_trainable(&self, name: &str) -> bool {
        self.autograd.contains(name)
    }

    /// Named executor outputs, including the canonical `_output` and, on a
    /// loss-bearing graph, `_loss`.
    pub fn outputs(&self) -> &BTreeMap<String, TensorArray<E>> {
        &self.outputs
    }

    /// The network input tensor.
    pub fn input(&self) -> &TensorArray<E> {
        self.params.get("_input").expect("graph is not bound")
    }

    /// The loss label tensor, present when a loss declared one.
    pub fn label(&self) -> Option<&TensorArray<E>> {
        self.params.get("_label")
    }

    /// The primary output tensor.
    pub fn output(&self) -> &TensorArray<E> {
        self.outputs.get("_output").expect("graph is not bound")
    }

    /// The loss output tensor, absent when the graph was compiled without a
    /// loss.
    pub fn loss(&self) -> Option<&TensorArray<E>> {
        if self.has_loss {
            self.outputs.get("_loss")
        } else {
            None
        }
    }

    pub fn has_loss(&self) -> bool {
        self.has_loss
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    /// Runs a forward pass. The graph must have been initialized (or loaded)
    /// first; the call blocks until the engine completes.
    pub fn forward(&self, train: bool) -> Result<()> {
        ensure!(self.initialized, "network is not initialized");
        let exec = self.exec.as_ref().ok_or_else(|| anyhow!("graph is not bound"))?;
        self.engine.forward(exec, train)?;
        Ok(())
    }

    /// Runs a backward pass over the most recent training forward.
    pub fn backward(&self) -> Result<()> {
        let exec = self.exec.as_ref().ok_or_else(|| anyhow!("graph is not bound"))?;
        self.engine.backward(exec)?;
        Ok(())
    }

    /// Infers shapes for arguments plus the requested heads, seeded with the
    /// input dimension and every declared shape, then allocates missing
    /// parameter and gradient storage and binds the executor.
    pub(crate) fn bind(&mut self) -> Result<()> {
        let sym_out = self
            .sym_out
            .clone()
            .ok_or_else(|| anyhow!("graph has no compiled root"))?;

        let names = self.engine.list_names(&sym_out, NameKind::Arguments)?;
        let mut known: Vec<(String, Vec<usize>)> =
            vec![("_input".to_string(), self.input_dim.slice_usize())];
        for name in &names {
            if let Some(shape) = self.shapes.get(name) {
                if !shape.empty() {
                    known.push((name.clone(), shape.slice_usize()));
                }
            }
        }
        let inferred = self.engine.infer_shapes(
            &sym_out,
            &known,
            ShapeRequest {
                arguments: true,
                outputs: false,
                aux_states: true,
            },
        )?;
        self.allocate(&inferred)?;

        let mut args = Vec::with_capacity(names.len());
        let mut grads = Vec::with_capacity(names.len());
        for name in &names {
            let (handle, dim) = {
                let p = self
                    .params
                    .get(name)
                    .ok_or_else(|| anyhow!("no shape for argument '{name}' after inference"))?;
                (p.handle().clone(), p.dim())
            };
            args.push(Some(handle));
            if self.has_loss && self.autograd.contains(name) {
                let grad = TensorArray::new(&self.engine, self.ctx, self.dtype, dim)?;
                grads.push(Some(grad.handle().clone()));
                self.grads.insert(name.clone(), grad);
            } else {
                grads.push(None);
            }
        }

        let aux_names = self.engine.list_names(&sym_out, NameKind::AuxStates)?;
        let mut aux = Vec::with_capacity(aux_names.len());
        for name in &aux_names {
            let p = self.params.get(name).ok_or_else(|| {
                anyhow!("no shape for auxiliary state '{name}' after inference")
            })?;
            aux.push(Some(p.handle().clone()));
        }

        let exec = self.engine.bind(&sym_out, self.ctx, &args, &grads, &aux)?;

        let outs = self.engine.outputs(&exec)?;
        let out_names = self.engine.list_names(&sym_out, NameKind::Outputs)?;
        ensure!(
            outs.len() == out_names.len(),
            "executor returned {} outputs for {} output names",
            outs.len(),
            out_names.len()
        );
        for (info, name) in outs.into_iter().zip(out_names) {
            let trimmed = name
                .strip_suffix("_output")
                .or_else(|| name.strip_suffix("_loss"))
                .unwrap_or(name.as_str())
                .to_string();
            self.outputs.insert(
                trimmed,
                TensorArray::view(&self.engine, self.ctx, info.dtype, info.dim, info.handle),
            );
        }
        self.exec = Some(exec);

        debug!(
            params = self.params.len(),
            grads = self.grads.len(),
            outputs = self.outputs.len(),
            "bound graph executor"
        );
        Ok(())
    }

    /// Allocates one tensor per inferred name not already present, preferring
    /// an explicitly declared shape over the inferred one.
    fn allocate(&mut self, inferred: &BTreeMap<String, Vec<usize>>) -> Result<()> {
        for (name, shape) in inferred {
            if self.params.contains_key(name) {
                continue;
            }
            let dim = match self.shapes.get(name) {
                Some(declared) if !declared.empty() => *declared,
                _ => Dimension::from_shape(shape)?,
            };
            let array = TensorArray::new(&self.engine, self.ctx, self.dtype, dim)?;
            self.params.insert(name.clone(), array);
        }
        Ok(())
    }

    /// Releases every native resource: the root symbol handles, the
    /// executor, and every parameter, gradient and auxiliary tensor, in that
    /// order. Safe to call more than once.
    pub fn release(&mut self) {
        let out = self.sym_out.take();
        if let Some(last) = self.sym_last.take() {
            if out.as_ref() != Some(&last) {
                self.engine.release_symbol(last);
            }
        }
        if let Some(out) = out {
            self.engine.release_symbol(out);
        }
        if let Some(exec) = self.exec.take() {
            self.engine.release_executor(exec);
        }
        for (_, mut param) in std::mem::take(&mut self.params) {
            param.release();
        }
        for (_, mut grad) in std::mem::take(&mut self.grads) {
            grad.release();
        }
        // Output entries are executor-owned views; dropping them frees
        // nothing on the engine side.
        self.outputs.clear();
    }
}

impl<E: Engine> Drop for Graph<E> {
    fn drop(&mut self) {
        self.release();
    }
}
