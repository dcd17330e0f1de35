//! Thin facade pairing a compiled graph with its symbolic description and
//! batch size. Dataset iteration, metrics and checkpoint selection live with
//! the caller; this type only moves batches through the bound executor.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{ensure, Result};

use crate::engine::{Context, Engine};
use crate::graph::{Graph, Loss};
use crate::nn::{self, Block};
use crate::symbol::{load_symbol, save_symbol, Symbol};
use crate::tensor::{Dimension, Dtype};
use crate::train::Optimizer;

pub struct Network<E: Engine> {
    pub graph: Graph<E>,
    symbolic: Symbol,
    input_dim: Dimension,
    pub batch_size: usize,
}

fn seed_or_now(seed: u64) -> u64 {
    if seed != 0 {
        return seed;
    }
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

impl<E: Engine> Network<E> {
    /// Builds a network from a block description, compiles it with the batch
    /// axis prepended to `input_dim`, and initializes its parameters.
    pub fn new(
        engine: Arc<E>,
        ctx: Context,
        nn: &dyn Block,
        input_dim: Dimension,
        loss: Option<&dyn Loss>,
        batch_size: usize,
        seed: u64,
    ) -> Result<Network<E>> {
        ensure!(batch_size > 0, "batch size must be positive");
        let symbolic = nn::combine(nn);
        let ctx = ctx.upgrade(engine.as_ref());
        let mut graph = Graph::compose(
            engine,
            ctx,
            &symbolic,
            loss,
            input_dim.push_front(batch_size as i32),
            Dtype::Float32,
        )?;
        graph.initialize(seed_or_now(seed), None)?;
        Ok(Network {
            graph,
            symbolic,
            input_dim,
            batch_size,
        })
    }

    /// Restores an inference network from a symbolic description and a
    /// parameter stream; every non-internal parameter must be present.
    pub fn load<R1: Read, R2: Read>(
        engine: Arc<E>,
        ctx: Context,
        symbol: R1,
        params: R2,
        batch_size: usize,
    ) -> Result<Network<E>> {
        ensure!(batch_size > 0, "batch size must be positive");
        let (symbolic, input_dim) = load_symbol(symbol)?;
        let ctx = ctx.upgrade(engine.as_ref());
        let mut graph = Graph::compose(
            engine,
            ctx,
            &symbolic,
            None,
            input_dim.push_front(batch_size as i32),
            Dtype::Float32,
        )?;
        graph.load_params(params, true)?;
        Ok(Network {
            graph,
            symbolic,
            input_dim,
            batch_size,
        })
    }

    /// Builds a network from a block description and seeds it from a
    /// parameter stream; parameters missing from the stream keep their
    /// random initialization.
    pub fn inherit<R: Read>(
        engine: Arc<E>,
        ctx: Context,
        nn: &dyn Block,
        input_dim: Dimension,
        params: R,
        batch_size: usize,
        seed: u64,
    ) -> Result<Network<E>> {
        ensure!(batch_size > 0, "batch size must be positive");
        let symbolic = nn::combine(nn);
        let ctx = ctx.upgrade(engine.as_ref());
        let mut graph = Graph::compose(
            engine,
            ctx,
            &symbolic,
            None,
            input_dim.push_front(batch_size as i32),
            Dtype::Float32,
        )?;
        graph.initialize(seed_or_now(seed), None)?;
        graph.load_params(params, false)?;
        Ok(Network {
            graph,
            symbolic,
            input_dim,
            batch_size,
        })
    }

    /// The per-sample input dimension the network was described with.
    pub fn input_dim(&self) -> Dimension {
        self.input_dim
    }

    pub fn symbolic(&self) -> &Symbol {
        &self.symbolic
    }

    /// Runs one inference forward over a full batch, copying the output into
    /// `out`.
    pub fn forward(&self, data: &[f32], out: &mut [f32]) -> Result<()> {
        self.graph.input().set_values(data)?;
        self.graph.forward(false)?;
        self.graph.output().copy_values_to(out)
    }

    /// Runs one inference forward and splits the output per batch row.
    pub fn predict(&self, data: &[f32]) -> Result<Vec<Vec<f32>>> {
        let total = self.graph.output().dim().total();
        let mut out = vec![0f32; total];
        self.forward(data, &mut out)?;
        let stride = total / self.batch_size;
        Ok(out.chunks(stride).map(<[f32]>::to_vec).collect())
    }

    /// One training step: upload the batch and labels, run forward and
    /// backward, and let the optimizer consume the gradients.
    pub fn train_step(
        &mut self,
        data: &[f32],
        label: Option<&[f32]>,
        opt: &mut dyn Optimizer<E>,
    ) -> Result<()> {
        self.graph.input().set_values(data)?;
        if let (Some(target), Some(values)) = (self.graph.label(), label) {
            target.set_values(values)?;
        }
        self.graph.forward(true)?;
        self.graph.backward()?;
        self.update(opt)
    }

    /// Applies one optimizer update per gradient-bearing parameter.
    pub fn update(&mut self, opt: &mut dyn Optimizer<E>) -> Result<()> {
        for (name, grad) in self.graph.grads() {
            let param = self
                .graph
                .param(name)
                .expect("gradient without a matching parameter");
            opt.update(param, grad)?;
        }
        Ok(())
    }

    /// Writes the trainable parameters matching the optional glob filter.
    pub fn save_params<W: Write>(&self, w: W, only: &[&str]) -> Result<()> {
        self.graph.save_params(w, only)
    }

    /// Loads a parameter stream into the live graph.
    pub fn load_params<R: Read>(&mut self, r: R, forced: bool) -> Result<()> {
        self.graph.load_params(r, forced)
    }

    /// Writes the symbolic description (input dimension plus symbol tree).
    pub fn save_symbol<W: Write>(&self, w: W) -> Result<()> {
        save_symbol(self.input_dim, &self.symbolic, w)
    }

    /// Releases every native resource held by the graph.
    pub fn release(&mut self) {
        self.graph.release();
    }
}
