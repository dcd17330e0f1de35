//! The recursive symbol-tree walk that emits the engine operator graph.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, ensure, Result};
use tracing::{debug, trace};

use crate::engine::{marshal, Context, Engine};
use crate::graph::{Graph, Loss};
use crate::symbol::{self, ops, NodeOp, Symbol};
use crate::tensor::{Dimension, Dtype, Initializer, TensorArray};

/// Transient compiler state for one composition pass. Node handles are
/// memoized by node identity, so a node instance shared by several parents
/// is created on the engine exactly once.
struct Composer<E: Engine> {
    engine: Arc<E>,
    input_dim: Dimension,
    /// Node identity -> composed engine handle.
    symbols: HashMap<usize, E::SymbolHandle>,
    /// Variable name -> engine handle; deduplicates weight sharing.
    vars: HashMap<String, E::SymbolHandle>,
    /// Name -> handle table resolving forward references.
    refs: HashMap<String, E::SymbolHandle>,
    /// Generator node identity -> its shape-resolved clone. The clone is kept
    /// alive here so repeated visits return the same engine node.
    alias: HashMap<usize, Symbol>,
    /// Collected `*`-prefixed side outputs, deduplicated by name.
    outputs: BTreeMap<String, Symbol>,

    initializers: BTreeMap<String, Arc<dyn Initializer>>,
    autograd: BTreeSet<String>,
    shapes: BTreeMap<String, Dimension>,
    sym_id: usize,
}

impl<E: Engine> Composer<E> {
    fn new(engine: Arc<E>, input_dim: Dimension) -> Self {
        Composer {
            engine,
            input_dim,
            symbols: HashMap::new(),
            vars: HashMap::new(),
            refs: HashMap::new(),
            alias: HashMap::new(),
            outputs: BTreeMap::new(),
            initializers: BTreeMap::new(),
            autograd: BTreeSet::new(),
            shapes: BTreeMap::new(),
            sym_id: 0,
        }
    }

    fn next_symbol_id(&mut self) -> usize {
        self.sym_id += 1;
        self.sym_id
    }

    fn subcompose(&mut self, s: &Symbol) -> Result<Vec<E::SymbolHandle>> {
        let mut handles = Vec::with_capacity(s.args().len());
        for arg in s.args() {
            if let Some(h) = self.compose(arg)? {
                handles.push(h);
            }
        }
        Ok(handles)
    }

    /// Composes one node, returning its engine handle. Scalar literals
    /// compose to nothing; they were folded into `-by-scalar` operators when
    /// the tree was built.
    fn compose(&mut self, s: &Symbol) -> Result<Option<E::SymbolHandle>> {
        if let Some(resolved) = self.alias.get(&s.identity()) {
            let key = resolved.identity();
            return Ok(self.symbols.get(&key).cloned());
        }
        if let Some(h) = self.symbols.get(&s.identity()) {
            return Ok(Some(h.clone()));
        }

        match s.op() {
            NodeOp::Input => Ok(self.vars.get("_input").cloned()),
            NodeOp::Scalar => Ok(None),
            NodeOp::Ref => {
                let name = s.name().unwrap_or_default();
                match self.refs.get(name) {
                    Some(h) => Ok(Some(h.clone())),
                    None => Err(anyhow!("symbol '{name}' does not exist")),
                }
            }
            NodeOp::Link => {
                let name = s.name().unwrap_or_default();
                Ok(Some(self.engine.create_variable(name)?))
            }
            NodeOp::Var | NodeOp::NogVar => {
                let name = s
                    .name()
                    .ok_or_else(|| anyhow!("variable symbol has no name"))?
                    .to_string();
                if let Some(h) = self.vars.get(&name) {
                    // First registration wins; a later declaration of the
                    // same name reuses the variable as-is.
                    return Ok(Some(h.clone()));
                }
                let h = self.engine.create_variable(&name)?;
                self.vars.insert(name.clone(), h.clone());
                self.refs.insert(name.clone(), h.clone());
                if let Some(init) = s.initializer() {
                    self.initializers.insert(name.clone(), init);
                }
                if s.op() == NodeOp::Var && !name.starts_with('_') {
                    self.autograd.insert(name.clone());
                }
                if !s.declared_dim().empty() {
                    self.shapes
                        .insert(name.clone(), s.declared_dim().like(self.input_dim));
                }
                trace!(var = %name, "registered variable");
                Ok(Some(h))
            }
            NodeOp::Output => {
                let key = format!("*{}", s.name().unwrap_or_default());
                if !self.outputs.contains_key(&key) {
                    let wrapped = ops::block_grad(&s.args()[0]).with_name(key.clone());
                    self.outputs.insert(key, wrapped);
                }
                self.compose(&s.args()[0])
            }
            NodeOp::Bound => {
                let primary = self.compose(&s.args()[0])?;
                for arg in &s.args()[1..] {
                    self.compose(arg)?;
                }
                Ok(primary)
            }
            NodeOp::Depend => {
                for arg in &s.args()[1..] {
                    self.compose(arg)?;
                }
                self.compose(&s.args()[0])
            }
            NodeOp::Group => {
                let handles = self.subcompose(s)?;
                let h = self.engine.group(&handles)?;
                self.symbols.insert(s.identity(), h.clone());
                Ok(Some(h))
            }
            NodeOp::Prim(op) => {
                // Generators carry a declared dimension that only becomes
                // concrete once the input dimension is known; compose a
                // shape-resolved clone and memoize it as an alias.
                let effective = if ops::is_generator(op) {
                    let resolved = s.resolve_generator(s.declared_dim().like(self.input_dim));
                    self.alias.insert(s.identity(), resolved.clone());
                    resolved
                } else {
                    s.clone()
                };

                let handles = self.subcompose(&effective)?;
                let attrs = marshal(&effective.node().attr);
                let h = self.engine.create_operator(op, &attrs)?;
                self.symbols.insert(effective.identity(), h.clone());

                let name = match effective.name() {
                    Some(n) if n.len() >= 3 => n.to_string(),
                    _ => format!("{}@sym{:02}", op.name(), self.next_symbol_id()),
                };
                self.engine.compose(&h, &name, &handles)?;
                if let Some(n) = effective.name() {
                    if !n.is_empty() {
                        self.refs.insert(n.to_string(), h.clone());
                    }
                }
                if effective.is_output() {
                    let key = format!("*{name}");
                    if !self.outputs.contains_key(&key) {
                        let wrapped = ops::block_grad(&effective).with_name(key.clone());
                        self.outputs.insert(key, wrapped);
                    }
                }
                Ok(Some(h))
            }
        }
    }

    /// Releases every composed handle except the two graph roots. The maps
    /// are drained; only the graph-level metadata survives composition.
    fn release_except(&mut self, keep_a: &E::SymbolHandle, keep_b: &E::SymbolHandle) {
        for (_, h) in self.symbols.drain() {
            if h != *keep_a && h != *keep_b {
                self.engine.release_symbol(h);
            }
        }
        for (_, h) in self.vars.drain() {
            self.engine.release_symbol(h);
        }
        self.alias.clear();
        self.refs.clear();
        self.outputs.clear();
    }
}

impl<E: Engine> Graph<E> {
    /// Compiles `sym` (plus an optional loss over it) into a bound graph.
    ///
    /// `input` is the full network input dimension including the leading
    /// batch axis. Any engine failure is fatal: the error is returned and
    /// everything created so far is released when the partial graph drops.
    pub fn compose(
        engine: Arc<E>,
        ctx: Context,
        sym: &Symbol,
        loss: Option<&dyn Loss>,
        input: Dimension,
        dtype: Dtype,
    ) -> Result<Graph<E>> {
        ensure!(input.good(), "bad input dimension {input}");
        let input_array = TensorArray::new(&engine, ctx, dtype, input)?;

        let mut c = Composer::new(Arc::clone(&engine), input);
        c.compose(&symbol::var("_input"))?;

        let out_sym = ops::block_grad(sym).with_name("_output");
        let mut last = c
            .compose(&out_sym)?
            .ok_or_else(|| anyhow!("network root composed to nothing"))?;
        let mut out = last.clone();

        if let Some(loss) = loss {
            let sym_loss = loss.loss(sym);
            let loss_head = ops::make_loss(&sym_loss).with_name("_loss");
            c.compose(&sym_loss)?;
            let others: Vec<Symbol> = c.outputs.values().cloned().collect();
            let mut heads = vec![out_sym.clone(), loss_head];
            heads.extend(others.iter().cloned());
            out = c
                .compose(&symbol::group(heads))?
                .ok_or_else(|| anyhow!("loss group composed to nothing"))?;
            if !others.is_empty() {
                let mut heads = vec![out_sym.clone()];
                heads.extend(others);
                last = c
                    .compose(&symbol::group(heads))?
                    .ok_or_else(|| anyhow!("output group composed to nothing"))?;
            }
        } else if !c.outputs.is_empty() {
            let others: Vec<Symbol> = c.outputs.values().cloned().collect();
            let mut heads = vec![out_sym.clone()];
            heads.extend(others);
            last = c
                .compose(&symbol::group(heads))?
                .ok_or_else(|| anyhow!("output group composed to nothing"))?;
            out = last.clone();
        }

        debug!(
            nodes = c.symbols.len(),
            vars = c.vars.len(),
            "composed symbol graph"
        );
        c.release_except(&out, &last);

        let has_loss = out != last;
        let mut graph = Graph {
            engine,
            ctx,
            dtype,
            input_dim: input,
            params: BTreeMap::new(),
            grads: BTreeMap::new(),
            shapes: c.shapes,
            autograd: c.autograd,
            initializers: c.initializers,
            outputs: BTreeMap::new(),
            exec: None,
            sym_out: Some(out),
            sym_last: Some(last),
            has_loss,
            initialized: false,
            identity: once_cell::sync::OnceCell::new(),
        };
        graph.params.insert("_input".to_string(), input_array);
        graph.bind()?;
        Ok(graph)
    }
}
