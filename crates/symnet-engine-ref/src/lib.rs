//! In-memory reference engine.
//!
//! Implements the `symnet` engine trait far enough to exercise the graph
//! compiler, binder, initializer, optimizers and codecs end to end: tensors
//! are plain byte buffers, shape inference follows per-operator rules,
//! random fills come from one seeded generator, and the fused optimizer
//! updates are real element-wise arithmetic. Forward and backward passes
//! zero-fill their targets; this engine computes no real kernels.

mod shape;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use half::f16;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use symnet::engine::{
    AttrPack, Context, Engine, EngineError, EngineResult, NameKind, OpId, OutputInfo,
    ShapeRequest,
};
use symnet::tensor::{Dimension, Dtype};

use shape::{infer_node, Shape};

struct TensorBuf {
    dtype: Dtype,
    dim: Dimension,
    data: Vec<u8>,
}

enum SymNode {
    Variable {
        name: String,
    },
    Operator {
        op: OpId,
        attrs: BTreeMap<String, String>,
        name: String,
        inputs: Vec<u64>,
    },
    Group {
        members: Vec<u64>,
    },
}

struct Executor {
    outputs: Vec<(u64, Dimension, Dtype)>,
    grads: Vec<u64>,
}

#[derive(Default)]
struct State {
    tensors: HashMap<u64, TensorBuf>,
    symbols: HashMap<u64, SymNode>,
    /// Released symbol handles. Node data stays behind because retained
    /// roots still reference it; a released handle only stops counting as
    /// live and may not be released again meaningfully.
    released_symbols: HashSet<u64>,
    executors: HashMap<u64, Executor>,
    rng: Option<StdRng>,
    next_id: u64,
    symbols_created: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn rng(&mut self) -> &mut StdRng {
        self.rng.get_or_insert_with(|| StdRng::seed_from_u64(0))
    }

    fn tensor(&self, handle: u64) -> EngineResult<&TensorBuf> {
        self.tensors
            .get(&handle)
            .ok_or_else(|| EngineError::Other(format!("unknown tensor handle {handle}")))
    }

    fn node(&self, handle: u64) -> EngineResult<&SymNode> {
        self.symbols
            .get(&handle)
            .ok_or_else(|| EngineError::Other(format!("unknown symbol handle {handle}")))
    }

    /// Post-order listing of the nodes reachable from `root`, each exactly
    /// once, group members walked in order.
    fn topo(&self, root: u64) -> EngineResult<Vec<u64>> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !seen.insert(id) {
                continue;
            }
            stack.push((id, true));
            let children: Vec<u64> = match self.node(id)? {
                SymNode::Variable { .. } => Vec::new(),
                SymNode::Operator { inputs, .. } => inputs.clone(),
                SymNode::Group { members } => members.clone(),
            };
            for &child in children.iter().rev() {
                stack.push((child, false));
            }
        }
        Ok(order)
    }

    /// Variables consumed through the running-statistics slots of a
    /// batch-norm operator are auxiliary state, not arguments.
    fn aux_vars(&self, order: &[u64]) -> EngineResult<HashSet<u64>> {
        let mut aux = HashSet::new();
        for &id in order {
            if let SymNode::Operator {
                op: OpId::BatchNorm,
                inputs,
                ..
            } = self.node(id)?
            {
                for &slot in inputs.iter().skip(3) {
                    if matches!(self.node(slot)?, SymNode::Variable { .. }) {
                        aux.insert(slot);
                    }
                }
            }
        }
        Ok(aux)
    }

    fn heads(&self, root: u64) -> EngineResult<Vec<u64>> {
        Ok(match self.node(root)? {
            SymNode::Group { members } => members.clone(),
            _ => vec![root],
        })
    }

    fn head_name(&self, id: u64) -> EngineResult<String> {
        Ok(match self.node(id)? {
            SymNode::Variable { name } => format!("{name}_output"),
            SymNode::Operator { op, name, .. } => {
                if *op == OpId::MakeLoss {
                    format!("{name}_loss")
                } else {
                    format!("{name}_output")
                }
            }
            SymNode::Group { .. } => {
                return Err(EngineError::Other("nested group output".into()))
            }
        })
    }

    /// Propagates shapes over the reachable graph from a seed assignment of
    /// variable shapes, backfilling parameter shapes the operator rules pin
    /// down. Runs to a fixed point.
    fn propagate(
        &self,
        order: &[u64],
        var_shapes: &mut HashMap<String, Shape>,
    ) -> EngineResult<HashMap<u64, Shape>> {
        let mut node_shapes: HashMap<u64, Shape> = HashMap::new();
        loop {
            let mut changed = false;
            for &id in order {
                let (op, attrs, inputs) = match self.node(id)? {
                    SymNode::Operator {
                        op, attrs, inputs, ..
                    } => (*op, attrs, inputs),
                    _ => continue,
                };
                let mut ins: Vec<Option<Shape>> = inputs
                    .iter()
                    .map(|&input| match self.node(input) {
                        Ok(SymNode::Variable { name }) => Ok(var_shapes.get(name).cloned()),
                        Ok(_) => Ok(node_shapes.get(&input).cloned()),
                        Err(e) => Err(e),
                    })
                    .collect::<EngineResult<_>>()?;

                let out = infer_node(op, attrs, &mut ins)?;

                for (slot, &input) in ins.iter().zip(inputs.iter()) {
                    if let (Some(shape), Ok(SymNode::Variable { name })) =
                        (slot, self.node(input))
                    {
                        if !var_shapes.contains_key(name) {
                            var_shapes.insert(name.clone(), shape.clone());
                            changed = true;
                        }
                    }
                }
                if let Some(shape) = out {
                    if node_shapes.get(&id) != Some(&shape) {
                        node_shapes.insert(id, shape);
                        changed = true;
                    }
                }
            }
            if !changed {
                return Ok(node_shapes);
            }
        }
    }
}

/// The reference engine. One seeded random stream serves every context; GPU
/// contexts do not exist.
#[derive(Default)]
pub struct RefEngine {
    state: Mutex<State>,
}

impl RefEngine {
    pub fn new() -> Self {
        RefEngine::default()
    }

    /// Live tensor count, exposed for leak assertions in tests.
    pub fn live_tensors(&self) -> usize {
        self.lock().tensors.len()
    }

    /// Live symbol-node count, exposed for leak assertions in tests.
    pub fn live_symbols(&self) -> usize {
        let state = self.lock();
        state
            .symbols
            .keys()
            .filter(|id| !state.released_symbols.contains(id))
            .count()
    }

    /// Total variable/operator/group creation calls so far, for
    /// deduplication assertions: compiling a tree that shares a node by
    /// reference must create it exactly once.
    pub fn symbols_created(&self) -> u64 {
        self.lock().symbols_created
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("engine state poisoned")
    }
}

fn decode_f64(buf: &TensorBuf) -> EngineResult<Vec<f64>> {
    let width = buf.dtype.size();
    let mut out = Vec::with_capacity(buf.data.len() / width);
    for chunk in buf.data.chunks_exact(width) {
        out.push(match buf.dtype {
            Dtype::Float32 => f32::from_le_bytes(chunk.try_into().expect("width")) as f64,
            Dtype::Float64 => f64::from_le_bytes(chunk.try_into().expect("width")),
            Dtype::Float16 => f16::from_le_bytes([chunk[0], chunk[1]]).to_f64(),
            Dtype::Uint8 => chunk[0] as f64,
            Dtype::Int8 => chunk[0] as i8 as f64,
            Dtype::Int32 => i32::from_le_bytes(chunk.try_into().expect("width")) as f64,
            Dtype::Int64 => i64::from_le_bytes(chunk.try_into().expect("width")) as f64,
        });
    }
    Ok(out)
}

fn encode_f64(dtype: Dtype, values: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * dtype.size());
    for &v in values {
        match dtype {
            Dtype::Float32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
            Dtype::Float64 => out.extend_from_slice(&v.to_le_bytes()),
            Dtype::Float16 => out.extend_from_slice(&f16::from_f64(v).to_le_bytes()),
            Dtype::Uint8 => out.push(v as u8),
            Dtype::Int8 => out.push(v as i8 as u8),
            Dtype::Int32 => out.extend_from_slice(&(v as i32).to_le_bytes()),
            Dtype::Int64 => out.extend_from_slice(&(v as i64).to_le_bytes()),
        }
    }
    out
}

fn load_f32(buf: &TensorBuf, what: &str) -> EngineResult<Vec<f32>> {
    if buf.dtype != Dtype::Float32 {
        return Err(EngineError::Other(format!(
            "{what} expects Float32 tensors, got {}",
            buf.dtype
        )));
    }
    Ok(buf
        .data
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().expect("width")))
        .collect())
}

fn store_f32(buf: &mut TensorBuf, values: &[f32]) {
    buf.data.clear();
    for v in values {
        buf.data.extend_from_slice(&v.to_le_bytes());
    }
}

impl Engine for RefEngine {
    type TensorHandle = u64;
    type SymbolHandle = u64;
    type ExecutorHandle = u64;

    fn name(&self) -> &'static str {
        "ref"
    }

    fn gpu_count(&self) -> usize {
        0
    }

    fn allocate(&self, _ctx: Context, dtype: Dtype, dim: Dimension) -> EngineResult<u64> {
        if !dim.good() {
            return Err(EngineError::Alloc(format!("bad dimension {dim}")));
        }
        let mut state = self.lock();
        let id = state.next_id();
        state.tensors.insert(
            id,
            TensorBuf {
                dtype,
                dim,
                data: vec![0u8; dim.size_of(dtype)],
            },
        );
        Ok(id)
    }

    fn free_tensor(&self, handle: u64) {
        self.lock().tensors.remove(&handle);
    }

    fn read_bytes(&self, handle: &u64, out: &mut [u8]) -> EngineResult<()> {
        let state = self.lock();
        let buf = state.tensor(*handle)?;
        if out.len() != buf.data.len() {
            return Err(EngineError::Other(format!(
                "read of {} bytes from a {}-byte tensor",
                out.len(),
                buf.data.len()
            )));
        }
        out.copy_from_slice(&buf.data);
        Ok(())
    }

    fn write_bytes(&self, handle: &u64, data: &[u8]) -> EngineResult<()> {
        let mut state = self.lock();
        let buf = state
            .tensors
            .get_mut(handle)
            .ok_or_else(|| EngineError::Other(format!("unknown tensor handle {handle}")))?;
        if data.len() != buf.data.len() {
            return Err(EngineError::Other(format!(
                "write of {} bytes into a {}-byte tensor",
                data.len(),
                buf.data.len()
            )));
        }
        buf.data.copy_from_slice(data);
        Ok(())
    }

    fn copy_convert(&self, src: &u64, dst: &u64) -> EngineResult<()> {
        let mut state = self.lock();
        let values = decode_f64(state.tensor(*src)?)?;
        let buf = state
            .tensors
            .get_mut(dst)
            .ok_or_else(|| EngineError::Other(format!("unknown tensor handle {dst}")))?;
        if values.len() != buf.dim.total() {
            return Err(EngineError::Other(format!(
                "copy of {} elements into {} slots",
                values.len(),
                buf.dim.total()
            )));
        }
        buf.data = encode_f64(buf.dtype, &values);
        Ok(())
    }

    fn random_seed(&self, _ctx: Context, seed: u64) -> EngineResult<()> {
        self.lock().rng = Some(StdRng::seed_from_u64(seed));
        Ok(())
    }

    fn fill_zeros(&self, handle: &u64) -> EngineResult<()> {
        let mut state = self.lock();
        let buf = state
            .tensors
            .get_mut(handle)
            .ok_or_else(|| EngineError::Other(format!("unknown tensor handle {handle}")))?;
        buf.data.fill(0);
        Ok(())
    }

    fn fill_add_scalar(&self, handle: &u64, value: f32) -> EngineResult<()> {
        let mut state = self.lock();
        let buf = state
            .tensors
            .get_mut(handle)
            .ok_or_else(|| EngineError::Other(format!("unknown tensor handle {handle}")))?;
        let mut values = decode_f64(buf)?;
        for v in &mut values {
            *v += value as f64;
        }
        buf.data = encode_f64(buf.dtype, &values);
        Ok(())
    }

    fn fill_uniform(&self, handle: &u64, low: f32, high: f32) -> EngineResult<()> {
        let mut state = self.lock();
        let total = state.tensor(*handle)?.dim.total();
        let samples: Vec<f64> = {
            let rng = state.rng();
            (0..total)
                .map(|_| rng.gen::<f64>() * (high - low) as f64 + low as f64)
                .collect()
        };
        let buf = state.tensors.get_mut(handle).expect("checked above");
        buf.data = encode_f64(buf.dtype, &samples);
        Ok(())
    }

    fn fill_normal(&self, handle: &u64, loc: f32, scale: f32) -> EngineResult<()> {
        let dist = Normal::new(loc as f64, scale as f64)
            .map_err(|e| EngineError::Other(format!("bad normal parameters: {e}")))?;
        let mut state = self.lock();
        let total = state.tensor(*handle)?.dim.total();
        let samples: Vec<f64> = {
            let rng = state.rng();
            (0..total).map(|_| dist.sample(rng)).collect()
        };
        let buf = state.tensors.get_mut(handle).expect("checked above");
        buf.data = encode_f64(buf.dtype, &samples);
        Ok(())
    }

    fn sgd_update(&self, param: &u64, grad: &u64, lr: f32, wd: f32) -> EngineResult<()> {
        let mut state = self.lock();
        let g = load_f32(state.tensor(*grad)?, "sgd_update")?;
        let mut w = load_f32(state.tensor(*param)?, "sgd_update")?;
        for (w, g) in w.iter_mut().zip(g.iter()) {
            *w -= lr * (g + wd * *w);
        }
        let buf = state.tensors.get_mut(param).expect("checked above");
        store_f32(buf, &w);
        Ok(())
    }

    fn sgd_mom_update(
        &self,
        param: &u64,
        grad: &u64,
        mom: &u64,
        lr: f32,
        momentum: f32,
        wd: f32,
    ) -> EngineResult<()> {
        let mut state = self.lock();
        let g = load_f32(state.tensor(*grad)?, "sgd_mom_update")?;
        let mut w = load_f32(state.tensor(*param)?, "sgd_mom_update")?;
        let mut m = load_f32(state.tensor(*mom)?, "sgd_mom_update")?;
        for ((w, m), g) in w.iter_mut().zip(m.iter_mut()).zip(g.iter()) {
            *m = momentum * *m - lr * (g + wd * *w);
            *w += *m;
        }
        let buf = state.tensors.get_mut(mom).expect("checked above");
        store_f32(buf, &m);
        let buf = state.tensors.get_mut(param).expect("checked above");
        store_f32(buf, &w);
        Ok(())
    }

    fn adam_update(
        &self,
        param: &u64,
        grad: &u64,
        mean: &u64,
        var: &u64,
        lr: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        wd: f32,
    ) -> EngineResult<()> {
        let mut state = self.lock();
        let g = load_f32(state.tensor(*grad)?, "adam_update")?;
        let mut w = load_f32(state.tensor(*param)?, "adam_update")?;
        let mut m = load_f32(state.tensor(*mean)?, "adam_update")?;
        let mut v = load_f32(state.tensor(*var)?, "adam_update")?;
        for (((w, m), v), g) in w.iter_mut().zip(m.iter_mut()).zip(v.iter_mut()).zip(g.iter()) {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            *w -= lr * (*m / (v.sqrt() + epsilon) + wd * *w);
        }
        let buf = state.tensors.get_mut(mean).expect("checked above");
        store_f32(buf, &m);
        let buf = state.tensors.get_mut(var).expect("checked above");
        store_f32(buf, &v);
        let buf = state.tensors.get_mut(param).expect("checked above");
        store_f32(buf, &w);
        Ok(())
    }

    fn create_variable(&self, name: &str) -> EngineResult<u64> {
        let mut state = self.lock();
        let id = state.next_id();
        state.symbols_created += 1;
        state.symbols.insert(
            id,
            SymNode::Variable {
                name: name.to_string(),
            },
        );
        Ok(id)
    }

    fn create_operator(&self, op: OpId, attrs: &AttrPack) -> EngineResult<u64> {
        let decoded: BTreeMap<String, String> = attrs
            .pairs()
            .iter()
            .map(|(key, value)| {
                (
                    key.to_string(),
                    value.to_str().expect("attribute is UTF-8").to_string(),
                )
            })
            .collect();
        let mut state = self.lock();
        let id = state.next_id();
        state.symbols_created += 1;
        state.symbols.insert(
            id,
            SymNode::Operator {
                op,
                attrs: decoded,
                name: String::new(),
                inputs: Vec::new(),
            },
        );
        Ok(id)
    }

    fn compose(&self, op: &u64, name: &str, args: &[u64]) -> EngineResult<()> {
        let mut state = self.lock();
        match state.symbols.get_mut(op) {
            Some(SymNode::Operator { name: n, inputs, .. }) => {
                *n = name.to_string();
                *inputs = args.to_vec();
                Ok(())
            }
            Some(_) => Err(EngineError::Other(format!(
                "handle {op} is not a composable operator"
            ))),
            None => Err(EngineError::Other(format!("unknown symbol handle {op}"))),
        }
    }

    fn group(&self, members: &[u64]) -> EngineResult<u64> {
        let mut state = self.lock();
        let id = state.next_id();
        state.symbols_created += 1;
        state.symbols.insert(
            id,
            SymNode::Group {
                members: members.to_vec(),
            },
        );
        Ok(id)
    }

    fn release_symbol(&self, handle: u64) {
        let mut state = self.lock();
        if state.symbols.contains_key(&handle) {
            state.released_symbols.insert(handle);
        }
    }

    fn list_names(&self, sym: &u64, kind: NameKind) -> EngineResult<Vec<String>> {
        let state = self.lock();
        let order = state.topo(*sym)?;
        match kind {
            NameKind::Arguments => {
                let aux = state.aux_vars(&order)?;
                let mut names = Vec::new();
                for &id in &order {
                    if aux.contains(&id) {
                        continue;
                    }
                    if let SymNode::Variable { name } = state.node(id)? {
                        names.push(name.clone());
                    }
                }
                Ok(names)
            }
            NameKind::AuxStates => {
                let aux = state.aux_vars(&order)?;
                let mut names = Vec::new();
                for &id in &order {
                    if !aux.contains(&id) {
                        continue;
                    }
                    if let SymNode::Variable { name } = state.node(id)? {
                        names.push(name.clone());
                    }
                }
                Ok(names)
            }
            NameKind::Outputs => {
                let mut names = Vec::new();
                for id in state.heads(*sym)? {
                    names.push(state.head_name(id)?);
                }
                Ok(names)
            }
        }
    }

    fn infer_shapes(
        &self,
        sym: &u64,
        known: &[(String, Vec<usize>)],
        request: ShapeRequest,
    ) -> EngineResult<BTreeMap<String, Vec<usize>>> {
        let state = self.lock();
        let order = state.topo(*sym)?;
        let mut var_shapes: HashMap<String, Shape> = known.iter().cloned().collect();
        let node_shapes = state.propagate(&order, &mut var_shapes)?;

        let aux = state.aux_vars(&order)?;
        let mut result = BTreeMap::new();
        for &id in &order {
            if let SymNode::Variable { name } = state.node(id)? {
                let wanted = if aux.contains(&id) {
                    request.aux_states
                } else {
                    request.arguments
                };
                if wanted {
                    if let Some(shape) = var_shapes.get(name) {
                        result.insert(name.clone(), shape.clone());
                    }
                }
            }
        }
        if request.outputs {
            for id in state.heads(*sym)? {
                if let Some(shape) = node_shapes.get(&id) {
                    result.insert(state.head_name(id)?, shape.clone());
                }
            }
        }
        Ok(result)
    }

    fn to_text(&self, sym: &u64) -> EngineResult<String> {
        let state = self.lock();
        let order = state.topo(*sym)?;
        let index: HashMap<u64, usize> =
            order.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let mut out = String::new();
        for &id in &order {
            let line = match state.node(id)? {
                SymNode::Variable { name } => format!("var {name}"),
                SymNode::Operator {
                    op,
                    attrs,
                    name,
                    inputs,
                } => {
                    let ins: Vec<String> =
                        inputs.iter().map(|i| format!("%{}", index[i])).collect();
                    let attrs: Vec<String> =
                        attrs.iter().map(|(k, v)| format!("{k}={v}")).collect();
                    format!(
                        "%{} {name} = {}({}) {{{}}}",
                        index[&id],
                        op.name(),
                        ins.join(", "),
                        attrs.join(", ")
                    )
                }
                SymNode::Group { members } => {
                    let ins: Vec<String> =
                        members.iter().map(|i| format!("%{}", index[i])).collect();
                    format!("group({})", ins.join(", "))
                }
            };
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    fn bind(
        &self,
        sym: &u64,
        _ctx: Context,
        args: &[Option<u64>],
        grads: &[Option<u64>],
        aux: &[Option<u64>],
    ) -> EngineResult<u64> {
        let mut state = self.lock();
        let order = state.topo(*sym)?;
        let aux_set = state.aux_vars(&order)?;

        // Positional argument names, mirroring list_names(Arguments).
        let mut arg_names = Vec::new();
        let mut aux_names = Vec::new();
        for &id in &order {
            if let SymNode::Variable { name } = state.node(id)? {
                if aux_set.contains(&id) {
                    aux_names.push(name.clone());
                } else {
                    arg_names.push(name.clone());
                }
            }
        }
        if args.len() != arg_names.len() || grads.len() != arg_names.len() {
            return Err(EngineError::Bind(format!(
                "expected {} argument slots, got {} args and {} grads",
                arg_names.len(),
                args.len(),
                grads.len()
            )));
        }
        if aux.len() != aux_names.len() {
            return Err(EngineError::Bind(format!(
                "expected {} auxiliary slots, got {}",
                aux_names.len(),
                aux.len()
            )));
        }

        // Seed inference with the actual bound tensor dimensions.
        let mut var_shapes: HashMap<String, Shape> = HashMap::new();
        for (name, handle) in arg_names.iter().zip(args.iter()) {
            let handle = (*handle)
                .ok_or_else(|| EngineError::Bind(format!("argument '{name}' unbound")))?;
            var_shapes.insert(name.clone(), state.tensor(handle)?.dim.slice_usize());
        }
        for (name, handle) in aux_names.iter().zip(aux.iter()) {
            let handle = (*handle)
                .ok_or_else(|| EngineError::Bind(format!("auxiliary state '{name}' unbound")))?;
            var_shapes.insert(name.clone(), state.tensor(handle)?.dim.slice_usize());
        }
        let node_shapes = state.propagate(&order, &mut var_shapes)?;

        let dtype = args
            .iter()
            .flatten()
            .next()
            .and_then(|h| state.tensors.get(h))
            .map(|b| b.dtype)
            .unwrap_or(Dtype::Float32);

        let heads = state.heads(*sym)?;
        let mut outputs = Vec::with_capacity(heads.len());
        for id in heads {
            let shape = match state.node(id)? {
                SymNode::Variable { name } => var_shapes.get(name).cloned(),
                _ => node_shapes.get(&id).cloned(),
            }
            .ok_or_else(|| {
                EngineError::Bind(format!(
                    "cannot bind: unresolved output shape for '{}'",
                    state.head_name(id).unwrap_or_default()
                ))
            })?;
            let dim = Dimension::from_shape(&shape)
                .map_err(|e| EngineError::Bind(format!("bad output shape: {e}")))?;
            let handle = state.next_id();
            state.tensors.insert(
                handle,
                TensorBuf {
                    dtype,
                    dim,
                    data: vec![0u8; dim.size_of(dtype)],
                },
            );
            outputs.push((handle, dim, dtype));
        }

        let exec_id = state.next_id();
        state.executors.insert(
            exec_id,
            Executor {
                outputs,
                grads: grads.iter().flatten().copied().collect(),
            },
        );
        Ok(exec_id)
    }

    fn outputs(&self, exec: &u64) -> EngineResult<Vec<OutputInfo<u64>>> {
        let state = self.lock();
        let executor = state
            .executors
            .get(exec)
            .ok_or_else(|| EngineError::Other(format!("unknown executor handle {exec}")))?;
        Ok(executor
            .outputs
            .iter()
            .map(|&(handle, dim, dtype)| OutputInfo {
                handle,
                dim,
                dtype,
            })
            .collect())
    }

    fn forward(&self, exec: &u64, _train: bool) -> EngineResult<()> {
        let mut state = self.lock();
        let outputs: Vec<u64> = state
            .executors
            .get(exec)
            .ok_or_else(|| EngineError::Other(format!("unknown executor handle {exec}")))?
            .outputs
            .iter()
            .map(|&(handle, _, _)| handle)
            .collect();
        for handle in outputs {
            if let Some(buf) = state.tensors.get_mut(&handle) {
                buf.data.fill(0);
            }
        }
        Ok(())
    }

    fn backward(&self, exec: &u64) -> EngineResult<()> {
        let mut state = self.lock();
        let grads = state
            .executors
            .get(exec)
            .ok_or_else(|| EngineError::Other(format!("unknown executor handle {exec}")))?
            .grads
            .clone();
        for handle in grads {
            if let Some(buf) = state.tensors.get_mut(&handle) {
                buf.data.fill(0);
            }
        }
        Ok(())
    }

    fn release_executor(&self, exec: u64) {
        let mut state = self.lock();
        if let Some(executor) = state.executors.remove(&exec) {
            for (handle, _, _) in executor.outputs {
                state.tensors.remove(&handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symnet::tensor::dim;

    #[test]
    fn seeded_fills_are_deterministic() {
        let engine = RefEngine::new();
        let a = engine.allocate(Context::Cpu, Dtype::Float32, dim([8])).unwrap();
        let b = engine.allocate(Context::Cpu, Dtype::Float32, dim([8])).unwrap();

        engine.random_seed(Context::Cpu, 42).unwrap();
        engine.fill_uniform(&a, -1.0, 1.0).unwrap();
        engine.random_seed(Context::Cpu, 42).unwrap();
        engine.fill_uniform(&b, -1.0, 1.0).unwrap();

        let mut va = vec![0u8; 32];
        let mut vb = vec![0u8; 32];
        engine.read_bytes(&a, &mut va).unwrap();
        engine.read_bytes(&b, &mut vb).unwrap();
        assert_eq!(va, vb);
    }

    #[test]
    fn freeing_twice_is_a_no_op() {
        let engine = RefEngine::new();
        let t = engine.allocate(Context::Cpu, Dtype::Float32, dim([4])).unwrap();
        assert_eq!(engine.live_tensors(), 1);
        engine.free_tensor(t);
        engine.free_tensor(t);
        assert_eq!(engine.live_tensors(), 0);
    }

    #[test]
    fn copy_convert_translates_between_dtypes() {
        let engine = RefEngine::new();
        let src = engine.allocate(Context::Cpu, Dtype::Float32, dim([3])).unwrap();
        let dst = engine.allocate(Context::Cpu, Dtype::Float16, dim([3])).unwrap();
        let mut bytes = Vec::new();
        for v in [1.0f32, -2.0, 0.5] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        engine.write_bytes(&src, &bytes).unwrap();
        engine.copy_convert(&src, &dst).unwrap();

        let mut out = vec![0u8; 6];
        engine.read_bytes(&dst, &mut out).unwrap();
        let values: Vec<f32> = out
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect();
        assert_eq!(values, vec![1.0, -2.0, 0.5]);
    }
}
