//! The narrow boundary to the external tensor-compute engine.
//!
//! The engine supplies primitive tensor operators, automatic differentiation
//! over a bound graph, device allocation and shape inference. Everything the
//! core needs from it is expressed by the [`Engine`] trait; nothing else in
//! the crate assumes how an engine is implemented.

pub mod args;
mod attr;
mod op;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::{Dimension, Dtype};

pub use args::{marshal, native_str, ArgCache, AttrPack, NativeStr, ARG_CACHE_CAPACITY};
pub use attr::AttrKey;
pub use op::OpId;

/// Device placement of a tensor or a bound executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Context {
    Cpu,
    Gpu(usize),
}

impl Default for Context {
    fn default() -> Self {
        Context::Cpu
    }
}

impl Context {
    pub fn is_gpu(self) -> bool {
        matches!(self, Context::Gpu(_))
    }

    /// Falls back to the CPU when the requested GPU does not exist. Recovery
    /// beyond this (retrying a failed graph, for example) is the caller's job.
    pub fn upgrade<E: Engine + ?Sized>(self, engine: &E) -> Context {
        match self {
            Context::Cpu => Context::Cpu,
            Context::Gpu(no) => {
                if no >= engine.gpu_count() && engine.gpu_count() == 0 {
                    Context::Cpu
                } else {
                    self
                }
            }
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Context::Cpu => write!(f, "CPU"),
            Context::Gpu(no) => write!(f, "GPU{no}"),
        }
    }
}

/// Error raised by a failed engine call. Always fatal for the operation in
/// progress; the core never retries.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("allocation failed: {0}")]
    Alloc(String),
    #[error("shape inference failed: {0}")]
    Shape(String),
    #[error("bind failed: {0}")]
    Bind(String),
    #[error("operator '{0}' is not supported by this engine")]
    Unsupported(String),
    #[error("{0}")]
    Other(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Which name list of a symbol to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    /// Argument placeholders: inputs, parameters, labels.
    Arguments,
    /// Output heads of the symbol.
    Outputs,
    /// Auxiliary state bound alongside parameters but excluded from gradients.
    AuxStates,
}

/// Which sections the shape-inference result should cover.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeRequest {
    pub arguments: bool,
    pub outputs: bool,
    pub aux_states: bool,
}

/// One executor output as reported by the engine. The executor owns the
/// tensor storage; callers only view it.
#[derive(Debug, Clone)]
pub struct OutputInfo<H> {
    pub handle: H,
    pub dim: Dimension,
    pub dtype: Dtype,
}

/// The external tensor-compute engine.
///
/// Handles are opaque; the engine owns all native resources behind them and
/// frees them on the matching `release`/`free` call. Every call is
/// synchronous and may block indefinitely; nothing here is cancellable.
pub trait Engine: Send + Sync + 'static {
    type TensorHandle: Clone + PartialEq + fmt::Debug + Send + Sync;
    type SymbolHandle: Clone + PartialEq + fmt::Debug + Send + Sync;
    type ExecutorHandle: fmt::Debug + Send + Sync;

    fn name(&self) -> &'static str;
    fn gpu_count(&self) -> usize;

    // -- tensors -----------------------------------------------------------

    fn allocate(
        &self,
        ctx: Context,
        dtype: Dtype,
        dim: Dimension,
    ) -> EngineResult<Self::TensorHandle>;

    /// Frees a tensor. Freeing an already-freed handle is a no-op.
    fn free_tensor(&self, handle: Self::TensorHandle);

    fn read_bytes(&self, handle: &Self::TensorHandle, out: &mut [u8]) -> EngineResult<()>;
    fn write_bytes(&self, handle: &Self::TensorHandle, data: &[u8]) -> EngineResult<()>;

    /// Copies `src` into `dst`, converting element types as needed.
    fn copy_convert(
        &self,
        src: &Self::TensorHandle,
        dst: &Self::TensorHandle,
    ) -> EngineResult<()>;

    // -- random state and fills -------------------------------------------

    /// Seeds the device random generator shared by all fills on `ctx`.
    fn random_seed(&self, ctx: Context, seed: u64) -> EngineResult<()>;

    fn fill_zeros(&self, handle: &Self::TensorHandle) -> EngineResult<()>;
    fn fill_add_scalar(&self, handle: &Self::TensorHandle, value: f32) -> EngineResult<()>;
    fn fill_uniform(&self, handle: &Self::TensorHandle, low: f32, high: f32) -> EngineResult<()>;
    fn fill_normal(&self, handle: &Self::TensorHandle, loc: f32, scale: f32) -> EngineResult<()>;

    // -- fused optimizer primitives ---------------------------------------

    fn sgd_update(
        &self,
        param: &Self::TensorHandle,
        grad: &Self::TensorHandle,
        lr: f32,
        wd: f32,
    ) -> EngineResult<()>;

    fn sgd_mom_update(
        &self,
        param: &Self::TensorHandle,
        grad: &Self::TensorHandle,
        mom: &Self::TensorHandle,
        lr: f32,
        momentum: f32,
        wd: f32,
    ) -> EngineResult<()>;

    #[allow(clippy::too_many_arguments)]
    fn adam_update(
        &self,
        param: &Self::TensorHandle,
        grad: &Self::TensorHandle,
        mean: &Self::TensorHandle,
        var: &Self::TensorHandle,
        lr: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        wd: f32,
    ) -> EngineResult<()>;

    // -- symbolic nodes ----------------------------------------------------

    fn create_variable(&self, name: &str) -> EngineResult<Self::SymbolHandle>;

    fn create_operator(&self, op: OpId, attrs: &AttrPack) -> EngineResult<Self::SymbolHandle>;

    /// Names a created operator and wires its ordered inputs.
    fn compose(
        &self,
        op: &Self::SymbolHandle,
        name: &str,
        args: &[Self::SymbolHandle],
    ) -> EngineResult<()>;

    fn group(&self, members: &[Self::SymbolHandle]) -> EngineResult<Self::SymbolHandle>;

    /// Releases a symbol handle. Releasing twice is a no-op.
    fn release_symbol(&self, handle: Self::SymbolHandle);

    fn list_names(&self, sym: &Self::SymbolHandle, kind: NameKind) -> EngineResult<Vec<String>>;

    /// Infers shapes for the requested sections given a partial assignment of
    /// argument shapes. Names the engine cannot resolve are omitted from the
    /// result rather than reported as errors.
    fn infer_shapes(
        &self,
        sym: &Self::SymbolHandle,
        known: &[(String, Vec<usize>)],
        request: ShapeRequest,
    ) -> EngineResult<BTreeMap<String, Vec<usize>>>;

    /// Serializes a symbol graph to the engine's self-describing text form.
    fn to_text(&self, sym: &Self::SymbolHandle) -> EngineResult<String>;

    // -- executors ---------------------------------------------------------

    /// Binds a symbol graph to an executor. `args`, `grads` and `aux` are
    /// positional against the symbol's argument and aux-state name lists; a
    /// `None` gradient slot means no gradient is requested for that argument.
    fn bind(
        &self,
        sym: &Self::SymbolHandle,
        ctx: Context,
        args: &[Option<Self::TensorHandle>],
        grads: &[Option<Self::TensorHandle>],
        aux: &[Option<Self::TensorHandle>],
    ) -> EngineResult<Self::ExecutorHandle>;

    fn outputs(
        &self,
        exec: &Self::ExecutorHandle,
    ) -> EngineResult<Vec<OutputInfo<Self::TensorHandle>>>;

    /// Runs a forward pass; blocks until the engine completes it.
    fn forward(&self, exec: &Self::ExecutorHandle, train: bool) -> EngineResult<()>;

    /// Runs a backward pass over the most recent forward.
    fn backward(&self, exec: &Self::ExecutorHandle) -> EngineResult<()>;

    /// Releases an executor. Releasing twice is a no-op.
    fn release_executor(&self, exec: Self::ExecutorHandle);
}
