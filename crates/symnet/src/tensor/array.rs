//! Owning wrapper around one native tensor handle.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, ensure, Result};
use half::f16;

use crate::engine::{Context, Engine};
use crate::tensor::{Dimension, Dtype};

static ARRAY_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a tensor array. Two differently-named
/// parameters never alias, and renaming does not affect identity; optimizer
/// state is keyed by this, never by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayId(u64);

/// Typed element of a tensor array, convertible to and from the raw byte form
/// crossing the engine boundary.
pub trait Element: Copy + private::Sealed {
    const DTYPE: Dtype;

    fn encode(values: &[Self]) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> Vec<Self>;
}

mod private {
    pub trait Sealed {}
}

macro_rules! element_impl {
    ($ty:ty, $dtype:expr) => {
        impl private::Sealed for $ty {}

        impl Element for $ty {
            const DTYPE: Dtype = $dtype;

            fn encode(values: &[Self]) -> Vec<u8> {
                let mut out = Vec::with_capacity(values.len() * std::mem::size_of::<$ty>());
                for v in values {
                    out.extend_from_slice(&v.to_le_bytes());
                }
                out
            }

            fn decode(bytes: &[u8]) -> Vec<Self> {
                const W: usize = std::mem::size_of::<$ty>();
                bytes
                    .chunks_exact(W)
                    .map(|c| <$ty>::from_le_bytes(c.try_into().expect("chunk width")))
                    .collect()
            }
        }
    };
}

element_impl!(f32, Dtype::Float32);
element_impl!(f64, Dtype::Float64);
element_impl!(i8, Dtype::Int8);
element_impl!(u8, Dtype::Uint8);
element_impl!(i32, Dtype::Int32);
element_impl!(i64, Dtype::Int64);

/// Wraps exactly one native tensor handle together with its element type,
/// dimension and device placement.
///
/// An array is exclusively owned by whichever map holds it; the handle is
/// freed when the array is released or dropped. Arrays wrapping executor
/// outputs are non-owning views and never free their handle.
pub struct TensorArray<E: Engine> {
    engine: Arc<E>,
    ctx: Context,
    dim: Dimension,
    dtype: Dtype,
    handle: Option<E::TensorHandle>,
    owned: bool,
    id: ArrayId,
}

impl<E: Engine> TensorArray<E> {
    /// Allocates a fresh tensor on `ctx`. The dimension must be fully
    /// resolved and within rank bounds.
    pub fn new(engine: &Arc<E>, ctx: Context, dtype: Dtype, dim: Dimension) -> Result<Self> {
        ensure!(
            dim.good(),
            "failed to create array {dtype}{dim}: bad dimension"
        );
        let handle = engine.allocate(ctx, dtype, dim)?;
        Ok(TensorArray {
            engine: Arc::clone(engine),
            ctx,
            dim,
            dtype,
            handle: Some(handle),
            owned: true,
            id: ArrayId(ARRAY_ID_COUNTER.fetch_add(1, Ordering::Relaxed)),
        })
    }

    /// Wraps an executor-owned output tensor without taking ownership.
    pub(crate) fn view(
        engine: &Arc<E>,
        ctx: Context,
        dtype: Dtype,
        dim: Dimension,
        handle: E::TensorHandle,
    ) -> Self {
        TensorArray {
            engine: Arc::clone(engine),
            ctx,
            dim,
            dtype,
            handle: Some(handle),
            owned: false,
            id: ArrayId(ARRAY_ID_COUNTER.fetch_add(1, Ordering::Relaxed)),
        }
    }

    pub fn id(&self) -> ArrayId {
        self.id
    }

    pub fn ctx(&self) -> Context {
        self.ctx
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn dim(&self) -> Dimension {
        self.dim
    }

    /// Byte size of the whole array.
    pub fn size(&self) -> usize {
        self.dim.size_of(self.dtype)
    }

    pub(crate) fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// The wrapped native handle. Using a released array is a logic error.
    pub fn handle(&self) -> &E::TensorHandle {
        self.handle.as_ref().expect("tensor array already released")
    }

    /// Frees the native handle. Safe to call more than once; a view never
    /// frees the executor's storage.
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            if self.owned {
                self.engine.free_tensor(handle);
            }
        }
    }

    /// Allocates an uninitialized array with this one's placement and shape.
    pub fn new_like(&self) -> Result<Self> {
        TensorArray::new(&self.engine, self.ctx, self.dtype, self.dim)
    }

    /// Copies into a freshly allocated array of `dtype` on `ctx`, converting
    /// element types.
    pub fn copy_as(&self, ctx: Context, dtype: Dtype) -> Result<Self> {
        let out = TensorArray::new(&self.engine, ctx, dtype, self.dim)?;
        self.engine.copy_convert(self.handle(), out.handle())?;
        Ok(out)
    }

    /// Overwrites the array with `values`. The element type must match the
    /// array's dtype; a `Float16` array accepts `f32` values through a
    /// staging copy.
    pub fn set_values<T: Element>(&self, values: &[T]) -> Result<()> {
        ensure!(
            values.len() == self.dim.total(),
            "value count {} does not match array {} ({} elements)",
            values.len(),
            self.dim,
            self.dim.total()
        );
        if self.dtype == Dtype::Float16 {
            ensure!(
                T::DTYPE == Dtype::Float32,
                "Float16 arrays accept only f32 values"
            );
            let staging = TensorArray::new(&self.engine, Context::Cpu, Dtype::Float32, self.dim)?;
            staging.engine.write_bytes(staging.handle(), &T::encode(values))?;
            self.engine.copy_convert(staging.handle(), self.handle())?;
            return Ok(());
        }
        ensure!(
            T::DTYPE == self.dtype,
            "cannot set {} values on a {} array",
            T::DTYPE,
            self.dtype
        );
        self.engine.write_bytes(self.handle(), &T::encode(values))?;
        Ok(())
    }

    /// Reads the array back as `T`, converting through a staging copy when
    /// the dtype differs. `Float16` cannot be read directly.
    pub fn values<T: Element>(&self) -> Result<Vec<T>> {
        if self.dtype == T::DTYPE {
            let mut bytes = vec![0u8; self.size()];
            self.engine.read_bytes(self.handle(), &mut bytes)?;
            return Ok(T::decode(&bytes));
        }
        let staging = self.copy_as(Context::Cpu, T::DTYPE)?;
        staging.values()
    }

    pub fn values_f32(&self) -> Result<Vec<f32>> {
        self.values::<f32>()
    }

    /// Copies the array into `dst`, converting element types as needed.
    pub fn copy_values_to<T: Element>(&self, dst: &mut [T]) -> Result<()> {
        let values = self.values::<T>()?;
        ensure!(
            dst.len() == values.len(),
            "destination holds {} elements, array has {}",
            dst.len(),
            values.len()
        );
        dst.copy_from_slice(&values);
        Ok(())
    }

    /// Raw little-endian bytes of the array.
    pub fn raw(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; self.size()];
        self.engine.read_bytes(self.handle(), &mut bytes)?;
        Ok(bytes)
    }

    /// Reads a `Float16` array as `f32` values.
    pub fn values_f16_as_f32(&self) -> Result<Vec<f32>> {
        if self.dtype != Dtype::Float16 {
            bail!("array is {}, not Float16", self.dtype);
        }
        let bytes = self.raw()?;
        Ok(bytes
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect())
    }
}

impl<E: Engine> Drop for TensorArray<E> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<E: Engine> fmt::Debug for TensorArray<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorArray")
            .field("dtype", &self.dtype)
            .field("dim", &self.dim.to_string())
            .field("ctx", &self.ctx)
            .field("released", &self.handle.is_none())
            .finish()
    }
}
