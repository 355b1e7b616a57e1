use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{DispatchError, Result};

static BUFFER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

type Storage = Mutex<Box<[u8]>>;

/// Host-resident memory that a slot reads frames from or writes results to.
///
/// `HostBuffer` is the owning side: dropping the last `HostBuffer` frees the
/// memory. Slots and in-flight jobs only ever hold a [`BufferRef`], which
/// stops resolving once the owner is gone.
pub struct HostBuffer {
    id: u64,
    storage: Arc<Storage>,
    len: usize,
}

impl HostBuffer {
    /// Allocate `len` zeroed bytes.
    ///
    /// The reservation is fallible: running out of host memory is reported
    /// as [`DispatchError::HostOutOfMemory`] instead of aborting the process.
    pub fn alloc(len: usize) -> Result<Self> {
        let mut data: Vec<u8> = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| DispatchError::HostOutOfMemory {
                requested: len,
                available: 0,
            })?;
        data.resize(len, 0);

        Ok(Self {
            id: BUFFER_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            storage: Arc::new(Mutex::new(data.into_boxed_slice())),
            len,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Non-owning reference suitable for binding into a slot.
    pub fn downgrade(&self) -> BufferRef {
        BufferRef {
            id: self.id,
            storage: Arc::downgrade(&self.storage),
            len: self.len,
        }
    }

    /// Copy of the current contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.storage.lock().to_vec()
    }
}

impl std::fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuffer")
            .field("id", &self.id)
            .field("len", &self.len)
            .finish()
    }
}

/// Non-owning handle to a [`HostBuffer`].
#[derive(Clone)]
pub struct BufferRef {
    id: u64,
    storage: Weak<Storage>,
    len: usize,
}

impl BufferRef {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the owning buffer is still alive.
    pub fn is_live(&self) -> bool {
        self.storage.strong_count() > 0
    }

    /// Run `f` with shared access to the bytes.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let storage = self
            .storage
            .upgrade()
            .ok_or(DispatchError::BufferReleased { id: self.id })?;
        let guard = storage.lock();
        Ok(f(&guard))
    }

    /// Run `f` with exclusive access to the bytes.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let storage = self
            .storage
            .upgrade()
            .ok_or(DispatchError::BufferReleased { id: self.id })?;
        let mut guard = storage.lock();
        Ok(f(&mut guard))
    }

    /// Copy of the current contents.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.with(|bytes| bytes.to_vec())
    }
}

impl std::fmt::Debug for BufferRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferRef")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("live", &self.is_live())
            .finish()
    }
}
