use std::sync::atomic::{AtomicU64, Ordering};

use accelpipe_core::{DispatchError, HostBuffer, ProcessingSlot, Result};

static ARENA_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Input and output memory owned on behalf of one slot.
#[derive(Debug)]
pub struct SlotBuffers {
    pub input: HostBuffer,
    pub output: HostBuffer,
}

impl SlotBuffers {
    fn size(&self) -> usize {
        self.input.len() + self.output.len()
    }
}

/// Owns the host memory bound into every slot of a pool.
///
/// Buffers are sized from each slot's own requirements and allocated once,
/// before the first frame. Slots only receive non-owning references, so
/// releasing a binding really frees it even if a slot forgets to unbind.
pub struct BufferArena {
    id: u64,
    bindings: Vec<Option<SlotBuffers>>,
    limit: Option<usize>,
    total_allocated: usize,
}

impl BufferArena {
    pub fn new() -> Self {
        Self {
            id: ARENA_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            bindings: Vec::new(),
            limit: None,
            total_allocated: 0,
        }
    }

    /// Cap the total bytes this arena may hold.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Total bytes currently held across all bindings.
    pub fn total_allocated(&self) -> usize {
        self.total_allocated
    }

    /// Number of slots currently holding buffers.
    pub fn live_bindings(&self) -> usize {
        self.bindings.iter().filter(|b| b.is_some()).count()
    }

    pub fn binding(&self, index: usize) -> Option<&SlotBuffers> {
        self.bindings.get(index).and_then(Option::as_ref)
    }

    /// Allocate input and output memory for `slot` and bind it.
    ///
    /// A previous binding at `index` is released first. On failure nothing
    /// is retained for `index`.
    pub fn bind<S: ProcessingSlot + ?Sized>(&mut self, index: usize, slot: &mut S) -> Result<()> {
        self.release(index, slot);

        let in_size = slot.input_size();
        let out_size = slot.output_size();
        if in_size == 0 || out_size == 0 {
            return Err(DispatchError::Config(format!(
                "slot {} reports a zero-sized buffer (input {in_size}, output {out_size})",
                slot.label()
            )));
        }

        let requested = in_size + out_size;
        if let Some(limit) = self.limit {
            let available = limit.saturating_sub(self.total_allocated);
            if requested > available {
                return Err(DispatchError::HostOutOfMemory {
                    requested,
                    available,
                });
            }
        }

        let buffers = SlotBuffers {
            input: HostBuffer::alloc(in_size)?,
            output: HostBuffer::alloc(out_size)?,
        };
        slot.bind_buffers(buffers.input.downgrade(), buffers.output.downgrade())?;

        if self.bindings.len() <= index {
            self.bindings.resize_with(index + 1, || None);
        }
        self.total_allocated += buffers.size();
        self.bindings[index] = Some(buffers);

        tracing::debug!(
            arena = self.id,
            slot = slot.label(),
            index,
            in_size,
            out_size,
            total = self.total_allocated,
            "bound slot buffers"
        );

        Ok(())
    }

    /// Unbind `slot` and free its buffers.
    ///
    /// Safe on a slot that was never bound or already released. Returns
    /// whether any memory was freed.
    pub fn release<S: ProcessingSlot + ?Sized>(&mut self, index: usize, slot: &mut S) -> bool {
        slot.unbind_buffers();

        let Some(buffers) = self.bindings.get_mut(index).and_then(Option::take) else {
            return false;
        };
        self.total_allocated -= buffers.size();

        tracing::debug!(
            arena = self.id,
            slot = slot.label(),
            index,
            total = self.total_allocated,
            "released slot buffers"
        );
        true
    }

    /// Bind every slot of a pool, index by index.
    ///
    /// If any slot fails, everything bound so far is released again.
    pub fn bind_all<S: ProcessingSlot>(&mut self, slots: &mut [S]) -> Result<()> {
        for index in 0..slots.len() {
            if let Err(e) = self.bind(index, &mut slots[index]) {
                tracing::error!(arena = self.id, index, error = %e, "slot buffer binding failed");
                self.release_all(slots);
                return Err(e);
            }
        }

        tracing::info!(
            arena = self.id,
            slots = slots.len(),
            total_kb = self.total_allocated / 1024,
            "host buffers allocated"
        );
        Ok(())
    }

    /// Release every binding of a pool. Returns the number of slots freed.
    pub fn release_all<S: ProcessingSlot>(&mut self, slots: &mut [S]) -> usize {
        let mut freed = 0;
        for (index, slot) in slots.iter_mut().enumerate() {
            if self.release(index, slot) {
                freed += 1;
            }
        }
        freed
    }
}

impl Default for BufferArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BufferArena {
    fn drop(&mut self) {
        let live = self.live_bindings();
        if live > 0 {
            tracing::debug!(arena = self.id, live, "arena dropped with live bindings");
        }
    }
}
