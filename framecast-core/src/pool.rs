//! Reference-counted frame buffer pool
//!
//! The pool hands out at most `max_buffers` concurrently-reserved buffers,
//! keyed by shape (resolution x pixel format x storage kind). Reservation
//! never blocks: when every slot is reserved the producer gets nothing back
//! and is expected to drop the frame. Buffer memory is allocated lazily per
//! distinct shape and retained until the slot is retired or the pool dropped.

use crate::frame::{BufferId, StorageKind, VideoPixelFormat, VideoResolution};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The shape of a buffer: everything that determines its byte layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferShape {
    /// Frame resolution
    pub resolution: VideoResolution,
    /// Pixel format
    pub pixel_format: VideoPixelFormat,
    /// Backing storage kind
    pub storage: StorageKind,
}

impl BufferShape {
    /// Bytes needed for one frame of this shape
    pub fn byte_size(&self) -> usize {
        self.pixel_format.allocation_size(self.resolution)
    }
}

/// Clonable view of a buffer's backing memory.
///
/// This is the platform-handle analog handed to clients on buffer-created
/// notifications so they can map the frame bytes. Cloning shares the same
/// backing region; it carries no pool reference count.
#[derive(Clone, Debug)]
pub struct BufferMapping {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl BufferMapping {
    fn new(len: usize) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(vec![0u8; len])),
        }
    }

    /// Size of the backing region in bytes
    pub fn byte_size(&self) -> usize {
        self.bytes.read().len()
    }

    /// Read access to the frame bytes
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.bytes.read()
    }

    /// Write access to the frame bytes
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.bytes.write()
    }
}

struct Slot {
    id: BufferId,
    shape: BufferShape,
    mapping: BufferMapping,
    refcount: usize,
}

struct PoolInner {
    max_buffers: usize,
    next_id: u32,
    slots: Vec<Slot>,
    // Resurrection candidate: cleared by any reservation touching its slot.
    last_produced: Option<BufferId>,
}

impl PoolInner {
    fn allocate(&mut self, shape: BufferShape) -> (BufferId, BufferMapping) {
        let id = BufferId(self.next_id);
        self.next_id += 1;
        let mapping = BufferMapping::new(shape.byte_size());
        self.slots.push(Slot {
            id,
            shape,
            mapping: mapping.clone(),
            refcount: 1,
        });
        (id, mapping)
    }

    fn add_ref(&mut self, id: BufferId) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.id == id) {
            slot.refcount += 1;
        }
    }

    fn release(&mut self, id: BufferId, producer: bool) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.id == id) {
            slot.refcount = slot.refcount.saturating_sub(1);
        }
        if producer {
            self.last_produced = Some(id);
        }
    }

    fn reserved_count(&self) -> usize {
        self.slots.iter().filter(|s| s.refcount > 0).count()
    }
}

/// Outcome of a reservation attempt
pub struct Reservation {
    /// The reserved buffer, or `None` when every slot is taken (the
    /// backpressure signal; the caller drops the frame)
    pub handle: Option<BufferHandle>,
    /// A slot retired to make room; clients that knew this id must be told
    /// the buffer is gone
    pub retired: Option<BufferId>,
}

/// Fixed-capacity pool of reusable frame buffers.
///
/// Cheap to clone; all clones share the same slots. Only the controller's
/// execution context mutates reference counts, via [`BufferHandle`] clones
/// and drops.
#[derive(Clone)]
pub struct FrameBufferPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl FrameBufferPool {
    /// Create a pool with at most `max_buffers` concurrently-reserved slots
    pub fn new(max_buffers: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                max_buffers,
                next_id: 1,
                slots: Vec::new(),
                last_produced: None,
            })),
        }
    }

    /// Reserve a buffer for the producer, refcount 1.
    ///
    /// Reuses a free slot of the same shape when one exists (the same id
    /// resurfaces), allocates a new slot while under capacity, and otherwise
    /// retires a free slot of a different shape. Returns no handle when all
    /// slots are reserved; never blocks.
    pub fn reserve(
        &self,
        resolution: VideoResolution,
        pixel_format: VideoPixelFormat,
        storage: StorageKind,
    ) -> Reservation {
        let shape = BufferShape {
            resolution,
            pixel_format,
            storage,
        };
        let mut inner = self.inner.lock();

        if let Some(i) = inner
            .slots
            .iter()
            .position(|s| s.refcount == 0 && s.shape == shape)
        {
            inner.slots[i].refcount = 1;
            let id = inner.slots[i].id;
            let mapping = inner.slots[i].mapping.clone();
            if inner.last_produced == Some(id) {
                inner.last_produced = None;
            }
            return Reservation {
                handle: Some(self.make_handle(id, shape, mapping)),
                retired: None,
            };
        }

        if inner.slots.len() < inner.max_buffers {
            let (id, mapping) = inner.allocate(shape);
            return Reservation {
                handle: Some(self.make_handle(id, shape, mapping)),
                retired: None,
            };
        }

        if let Some(i) = inner.slots.iter().position(|s| s.refcount == 0) {
            let retired = inner.slots.swap_remove(i).id;
            if inner.last_produced == Some(retired) {
                inner.last_produced = None;
            }
            debug!(buffer = %retired, "retiring pool slot for new shape");
            let (id, mapping) = inner.allocate(shape);
            return Reservation {
                handle: Some(self.make_handle(id, shape, mapping)),
                retired: Some(retired),
            };
        }

        Reservation {
            handle: None,
            retired: None,
        }
    }

    /// Re-reserve the most recently produced buffer without reallocating.
    ///
    /// Succeeds only if that buffer's shape matches the request, its
    /// refcount is zero, and no reservation has touched the slot since it
    /// was produced.
    pub fn resurrect_last(
        &self,
        resolution: VideoResolution,
        pixel_format: VideoPixelFormat,
        storage: StorageKind,
    ) -> Option<BufferHandle> {
        let shape = BufferShape {
            resolution,
            pixel_format,
            storage,
        };
        let mut inner = self.inner.lock();
        let id = inner.last_produced?;
        let slot = inner.slots.iter_mut().find(|s| s.id == id)?;
        if slot.refcount != 0 || slot.shape != shape {
            return None;
        }
        slot.refcount = 1;
        let mapping = slot.mapping.clone();
        Some(self.make_handle(id, shape, mapping))
    }

    /// Fraction of slots currently reserved, in [0, 1]
    pub fn utilization(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.max_buffers == 0 {
            return 1.0;
        }
        inner.reserved_count() as f64 / inner.max_buffers as f64
    }

    /// Number of slots currently reserved
    pub fn reserved_count(&self) -> usize {
        self.inner.lock().reserved_count()
    }

    /// Maximum number of concurrently-reserved slots
    pub fn capacity(&self) -> usize {
        self.inner.lock().max_buffers
    }

    fn make_handle(&self, id: BufferId, shape: BufferShape, mapping: BufferMapping) -> BufferHandle {
        BufferHandle {
            pool: self.inner.clone(),
            id,
            shape,
            mapping,
            producer: true,
        }
    }
}

impl fmt::Debug for FrameBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FrameBufferPool")
            .field("max_buffers", &inner.max_buffers)
            .field("reserved", &inner.reserved_count())
            .finish()
    }
}

/// Reference-counted handle to a reserved pool buffer.
///
/// Cloning adds a reference (one per fanned-out client delivery); dropping
/// releases it. When the last reference drops the slot returns to free.
/// Dropping the producer-side handle additionally marks the buffer as the
/// resurrection candidate.
pub struct BufferHandle {
    pool: Arc<Mutex<PoolInner>>,
    id: BufferId,
    shape: BufferShape,
    mapping: BufferMapping,
    producer: bool,
}

impl BufferHandle {
    /// The buffer's pool-wide id
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// The buffer's shape
    pub fn shape(&self) -> BufferShape {
        self.shape
    }

    /// Size of the backing region in bytes
    pub fn byte_size(&self) -> usize {
        self.mapping.byte_size()
    }

    /// The backing memory, for mapping by producers and clients
    pub fn mapping(&self) -> BufferMapping {
        self.mapping.clone()
    }
}

impl Clone for BufferHandle {
    fn clone(&self) -> Self {
        self.pool.lock().add_ref(self.id);
        Self {
            pool: self.pool.clone(),
            id: self.id,
            shape: self.shape,
            mapping: self.mapping.clone(),
            producer: false,
        }
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        self.pool.lock().release(self.id, self.producer);
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("id", &self.id)
            .field("shape", &self.shape)
            .field("producer", &self.producer)
            .finish()
    }
}
