//! Reusable pixel buffers.
//!
//! Every poll cycle captures a frame of (almost always) the same shape.
//! The pool keeps up to `cap` free buffers per exact shape so steady-state
//! scanning does not allocate per frame.

use std::collections::HashMap;
use std::sync::Mutex;

/// Default number of free buffers kept per shape.
pub const DEFAULT_POOL_CAP: usize = 5;

/// Shapes pre-allocated by [`BufferPool::prewarm_common`]: HD, Full HD,
/// the default scan window, and a 40% downscale of 1600×1200.
pub const COMMON_SHAPES: [Shape; 4] = [
    Shape::new(720, 1280, 3),
    Shape::new(1080, 1920, 3),
    Shape::new(800, 800, 3),
    Shape::new(480, 640, 3),
];

// ── Shape ────────────────────────────────────────────────────────

/// Exact buffer geometry used as the pool bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    pub height: u32,
    pub width: u32,
    pub channels: u8,
}

impl Shape {
    pub const fn new(height: u32, width: u32, channels: u8) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Bytes needed to hold one image of this shape.
    pub const fn byte_len(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }
}

// ── Buffer ───────────────────────────────────────────────────────

/// A pixel buffer tagged with the shape it was allocated for.
#[derive(Debug, Default)]
pub struct Buffer {
    shape: Shape,
    data: Vec<u8>,
}

impl Buffer {
    /// Allocate a zeroed buffer.
    pub fn zeroed(shape: Shape) -> Self {
        Self {
            shape,
            data: vec![0; shape.byte_len()],
        }
    }

    /// Adopt an existing byte vector.
    pub fn from_vec(height: u32, width: u32, channels: u8, data: Vec<u8>) -> Self {
        Self {
            shape: Shape::new(height, width, channels),
            data,
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

// ── PoolStats ────────────────────────────────────────────────────

/// Snapshot of what the pool currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Distinct shapes with a bucket.
    pub shapes: usize,
    /// Free buffers across all buckets.
    pub buffers: usize,
    /// Bytes held by free buffers.
    pub bytes: usize,
}

// ── BufferPool ───────────────────────────────────────────────────

/// Shape-bucketed free list guarded by a single mutex.
#[derive(Debug)]
pub struct BufferPool {
    cap: usize,
    free: Mutex<HashMap<Shape, Vec<Buffer>>>,
}

impl BufferPool {
    /// Pool with the default per-shape cap of 5.
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_POOL_CAP)
    }

    /// Pool keeping at most `cap` free buffers per shape.
    pub fn with_cap(cap: usize) -> Self {
        Self {
            cap,
            free: Mutex::new(HashMap::new()),
        }
    }

    /// Per-shape cap.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Pop a free buffer of exactly this shape, or allocate a new one.
    pub fn acquire(&self, height: u32, width: u32, channels: u8) -> Buffer {
        let shape = Shape::new(height, width, channels);
        let reused = self
            .lock()
            .get_mut(&shape)
            .and_then(|bucket| bucket.pop());
        reused.unwrap_or_else(|| Buffer::zeroed(shape))
    }

    /// Hand a buffer back. Dropped if its bucket is already full or the
    /// buffer no longer matches its shape.
    pub fn release(&self, buffer: Buffer) {
        if buffer.len() != buffer.shape.byte_len() || buffer.is_empty() {
            return;
        }
        let mut free = self.lock();
        let bucket = free.entry(buffer.shape).or_default();
        if bucket.len() < self.cap {
            bucket.push(buffer);
        }
    }

    /// Pre-allocate `per_shape` buffers for each shape (bounded by the cap).
    pub fn prewarm(&self, shapes: &[Shape], per_shape: usize) {
        let mut free = self.lock();
        for shape in shapes {
            let bucket = free.entry(*shape).or_default();
            while bucket.len() < per_shape.min(self.cap) {
                bucket.push(Buffer::zeroed(*shape));
            }
        }
    }

    /// Pre-allocate two buffers for each of [`COMMON_SHAPES`].
    pub fn prewarm_common(&self) {
        self.prewarm(&COMMON_SHAPES, 2);
    }

    /// Free buffers currently held for `shape`.
    pub fn available(&self, shape: Shape) -> usize {
        self.lock().get(&shape).map_or(0, Vec::len)
    }

    /// Drop every free buffer.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> PoolStats {
        let free = self.lock();
        PoolStats {
            shapes: free.len(),
            buffers: free.values().map(Vec::len).sum(),
            bytes: free.values().flatten().map(Buffer::len).sum(),
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Shape, Vec<Buffer>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_allocates_zeroed_when_empty() {
        let pool = BufferPool::new();
        let buf = pool.acquire(2, 3, 3);
        assert_eq!(buf.len(), 18);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn released_buffer_is_reused() {
        let pool = BufferPool::new();
        let mut buf = pool.acquire(2, 2, 3);
        buf.as_mut_slice()[0] = 42;
        pool.release(buf);
        assert_eq!(pool.available(Shape::new(2, 2, 3)), 1);

        let again = pool.acquire(2, 2, 3);
        assert_eq!(again.as_slice()[0], 42);
        assert_eq!(pool.available(Shape::new(2, 2, 3)), 0);
    }

    #[test]
    fn shapes_do_not_mix() {
        let pool = BufferPool::new();
        pool.release(Buffer::zeroed(Shape::new(4, 4, 3)));
        let other = pool.acquire(4, 4, 4);
        assert_eq!(other.shape(), Shape::new(4, 4, 4));
        assert_eq!(pool.available(Shape::new(4, 4, 3)), 1);
    }

    #[test]
    fn release_at_capacity_does_not_grow() {
        let pool = BufferPool::with_cap(2);
        let shape = Shape::new(1, 1, 3);
        for _ in 0..5 {
            pool.release(Buffer::zeroed(shape));
        }
        assert_eq!(pool.available(shape), 2);

        pool.release(Buffer::zeroed(shape));
        assert_eq!(pool.available(shape), 2);
        assert_eq!(pool.stats().buffers, 2);
    }

    #[test]
    fn prewarm_respects_cap_and_reports_stats() {
        let pool = BufferPool::with_cap(1);
        pool.prewarm(&[Shape::new(2, 2, 3), Shape::new(1, 1, 3)], 4);
        let stats = pool.stats();
        assert_eq!(stats.shapes, 2);
        assert_eq!(stats.buffers, 2);
        assert_eq!(stats.bytes, 12 + 3);

        pool.clear();
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn mismatched_buffer_is_not_pooled() {
        let pool = BufferPool::new();
        pool.release(Buffer::from_vec(2, 2, 3, vec![0; 5]));
        assert_eq!(pool.stats().buffers, 0);
    }
}
