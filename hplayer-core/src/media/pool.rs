//! Pooled payload arenas
//!
//! Decoded sample and pixel memory is recycled through role-keyed free lists
//! instead of being allocated per frame. A `Pooled<T>` owns its storage and
//! hands it back to the pool when dropped, so a frame's payload is released
//! exactly when the frame is popped-and-rendered, flushed or shut down.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Default number of idle buffers kept per role
const DEFAULT_MAX_IDLE: usize = 32;

type FreeList<T> = Mutex<Vec<Vec<T>>>;

/// Payload role: which free list a buffer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadRole {
    /// Interleaved f32 audio samples
    Audio,
    /// Raw pixel bytes
    Video,
}

/// Role-keyed buffer pool shared by every Track of a Source
#[derive(Clone)]
pub struct PayloadPool {
    samples: Arc<FreeList<f32>>,
    pixels: Arc<FreeList<u8>>,
    max_idle: usize,
}

impl PayloadPool {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    /// Pool that keeps at most `max_idle` spare buffers per role
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(Vec::new())),
            pixels: Arc::new(Mutex::new(Vec::new())),
            max_idle,
        }
    }

    /// Sample arena of exactly `len` zeroed values
    pub fn acquire_samples(&self, len: usize) -> Pooled<f32> {
        Pooled::acquire(&self.samples, len, self.max_idle)
    }

    /// Pixel arena of exactly `len` zeroed bytes
    pub fn acquire_pixels(&self, len: usize) -> Pooled<u8> {
        Pooled::acquire(&self.pixels, len, self.max_idle)
    }

    /// Number of spare buffers currently parked for a role
    pub fn idle_count(&self, role: PayloadRole) -> usize {
        match role {
            PayloadRole::Audio => self.samples.lock().len(),
            PayloadRole::Video => self.pixels.lock().len(),
        }
    }

    /// Release every parked buffer
    pub fn clear(&self) {
        let freed = {
            let mut samples = self.samples.lock();
            let mut pixels = self.pixels.lock();
            let freed = samples.len() + pixels.len();
            samples.clear();
            pixels.clear();
            freed
        };
        trace!("Payload pool cleared ({} buffers freed)", freed);
    }
}

impl Default for PayloadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PayloadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadPool")
            .field("idle_samples", &self.samples.lock().len())
            .field("idle_pixels", &self.pixels.lock().len())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

/// Owned arena with explicit length tracking
///
/// The backing vector may be larger than `len` after reuse; only the first
/// `len` values are part of the payload.
pub struct Pooled<T: Copy + Default> {
    data: Vec<T>,
    len: usize,
    home: Weak<FreeList<T>>,
    max_idle: usize,
}

impl<T: Copy + Default> Pooled<T> {
    fn acquire(list: &Arc<FreeList<T>>, len: usize, max_idle: usize) -> Self {
        let mut data = list.lock().pop().unwrap_or_default();
        data.clear();
        data.resize(len, T::default());
        Self {
            data,
            len,
            home: Arc::downgrade(list),
            max_idle,
        }
    }

    /// Arena that is not attached to any pool
    pub fn detached(data: Vec<T>) -> Self {
        let len = data.len();
        Self {
            data,
            len,
            home: Weak::new(),
            max_idle: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Payload size in bytes
    pub fn size_bytes(&self) -> usize {
        self.len * std::mem::size_of::<T>()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data[..self.len]
    }

    /// Shrink the payload to `len` values (never grows)
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }
}

impl<T: Copy + Default> Drop for Pooled<T> {
    fn drop(&mut self) {
        let Some(list) = self.home.upgrade() else {
            return;
        };
        let mut list = list.lock();
        if list.len() < self.max_idle {
            list.push(std::mem::take(&mut self.data));
        }
    }
}

impl<T: Copy + Default + std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropped_buffer_returns_to_its_role() {
        let pool = PayloadPool::new();
        {
            let samples = pool.acquire_samples(1024);
            assert_eq!(samples.len(), 1024);
            assert_eq!(samples.size_bytes(), 4096);
            assert_eq!(pool.idle_count(PayloadRole::Audio), 0);
        }
        assert_eq!(pool.idle_count(PayloadRole::Audio), 1);
        assert_eq!(pool.idle_count(PayloadRole::Video), 0);
    }

    #[test]
    fn test_reused_buffer_is_zeroed_and_resized() {
        let pool = PayloadPool::new();
        {
            let mut pixels = pool.acquire_pixels(16);
            pixels.as_mut_slice().fill(0xff);
        }
        let pixels = pool.acquire_pixels(8);
        assert_eq!(pixels.as_slice(), &[0u8; 8]);
        assert_eq!(pool.idle_count(PayloadRole::Video), 0);
    }

    #[test]
    fn test_idle_list_is_capped() {
        let pool = PayloadPool::with_max_idle(2);
        let buffers: Vec<_> = (0..5).map(|_| pool.acquire_samples(4)).collect();
        drop(buffers);
        assert_eq!(pool.idle_count(PayloadRole::Audio), 2);

        pool.clear();
        assert_eq!(pool.idle_count(PayloadRole::Audio), 0);
    }

    #[test]
    fn test_buffer_outliving_pool_is_freed() {
        let pool = PayloadPool::new();
        let samples = pool.acquire_samples(4);
        drop(pool);
        drop(samples);
    }

    #[test]
    fn test_truncate_tracks_length() {
        let mut samples = Pooled::detached(vec![1.0f32, 2.0, 3.0]);
        samples.truncate(2);
        assert_eq!(samples.as_slice(), &[1.0, 2.0]);
        samples.truncate(10);
        assert_eq!(samples.len(), 2);
    }
}
