//! Receive buffer between the hardware notification thread and the consumer

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Unbounded FIFO of received bytes.
///
/// Bytes are never dropped. Crossing `high_water` only logs a warning, once
/// per crossing.
#[derive(Debug)]
pub struct ReceiveBuffer {
    inner: Mutex<Inner>,
    high_water: usize,
}

#[derive(Debug, Default)]
struct Inner {
    bytes: VecDeque<u8>,
    total: u64,
    above_high_water: bool,
}

impl ReceiveBuffer {
    /// Create an empty buffer
    pub fn new(high_water: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            high_water,
        }
    }

    /// Append bytes, returning how many bytes are now buffered
    pub fn push(&self, data: &[u8]) -> usize {
        let mut inner = self.inner.lock();
        self.append(&mut inner, data)
    }

    /// Append bytes only while `live` is set.
    ///
    /// The flag is checked under the buffer lock, so a producer whose handle
    /// was retired before the next [`clear`](Self::clear) cannot leave stale
    /// bytes behind.
    pub fn push_if_live(&self, live: &AtomicBool, data: &[u8]) -> Option<usize> {
        let mut inner = self.inner.lock();
        if !live.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.append(&mut inner, data))
    }

    fn append(&self, inner: &mut Inner, data: &[u8]) -> usize {
        inner.bytes.extend(data);
        inner.total += data.len() as u64;

        let len = inner.bytes.len();
        if len > self.high_water && !inner.above_high_water {
            inner.above_high_water = true;
            warn!(buffered = len, high_water = self.high_water, "Receive buffer above high-water mark");
        }
        len
    }

    /// Take everything buffered so far
    pub fn drain(&self) -> Bytes {
        let mut inner = self.inner.lock();
        inner.above_high_water = false;
        let bytes: Vec<u8> = inner.bytes.drain(..).collect();
        Bytes::from(bytes)
    }

    /// Discard everything buffered so far
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.bytes.clear();
        inner.above_high_water = false;
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.inner.lock().bytes.len()
    }

    /// Nothing buffered
    pub fn is_empty(&self) -> bool {
        self.inner.lock().bytes.is_empty()
    }

    /// Bytes ever appended, cleared or not
    pub fn total_received(&self) -> u64 {
        self.inner.lock().total
    }
}
