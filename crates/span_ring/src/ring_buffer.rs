//! Fixed-capacity rolling window of finished spans.
//!
//! # Overwrite semantics
//!
//! `insert` never blocks on capacity and never fails: once the window holds
//! `capacity` spans, each insert overwrites the oldest one. The write cursor
//! wraps modulo the capacity and `len` saturates at it.
//!
//! # Flush atomicity
//!
//! `flush` swaps the whole slot array for a fresh empty one inside a single
//! critical section, then orders the detached slots outside of it. An insert
//! that races with a flush therefore either completes before the swap (and
//! its span is in the snapshot) or after it (and its span is in the emptied
//! window). It can never be in both or in neither.
//!
//! Producers contend only on that short critical section; the counters are
//! cache-padded atomics so reading them never takes the lock.

use crate::invariants::{
    debug_assert_cursor_in_range, debug_assert_snapshot_complete, debug_assert_window_bounded,
};
use crate::span::Span;
use crate::sync::{AtomicU64, Mutex, MutexGuard, Ordering};
use crossbeam_utils::CachePadded;
use std::sync::PoisonError;

/// Mutable window state guarded by the buffer's mutex.
struct Window {
    slots: Box<[Option<Span>]>,
    /// Next slot to write
    cursor: usize,
    /// Number of occupied slots
    len: usize,
}

impl Window {
    fn empty(capacity: usize) -> Self {
        Self {
            slots: empty_slots(capacity),
            cursor: 0,
            len: 0,
        }
    }
}

fn empty_slots(capacity: usize) -> Box<[Option<Span>]> {
    let mut slots = Vec::with_capacity(capacity);
    slots.resize_with(capacity, || None);
    slots.into_boxed_slice()
}

/// Monotonic counters describing buffer activity.
pub struct BufferMetrics {
    inserted: CachePadded<AtomicU64>,
    overwritten: CachePadded<AtomicU64>,
    flushed: CachePadded<AtomicU64>,
}

impl BufferMetrics {
    fn new() -> Self {
        Self {
            inserted: CachePadded::new(AtomicU64::new(0)),
            overwritten: CachePadded::new(AtomicU64::new(0)),
            flushed: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Total spans ever inserted
    pub fn inserted(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    /// Spans lost because a newer span took their slot
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    /// Spans handed out by flushes
    pub fn flushed(&self) -> u64 {
        self.flushed.load(Ordering::Relaxed)
    }
}

/// Concurrent ring buffer holding the most recent finished spans.
pub struct SpanRingBuffer {
    window: Mutex<Window>,
    capacity: usize,
    metrics: BufferMetrics,
}

impl SpanRingBuffer {
    /// Creates an empty buffer holding at most `capacity` spans.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be at least 1");
        Self {
            window: Mutex::new(Window::empty(capacity)),
            capacity,
            metrics: BufferMetrics::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        // A panic while holding the lock cannot leave the window torn: every
        // mutation is a single slot assignment plus two integer updates.
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the maximum number of spans held.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of spans currently held.
    pub fn len(&self) -> usize {
        self.lock().len
    }

    /// Returns true if no spans are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the buffer's activity counters.
    pub fn metrics(&self) -> &BufferMetrics {
        &self.metrics
    }

    /// Appends a finished span, overwriting the oldest one when full.
    pub fn insert(&self, span: Span) {
        let replaced = {
            let mut window = self.lock();
            let cursor = window.cursor;
            let replaced = window.slots[cursor].replace(span);
            window.cursor = (cursor + 1) % self.capacity;
            if replaced.is_none() {
                window.len += 1;
            }
            debug_assert_cursor_in_range!(window.cursor, self.capacity);
            debug_assert_window_bounded!(window.len, self.capacity);
            replaced
        };

        self.metrics.inserted.fetch_add(1, Ordering::Relaxed);
        if replaced.is_some() {
            self.metrics.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        // `replaced` drops here, outside the critical section
    }

    /// Takes every held span, oldest first, leaving the buffer empty.
    pub fn flush(&self) -> Vec<Span> {
        let fresh = empty_slots(self.capacity);
        let (mut slots, cursor, len) = {
            let mut window = self.lock();
            let slots = std::mem::replace(&mut window.slots, fresh);
            let detached = (slots, window.cursor, window.len);
            window.cursor = 0;
            window.len = 0;
            detached
        };

        // Once full, the oldest span sits at the cursor; before that, at 0.
        let start = if len == self.capacity { cursor } else { 0 };
        let mut spans = Vec::with_capacity(len);
        for offset in 0..self.capacity {
            if let Some(span) = slots[(start + offset) % self.capacity].take() {
                spans.push(span);
            }
        }
        debug_assert_snapshot_complete!(spans.len(), len);

        self.metrics
            .flushed
            .fetch_add(spans.len() as u64, Ordering::Relaxed);
        tracing::debug!(spans = spans.len(), capacity = self.capacity, "flushed span window");
        spans
    }

    /// Discards every held span.
    pub fn clear(&self) {
        let fresh = empty_slots(self.capacity);
        let mut window = self.lock();
        window.slots = fresh;
        window.cursor = 0;
        window.len = 0;
    }
}

impl std::fmt::Debug for BufferMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferMetrics")
            .field("inserted", &self.inserted())
            .field("overwritten", &self.overwritten())
            .field("flushed", &self.flushed())
            .finish()
    }
}

impl std::fmt::Debug for SpanRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanRingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("metrics", &self.metrics)
            .finish()
    }
}
