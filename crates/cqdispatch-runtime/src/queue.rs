//! # BoundedQueue: lock-free MPMC ring
//!
//! Fixed-capacity multi-producer multi-consumer queue used as the hand-off
//! between polling threads and executor workers (and as the submission
//! queue of the hybrid poll-executor).
//!
//! ## Layout
//!
//! ```text
//!   head (consumers)           tail (producers) | CLOSED bit
//!        │                          │
//!        ▼                          ▼
//!   ┌────────┬────────┬────────┬────────┐
//!   │ stamp  │ stamp  │ stamp  │ stamp  │   slot = pos % capacity
//!   │ value  │ value  │ value  │ value  │
//!   └────────┴────────┴────────┴────────┘
//! ```
//!
//! `head` and `tail` are monotonic positions. Each slot carries a stamp
//! that says who may touch it next:
//!
//! - `2 * pos`     - empty, writable by the producer that claims `pos`
//! - `2 * pos + 1` - holds the value written at `pos`, readable by its consumer
//!
//! A consumer that takes `pos` re-stamps the slot `2 * (pos + capacity)`,
//! handing it to the producer one lap later. The doubled encoding keeps the
//! "readable" and "writable next lap" stamps distinct even at capacity 1.
//!
//! Closing sets the top bit of `tail`. Producers claim positions with a CAS
//! on `tail`, so a push either lands before the close or observes it; there
//! is no window where an accepted item is left behind a closed flag.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{self, AtomicU64, Ordering};

use cqdispatch_core::constants::CACHE_LINE_SIZE;
use cqdispatch_core::{DispatchError, DispatchResult, PushError};

/// Closed mark, kept in the tail word
const CLOSED: u64 = 1 << 63;

/// Keeps hot indices on separate cache lines.
#[repr(C, align(64))]
pub(crate) struct CachePadded<T> {
    value: T,
}

// `repr(align)` only takes a literal; keep it in step with the constant
const _: () = assert!(std::mem::align_of::<CachePadded<u8>>() == CACHE_LINE_SIZE);

impl<T> CachePadded<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> std::ops::DerefMut for CachePadded<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

struct Slot<T> {
    stamp: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Fixed-capacity lock-free MPMC queue with a one-way close.
///
/// **Contract:**
/// - Never holds more than `capacity` items.
/// - Every accepted item is popped exactly once (or dropped by `reset`/drop).
/// - A single producer's items are popped in the order it pushed them.
/// - After `close`, pushes fail and pops keep draining what was accepted.
pub struct BoundedQueue<T> {
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    slots: Box<[Slot<T>]>,
    cap: u64,
}

// Safety: values move between threads through the stamp protocol; a slot
// is written by exactly one producer and read by exactly one consumer.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Create an open, empty queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> DispatchResult<Self> {
        if capacity == 0 {
            return Err(DispatchError::InvalidCapacity);
        }

        let slots = (0..capacity as u64)
            .map(|i| Slot {
                stamp: AtomicU64::new(2 * i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            slots,
            cap: capacity as u64,
        })
    }

    #[inline]
    fn slot(&self, pos: u64) -> &Slot<T> {
        &self.slots[(pos % self.cap) as usize]
    }

    /// Non-blocking enqueue. Hands the value back on `Full` or `Closed`.
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        loop {
            let tail = self.tail.load(Ordering::Relaxed);
            if tail & CLOSED != 0 {
                return Err(PushError::Closed(value));
            }

            let slot = self.slot(tail);
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == 2 * tail {
                // Fails if another producer won the position or close() landed
                if self
                    .tail
                    .compare_exchange_weak(tail, tail + 1, Ordering::SeqCst, Ordering::Relaxed)
                    .is_ok()
                {
                    // Safety: the CAS made this thread the only writer of the slot
                    unsafe { (*slot.value.get()).write(value) };
                    slot.stamp.store(2 * tail + 1, Ordering::Release);
                    return Ok(());
                }
            } else if stamp + 2 * self.cap == 2 * tail + 1 {
                // Slot still holds the value written one lap ago
                atomic::fence(Ordering::SeqCst);
                let head = self.head.load(Ordering::Relaxed);
                if head + self.cap == tail {
                    return Err(PushError::Full(value));
                }
            }

            std::hint::spin_loop();
        }
    }

    /// Non-blocking dequeue. `None` when nothing is available right now.
    pub fn pop(&self) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let slot = self.slot(head);
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == 2 * head + 1 {
                if self
                    .head
                    .compare_exchange_weak(head, head + 1, Ordering::SeqCst, Ordering::Relaxed)
                    .is_ok()
                {
                    // Safety: the CAS made this thread the only reader; the
                    // Acquire on the stamp ordered the producer's write
                    let value = unsafe { (*slot.value.get()).assume_init_read() };
                    slot.stamp.store(2 * (head + self.cap), Ordering::Release);
                    return Some(value);
                }
            } else if stamp == 2 * head {
                // Nothing written at `head` yet: empty, or a producer mid-write
                atomic::fence(Ordering::SeqCst);
                let tail = self.tail.load(Ordering::Relaxed) & !CLOSED;
                if tail == head {
                    return None;
                }
            }

            std::hint::spin_loop();
        }
    }

    /// Approximate item count, always within `0..=capacity`.
    pub fn size(&self) -> usize {
        loop {
            let tail = self.tail.load(Ordering::SeqCst);
            let head = self.head.load(Ordering::SeqCst);

            // Only trust a head read bracketed by a stable tail
            if self.tail.load(Ordering::SeqCst) == tail {
                let len = (tail & !CLOSED).saturating_sub(head);
                return len.min(self.cap) as usize;
            }
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap as usize
    }

    /// Close the queue. Idempotent; returns `true` for the call that closed it.
    pub fn close(&self) -> bool {
        self.tail.fetch_or(CLOSED, Ordering::SeqCst) & CLOSED == 0
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tail.load(Ordering::SeqCst) & CLOSED != 0
    }

    /// Return to the freshly-constructed state: open, empty, same capacity.
    ///
    /// Remaining items are dropped. Taking `&mut self` rules out concurrent
    /// producers and consumers.
    pub fn reset(&mut self) {
        while self.pop().is_some() {}

        *self.head.get_mut() = 0;
        *self.tail.get_mut() = 0;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            *slot.stamp.get_mut() = 2 * i as u64;
        }
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.cap)
            .field("size", &self.size())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(
            BoundedQueue::<u64>::new(0).unwrap_err(),
            DispatchError::InvalidCapacity
        );
    }

    #[test]
    fn test_cursors_on_separate_lines() {
        let q = BoundedQueue::<u64>::new(2).unwrap();
        let head = &q.head as *const _ as usize;
        let tail = &q.tail as *const _ as usize;
        assert_eq!(head % CACHE_LINE_SIZE, 0);
        assert!(head.abs_diff(tail) >= CACHE_LINE_SIZE);
    }

    #[test]
    fn test_fill_drain_close() {
        let q = BoundedQueue::new(4).unwrap();
        for v in 1..=4u64 {
            q.push(v).unwrap();
        }
        assert_eq!(q.size(), 4);
        assert!(matches!(q.push(5), Err(PushError::Full(5))));

        assert_eq!(q.pop(), Some(1));
        q.push(5).unwrap();

        let drained: Vec<_> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(drained, vec![2, 3, 4, 5]);
        assert_eq!(q.pop(), None);

        assert!(q.close());
        assert!(matches!(q.push(6), Err(PushError::Closed(6))));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_full_push_leaves_queue_unchanged() {
        let q = BoundedQueue::new(2).unwrap();
        q.push(10u32).unwrap();
        q.push(11).unwrap();
        for _ in 0..3 {
            assert!(q.push(99).unwrap_err().is_full());
        }
        assert_eq!(q.size(), 2);
        assert_eq!(q.pop(), Some(10));
        assert_eq!(q.pop(), Some(11));
    }

    #[test]
    fn test_capacity_one_cycles() {
        let q = BoundedQueue::new(1).unwrap();
        for round in 0..100u32 {
            q.push(round).unwrap();
            assert!(q.push(round + 1000).unwrap_err().is_full());
            assert_eq!(q.pop(), Some(round));
            assert_eq!(q.pop(), None);
        }
    }

    #[test]
    fn test_close_is_idempotent_and_keeps_items() {
        let q = BoundedQueue::new(8).unwrap();
        q.push("a").unwrap();
        q.push("b").unwrap();
        assert!(q.close());
        assert!(!q.close());
        assert!(q.is_closed());

        assert_eq!(q.pop(), Some("a"));
        assert_eq!(q.pop(), Some("b"));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_reset_matches_fresh_queue() {
        let mut q = BoundedQueue::new(3).unwrap();
        q.push(1u8).unwrap();
        q.push(2).unwrap();
        q.close();
        q.reset();

        assert!(!q.is_closed());
        assert_eq!(q.size(), 0);
        assert_eq!(q.capacity(), 3);

        let fresh = BoundedQueue::new(3).unwrap();
        for v in [7u8, 8, 9] {
            q.push(v).unwrap();
            fresh.push(v).unwrap();
        }
        assert_eq!(q.push(10).is_err(), fresh.push(10).is_err());
        for _ in 0..4 {
            assert_eq!(q.pop(), fresh.pop());
        }
    }

    #[test]
    fn test_drop_releases_items() {
        let marker = Arc::new(());
        {
            let q = BoundedQueue::new(4).unwrap();
            q.push(Arc::clone(&marker)).unwrap();
            q.push(Arc::clone(&marker)).unwrap();
            assert_eq!(Arc::strong_count(&marker), 3);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_mpmc_every_item_once() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 20_000;

        let q = Arc::new(BoundedQueue::new(64).unwrap());
        let popped = Arc::new(AtomicUsize::new(0));
        let total = (PRODUCERS * PER_PRODUCER) as usize;

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let mut v = p * PER_PRODUCER + i;
                        loop {
                            match q.push(v) {
                                Ok(()) => break,
                                Err(e) => {
                                    v = e.into_inner();
                                    thread::yield_now();
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                let popped = Arc::clone(&popped);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while popped.load(Ordering::Relaxed) < total {
                        match q.pop() {
                            Some(v) => {
                                seen.push(v);
                                popped.fetch_add(1, Ordering::Relaxed);
                            }
                            None => thread::yield_now(),
                        }
                    }
                    seen
                })
            })
            .collect();

        for h in producers {
            h.join().unwrap();
        }
        let mut all = HashSet::new();
        for h in consumers {
            for v in h.join().unwrap() {
                assert!(all.insert(v), "duplicate {}", v);
            }
        }
        assert_eq!(all.len(), total);
    }

    #[test]
    fn test_single_producer_order_preserved() {
        let q = Arc::new(BoundedQueue::new(16).unwrap());
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..10_000u32 {
                    while q.push(i).is_err() {
                        std::hint::spin_loop();
                    }
                }
            })
        };

        let mut expected = 0u32;
        while expected < 10_000 {
            if let Some(v) = q.pop() {
                assert_eq!(v, expected);
                expected += 1;
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let q = Arc::new(BoundedQueue::new(8).unwrap());
        let stop = Arc::new(AtomicBool::new(false));

        let workers: Vec<_> = (0..3)
            .map(|t| {
                let q = Arc::clone(&q);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut n = 0u64;
                    while !stop.load(Ordering::Relaxed) {
                        if t % 2 == 0 {
                            let _ = q.push(n);
                            n += 1;
                        } else {
                            let _ = q.pop();
                        }
                    }
                })
            })
            .collect();

        for _ in 0..50_000 {
            assert!(q.size() <= 8);
        }
        stop.store(true, Ordering::Relaxed);
        for h in workers {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_close_races_with_push() {
        // Everything a push accepted must still be poppable after close
        for _ in 0..50 {
            let q = Arc::new(BoundedQueue::new(1024).unwrap());
            let accepted = Arc::new(AtomicUsize::new(0));

            let producers: Vec<_> = (0..3)
                .map(|_| {
                    let q = Arc::clone(&q);
                    let accepted = Arc::clone(&accepted);
                    thread::spawn(move || loop {
                        match q.push(1u8) {
                            Ok(()) => {
                                accepted.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(PushError::Closed(_)) => break,
                            Err(PushError::Full(_)) => thread::yield_now(),
                        }
                    })
                })
                .collect();

            thread::yield_now();
            q.close();
            for h in producers {
                h.join().unwrap();
            }

            let mut drained = 0;
            while q.pop().is_some() {
                drained += 1;
            }
            assert_eq!(drained, accepted.load(Ordering::Relaxed));
        }
    }
}
