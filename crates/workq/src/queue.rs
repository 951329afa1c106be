//! Lock-Free Job Queue
//!
//! Multi-producer, single-consumer unbounded linked queue.
//!
//! Michael-Scott layout: `head` always points at a sentinel whose successor
//! holds the oldest item. Producers link at `tail` with CAS and never block.
//! A dequeued sentinel may still be read by a producer that loaded `tail`
//! before it moved, so it is retired through `crossbeam_epoch` and only freed
//! after a grace period.

use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;

struct Node<T> {
    /// Initialized for every node except the current sentinel
    data: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

/// Multi-producer, single-consumer unbounded queue
pub struct MpscQueue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
    /// Approximate length, never below the true length
    len: CachePadded<AtomicUsize>,
}

// SAFETY: items move between threads, nodes are reclaimed through the epoch collector.
unsafe impl<T: Send> Send for MpscQueue<T> {}
unsafe impl<T: Send> Sync for MpscQueue<T> {}

impl<T> MpscQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        let queue = Self {
            head: CachePadded::new(Atomic::null()),
            tail: CachePadded::new(Atomic::null()),
            len: CachePadded::new(AtomicUsize::new(0)),
        };
        let sentinel = Owned::new(Node {
            data: MaybeUninit::uninit(),
            next: Atomic::null(),
        });
        // SAFETY: the queue is not shared yet.
        unsafe {
            let guard = epoch::unprotected();
            let sentinel = sentinel.into_shared(guard);
            queue.head.store(sentinel, Ordering::Relaxed);
            queue.tail.store(sentinel, Ordering::Relaxed);
        }
        queue
    }

    /// Link an item at the tail. Lock-free, safe from any number of threads.
    pub fn push(&self, value: T, guard: &Guard) {
        let new = Owned::new(Node {
            data: MaybeUninit::new(value),
            next: Atomic::null(),
        })
        .into_shared(guard);

        // Count before linking so the consumer never sees len underflow
        self.len.fetch_add(1, Ordering::Relaxed);

        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            // SAFETY: tail is never null and is protected by the guard.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, guard);

            if !next.is_null() {
                // Tail is behind, help it along
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed, guard);
                continue;
            }

            if tail_ref
                .next
                .compare_exchange(Shared::null(), new, Ordering::Release, Ordering::Relaxed, guard)
                .is_ok()
            {
                // Ok if this fails, someone else advanced it
                let _ = self
                    .tail
                    .compare_exchange(tail, new, Ordering::Release, Ordering::Relaxed, guard);
                return;
            }
        }
    }

    /// Unlink the oldest item.
    ///
    /// Only the owning consumer calls this; the retired sentinel is handed to
    /// the epoch collector.
    pub fn pop(&self, guard: &Guard) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            // SAFETY: head is never null and is protected by the guard.
            let next = unsafe { head.deref() }.next.load(Ordering::Acquire, guard);

            // SAFETY: non-null successors are protected by the guard.
            let next_ref = unsafe { next.as_ref() }?;

            if self
                .head
                .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed, guard)
                .is_ok()
            {
                // Keep tail from pointing at the node we are about to retire
                let tail = self.tail.load(Ordering::Relaxed, guard);
                if head == tail {
                    let _ = self
                        .tail
                        .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed, guard);
                }

                self.len.fetch_sub(1, Ordering::Relaxed);
                // SAFETY: `next` is now the sentinel, its data is moved out exactly once;
                // `head` is unreachable for new readers and freed after the grace period.
                unsafe {
                    guard.defer_destroy(head);
                    return Some(ptr::read(next_ref.data.as_ptr()));
                }
            }
        }
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        let head = self.head.load(Ordering::Acquire, &guard);
        // SAFETY: head is never null and is protected by the guard.
        unsafe { head.deref() }.next.load(Ordering::Acquire, &guard).is_null()
    }

    /// Get approximate length
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }
}

impl<T> Default for MpscQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for MpscQueue<T> {
    fn drop(&mut self) {
        // SAFETY: exclusive access, no other thread can observe the queue.
        unsafe {
            let guard = epoch::unprotected();
            while self.pop(guard).is_some() {}

            // Destroy the remaining sentinel
            let sentinel = self.head.load(Ordering::Relaxed, guard);
            drop(sentinel.into_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_mpsc_basic() {
        let queue: MpscQueue<i32> = MpscQueue::new();
        let guard = epoch::pin();

        assert!(queue.is_empty());

        queue.push(1, &guard);
        queue.push(2, &guard);
        queue.push(3, &guard);
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.pop(&guard), Some(1));
        assert_eq!(queue.pop(&guard), Some(2));
        assert_eq!(queue.pop(&guard), Some(3));
        assert_eq!(queue.pop(&guard), None);
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_mpsc_concurrent_producers() {
        let queue = Arc::new(MpscQueue::new());
        let mut handles = vec![];

        for t in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    queue.push(t * 1000 + i, &epoch::pin());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let mut per_producer = vec![Vec::new(); 4];
        while let Some(v) = queue.pop(&epoch::pin()) {
            per_producer[v / 1000].push(v % 1000);
        }

        // FIFO per producer
        for seen in per_producer {
            assert_eq!(seen, (0..250).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_mpsc_consumer_races_producers() {
        let queue = Arc::new(MpscQueue::new());
        let producers: Vec<_> = (0..3)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..500u64 {
                        queue.push(t * 10_000 + i, &epoch::pin());
                    }
                })
            })
            .collect();

        let mut received = 0;
        while received < 1500 {
            match queue.pop(&epoch::pin()) {
                Some(_) => received += 1,
                None => thread::yield_now(),
            }
        }

        for producer in producers {
            producer.join().unwrap();
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drop_releases_items() {
        let marker = Arc::new(());
        {
            let queue = MpscQueue::new();
            let guard = epoch::pin();
            for _ in 0..8 {
                queue.push(Arc::clone(&marker), &guard);
            }
            drop(queue.pop(&guard));
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
