//! Lock-free single-producer single-consumer byte ring buffer.
//!
//! This is the only state shared between the reactor thread (producer) and
//! the realtime audio callback (consumer). Both sides are wait-free: a write
//! or read copies at most what is available and reports how much it moved.
//! Capacity is rounded up to a power of two so positions can be masked
//! instead of wrapped with a modulo.
//!
//! The read and write positions are monotonic counters. The producer owns
//! `write_pos` and publishes new bytes with a release store; the consumer
//! owns `read_pos` and acquires `write_pos` before touching the storage (and
//! symmetrically for reclaimed space). Either side may observe a stale value
//! of the other's counter, which only ever under-reports availability.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct RingBuffer {
    storage: UnsafeCell<Box<[u8]>>,
    mask: usize,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
}

// One producer and one consumer, each touching a disjoint region of the
// storage slab delimited by the two counters. Callers uphold the SPSC
// discipline; `flush` additionally requires both sides quiescent.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Create a ring holding at least `min_bytes`, rounded up to a power of
    /// two.
    pub fn with_capacity(min_bytes: usize) -> Self {
        let capacity = min_bytes.max(2).next_power_of_two();
        Self {
            storage: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            mask: capacity - 1,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Bytes the producer may write right now. May under-report if the
    /// consumer has freed space this side has not yet observed.
    pub fn write_capacity(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        self.capacity() - (write - read)
    }

    /// Bytes the consumer may read right now. May under-report if the
    /// producer has published bytes this side has not yet observed.
    pub fn read_capacity(&self) -> usize {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);
        write - read
    }

    /// Copy up to `src.len()` bytes in, returning how many were accepted.
    /// Producer side only.
    pub fn write(&self, src: &[u8]) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        let free = self.capacity() - (write - read);
        let n = src.len().min(free);
        if n == 0 {
            return 0;
        }

        let idx = write & self.mask;
        let first = n.min(self.capacity() - idx);
        // The producer is the only writer of the free region; the consumer
        // never reads past `write`, so the copy targets exclusive bytes.
        unsafe {
            let base = (*self.storage.get()).as_mut_ptr();
            std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(idx), first);
            std::ptr::copy_nonoverlapping(src.as_ptr().add(first), base, n - first);
        }
        self.write_pos.store(write + n, Ordering::Release);
        n
    }

    /// Copy up to `dst.len()` bytes out, returning how many were produced.
    /// Consumer side only.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);
        let avail = write - read;
        let n = dst.len().min(avail);
        if n == 0 {
            return 0;
        }

        let idx = read & self.mask;
        let first = n.min(self.capacity() - idx);
        // The consumer is the only reader of [read, write); the producer
        // never writes into that region until `read_pos` passes it.
        unsafe {
            let base = (*self.storage.get()).as_ptr();
            std::ptr::copy_nonoverlapping(base.add(idx), dst.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(base, dst.as_mut_ptr().add(first), n - first);
        }
        self.read_pos.store(read + n, Ordering::Release);
        n
    }

    /// Discard everything and reset both positions.
    ///
    /// Only legal while neither side is active; the sink enforces this by
    /// stopping the output stream before any flush.
    pub fn flush(&self) {
        self.read_pos.store(0, Ordering::Relaxed);
        self.write_pos.store(0, Ordering::Release);
    }
}
