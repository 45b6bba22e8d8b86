//! Lock-free single-producer/single-consumer ring for moving ownership of
//! work items between exactly two cores.
//!
//! The ring itself is bounded; the producer additionally keeps an unbounded
//! local *reschedule queue* that absorbs items when the ring is momentarily
//! full. Sustained overload therefore shows up as growing queue depth
//! (observable via [`Producer::queued`]) rather than data loss or blocking.

use std::{
    cell::UnsafeCell,
    collections::VecDeque,
    fmt,
    mem::MaybeUninit,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use thiserror::Error;

/// Smallest accepted ring capacity.
pub const MIN_CAPACITY: usize = 2;
/// Largest accepted ring capacity.
pub const MAX_CAPACITY: usize = 65_536;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("ring capacity must be a power of two, got {0}")]
    CapacityNotPowerOfTwo(usize),
    #[error("ring capacity must be within [{MIN_CAPACITY}, {MAX_CAPACITY}], got {0}")]
    CapacityOutOfRange(usize),
}

/// Returned by [`Producer::try_send`] when the ring is full. Gives the
/// rejected item back to the caller, which decides the policy.
pub struct Full<T>(pub T);

impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

/// Index counters are kept on separate cache lines so the producer and the
/// consumer do not false-share.
#[repr(align(64))]
struct CacheLine(AtomicUsize);

struct Shared<T> {
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Next slot to pop. Written only by the consumer.
    head: CacheLine,
    /// Next slot to push. Written only by the producer.
    tail: CacheLine,
}

// The two ends hand items across threads; the slots themselves are only
// touched by whichever side the head/tail protocol says owns them.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let mut head = *self.head.0.get_mut();
        let tail = *self.tail.0.get_mut();
        while head != tail {
            unsafe { (*self.buf[head & self.mask].get()).assume_init_drop() };
            head = head.wrapping_add(1);
        }
    }
}

/// The producing end of a cross-core ring.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    reschedule: VecDeque<T>,
}

/// The consuming end of a cross-core ring.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.shared.buf.len())
            .field("queued", &self.reschedule.len())
            .finish()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer").field("capacity", &self.shared.buf.len()).finish()
    }
}

/// Creates a ring with the given power-of-two capacity and returns its two
/// ends. Each end is `Send` but not clonable, so the single-producer /
/// single-consumer discipline is enforced by ownership.
pub fn ring<T: Send>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), RingError> {
    if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
        return Err(RingError::CapacityOutOfRange(capacity));
    }
    if !capacity.is_power_of_two() {
        return Err(RingError::CapacityNotPowerOfTwo(capacity));
    }

    let buf = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let shared = Arc::new(Shared {
        buf,
        mask: capacity - 1,
        head: CacheLine(AtomicUsize::new(0)),
        tail: CacheLine(AtomicUsize::new(0)),
    });

    let producer = Producer { shared: Arc::clone(&shared), reschedule: VecDeque::new() };
    let consumer = Consumer { shared };
    Ok((producer, consumer))
}

impl<T: Send> Producer<T> {
    /// Attempts a direct, non-blocking push. Fails fast with the item if the
    /// ring is full.
    pub fn try_send(&mut self, item: T) -> Result<(), Full<T>> {
        let shared = &*self.shared;
        let tail = shared.tail.0.load(Ordering::Relaxed);
        let head = shared.head.0.load(Ordering::Acquire);

        if tail.wrapping_sub(head) == shared.buf.len() {
            return Err(Full(item));
        }

        unsafe { (*shared.buf[tail & shared.mask].get()).write(item) };
        shared.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Sends an item without ever dropping it: previously parked items are
    /// drained into the ring first (preserving FIFO order), then the item is
    /// pushed directly if room remains, otherwise it is parked in the local
    /// reschedule queue. Never blocks.
    pub fn send(&mut self, item: T) {
        self.flush_queued();

        if self.reschedule.is_empty() {
            if let Err(Full(item)) = self.try_send(item) {
                tracing::trace!("ring full, parking item in reschedule queue");
                self.reschedule.push_back(item);
            }
        } else {
            // older items must go out first
            self.reschedule.push_back(item);
        }
    }

    /// Moves as many parked items as possible into the ring, oldest first.
    pub fn flush_queued(&mut self) {
        while let Some(item) = self.reschedule.pop_front() {
            if let Err(Full(item)) = self.try_send(item) {
                self.reschedule.push_front(item);
                break;
            }
        }
    }

    /// Number of items parked in the reschedule queue. Growth under load is
    /// the observable cost of the no-drop guarantee.
    pub fn queued(&self) -> usize {
        self.reschedule.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.buf.len()
    }

    pub fn is_full(&self) -> bool {
        let tail = self.shared.tail.0.load(Ordering::Relaxed);
        let head = self.shared.head.0.load(Ordering::Acquire);
        tail.wrapping_sub(head) == self.shared.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        let tail = self.shared.tail.0.load(Ordering::Relaxed);
        let head = self.shared.head.0.load(Ordering::Acquire);
        tail == head
    }
}

impl<T: Send> Consumer<T> {
    /// Non-blocking pop. Ownership of the item transfers to the caller on
    /// success; `None` means the ring is currently empty.
    pub fn try_recv(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let head = shared.head.0.load(Ordering::Relaxed);
        let tail = shared.tail.0.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let item = unsafe { (*shared.buf[head & shared.mask].get()).assume_init_read() };
        shared.head.0.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    pub fn capacity(&self) -> usize {
        self.shared.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        let head = self.shared.head.0.load(Ordering::Relaxed);
        let tail = self.shared.tail.0.load(Ordering::Acquire);
        head == tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::Cell, rc::Rc, thread};

    #[test]
    fn rejects_bad_capacity() {
        assert_eq!(ring::<u32>(0).err(), Some(RingError::CapacityOutOfRange(0)));
        assert_eq!(ring::<u32>(1).err(), Some(RingError::CapacityOutOfRange(1)));
        assert_eq!(ring::<u32>(24).err(), Some(RingError::CapacityNotPowerOfTwo(24)));
        assert_eq!(ring::<u32>(131_072).err(), Some(RingError::CapacityOutOfRange(131_072)));
        assert!(ring::<u32>(16).is_ok());
    }

    #[test]
    fn fifo_same_thread() {
        let (mut tx, mut rx) = ring(8).unwrap();
        for i in 0..5u32 {
            tx.try_send(i).unwrap();
        }
        for i in 0..5u32 {
            assert_eq!(rx.try_recv(), Some(i));
        }
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn try_send_fails_fast_when_full() {
        let (mut tx, mut rx) = ring(4).unwrap();
        for i in 0..4u32 {
            tx.try_send(i).unwrap();
        }
        assert!(tx.is_full());
        let Full(rejected) = tx.try_send(99).unwrap_err();
        assert_eq!(rejected, 99);

        assert_eq!(rx.try_recv(), Some(0));
        tx.try_send(99).unwrap();
    }

    #[test]
    fn secured_path_preserves_order_under_overflow() {
        let (mut tx, mut rx) = ring(4).unwrap();

        // push well past capacity through the secured path
        for i in 0..32u32 {
            tx.send(i);
        }
        assert_eq!(tx.queued(), 28);

        // drain everything, flushing the parked items as room appears
        let mut got = Vec::new();
        loop {
            while let Some(v) = rx.try_recv() {
                got.push(v);
            }
            if tx.queued() == 0 && tx.is_empty() {
                break;
            }
            tx.flush_queued();
        }

        assert_eq!(got, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn send_after_overflow_stays_behind_queue() {
        let (mut tx, mut rx) = ring(2).unwrap();
        tx.send(1u32);
        tx.send(2);
        tx.send(3); // parked
        assert_eq!(rx.try_recv(), Some(1));
        // room exists now, but 3 must still go out before 4
        tx.send(4);
        assert_eq!(rx.try_recv(), Some(2));
        assert_eq!(rx.try_recv(), Some(3));
        tx.flush_queued();
        assert_eq!(rx.try_recv(), Some(4));
    }

    #[test]
    fn cross_thread_transfer() {
        let _ = tracing_subscriber::fmt::try_init();

        let (mut tx, mut rx) = ring(64).unwrap();
        const N: u64 = 100_000;

        let producer = thread::spawn(move || {
            for i in 0..N {
                tx.send(i);
                if i % 64 == 0 {
                    tx.flush_queued();
                }
            }
            while tx.queued() > 0 {
                tx.flush_queued();
                thread::yield_now();
            }
        });

        let consumer = thread::spawn(move || {
            let mut expected = 0u64;
            while expected < N {
                if let Some(v) = rx.try_recv() {
                    assert_eq!(v, expected);
                    expected += 1;
                } else {
                    thread::yield_now();
                }
            }
        });

        producer.join().unwrap();
        consumer.join().unwrap();
    }

    #[test]
    fn drop_releases_in_flight_and_parked_items() {
        struct DropCounter(Rc<Cell<usize>>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }
        // Rc is !Send; the SPSC ends never leave this thread here.
        struct Unsound(DropCounter);
        unsafe impl Send for Unsound {}

        let drops = Rc::new(Cell::new(0));
        {
            let (mut tx, rx) = ring(2).unwrap();
            tx.send(Unsound(DropCounter(Rc::clone(&drops))));
            tx.send(Unsound(DropCounter(Rc::clone(&drops))));
            tx.send(Unsound(DropCounter(Rc::clone(&drops)))); // parked
            drop(rx);
        }
        assert_eq!(drops.get(), 3);
    }
}
