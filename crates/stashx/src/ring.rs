//! 🎡 The transfer buffer: a bounded, multi-producer ring with chained consumer stages.
//!
//! 🧠 Knowledge graph:
//! - Producers `claim` a sequence, `write` the slot for it, then `publish` it.
//! - Claims come from a CAS loop on one shared cursor: unique, strictly increasing, no gaps.
//! - Stage 0 sees a sequence only once it and every smaller sequence are published.
//!   Stage N sees a sequence only once stage N-1 has advanced past it.
//! - A producer may not claim sequence `s` until the LAST stage has advanced past
//!   `s - capacity`. That is the backpressure: a full ring blocks `claim`, it never overwrites.
//! - `close` flips a bit in the claim cursor. New and blocked claims fail fast with
//!   [`BufferError::Closed`]; sequences claimed before the flip still get published and drained.
//!
//! ⚠️ Waiting is a short yield loop followed by condvar waits with a timeout. Nobody
//! spins forever and nobody sleeps forever.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// 🔢 Position in the global publish order.
pub type Sequence = u64;

// -- 🚪 top bit of the claim cursor. once set, the ring hands out nothing ever again.
const CLOSED: u64 = 1 << 63;
const YIELD_TRIES: u32 = 64;
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Cache-line aligned wrapper so the claim cursor and the stage cursors don't false-share.
#[repr(align(64))]
struct Padded<T>(T);

impl<T> Deref for Padded<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        &self.0
    }
}

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("💀 buffer capacity must be a non-zero power of two, got {0}")]
    InvalidCapacity(usize),
    #[error("💀 a transfer buffer needs at least one consumer stage")]
    NoStages,
    #[error("💀 stage {0} does not exist on this buffer")]
    NoSuchStage(usize),
    #[error("🚪 transfer buffer is closed")]
    Closed,
}

/// 📬 What a stage gets back from [`StageCursor::wait_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Available {
    /// Everything up to and including this sequence is ready. It is also the end of the
    /// current batch: nothing beyond it was available when we looked.
    UpTo(Sequence),
    /// Closed, and this stage has consumed every sequence that was ever claimed.
    Drained,
}

/// 🎡 Fixed-capacity ring of `T` slots. See the module docs for the protocol.
pub struct TransferBuffer<T> {
    slots: Box<[Mutex<T>]>,
    /// `seq + 1` of the last publish into each index; 0 means never published
    published: Box<[AtomicU64]>,
    mask: u64,
    capacity: u64,
    claim: Padded<AtomicU64>,
    /// per stage: the next sequence that stage has not finished yet
    cursors: Box<[Padded<AtomicU64>]>,
    signal: Signal,
}

impl<T> std::fmt::Debug for TransferBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 the slots are not invited. nobody wants 1024 mutexes in their debug output.
        f.debug_struct("TransferBuffer")
            .field("capacity", &self.capacity)
            .field("claimed", &self.claimed())
            .field("closed", &self.is_closed())
            .field("stages", &self.cursors.len())
            .finish()
    }
}

impl<T: Default> TransferBuffer<T> {
    /// 🏗️ Preallocate `capacity` slots for `stages` chained consumers. The ring never grows.
    pub fn new(capacity: usize, stages: usize) -> Result<Self, BufferError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(BufferError::InvalidCapacity(capacity));
        }
        if stages == 0 {
            return Err(BufferError::NoStages);
        }

        Ok(Self {
            slots: (0..capacity).map(|_| Mutex::new(T::default())).collect(),
            published: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            mask: capacity as u64 - 1,
            capacity: capacity as u64,
            claim: Padded(AtomicU64::new(0)),
            cursors: (0..stages).map(|_| Padded(AtomicU64::new(0))).collect(),
            signal: Signal::default(),
        })
    }
}

impl<T> TransferBuffer<T> {
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn stages(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_closed(&self) -> bool {
        self.claim.load(Ordering::SeqCst) & CLOSED != 0
    }

    /// How many sequences have been handed out so far.
    pub fn claimed(&self) -> Sequence {
        self.claim.load(Ordering::SeqCst) & !CLOSED
    }

    /// Claimed but not yet released by the last stage.
    pub fn in_flight(&self) -> u64 {
        self.claimed().saturating_sub(self.slowest())
    }

    /// 🎟️ Hand out the next sequence, blocking while the ring is full.
    ///
    /// Fails with [`BufferError::Closed`] if the ring is closed before a slot frees up.
    pub fn claim(&self) -> Result<Sequence, BufferError> {
        let mut tries = 0;
        loop {
            let current = self.claim.load(Ordering::SeqCst);
            if current & CLOSED != 0 {
                return Err(BufferError::Closed);
            }

            if self.has_room(current) {
                // -- 🎯 lost the race? someone else got `current`. go again with the fresh value.
                if self
                    .claim
                    .compare_exchange_weak(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return Ok(current);
                }
                continue;
            }

            // -- 🚧 full. the last stage hasn't let go of the slot we'd be reusing.
            if tries < YIELD_TRIES {
                tries += 1;
                std::thread::yield_now();
                continue;
            }
            self.signal.wait_until(|| {
                let current = self.claim.load(Ordering::SeqCst);
                current & CLOSED != 0 || self.has_room(current)
            });
        }
    }

    /// ✍️ Store `value` into the slot for `seq`. Only the claimant of `seq` may call this.
    pub fn write(&self, seq: Sequence, value: T) {
        *self.slots[self.index(seq)].lock() = value;
    }

    /// 📣 Make `seq` visible to stage 0.
    pub fn publish(&self, seq: Sequence) {
        self.published[self.index(seq)].store(seq + 1, Ordering::SeqCst);
        self.signal.notify();
    }

    /// 🔍 In-place access to the slot for `seq`. Consumer stages only, and only for
    /// sequences their cursor reported as available.
    pub fn read<R>(&self, seq: Sequence, f: impl FnOnce(&mut T) -> R) -> R {
        let mut slot = self.slots[self.index(seq)].lock();
        f(&mut slot)
    }

    /// 🚪 Stop handing out sequences. Returns how many were claimed in total, which is
    /// exactly what the stages will drain before reporting [`Available::Drained`].
    pub fn close(&self) -> Sequence {
        let previous = self.claim.fetch_or(CLOSED, Ordering::SeqCst);
        self.signal.notify_all();
        previous & !CLOSED
    }

    /// 🔗 The consumer handle for `stage`. Each stage should have exactly one.
    pub fn stage(self: &Arc<Self>, stage: usize) -> Result<StageCursor<T>, BufferError> {
        if stage >= self.cursors.len() {
            return Err(BufferError::NoSuchStage(stage));
        }
        Ok(StageCursor {
            ring: Arc::clone(self),
            stage,
        })
    }

    #[inline]
    fn index(&self, seq: Sequence) -> usize {
        (seq & self.mask) as usize
    }

    #[inline]
    fn slowest(&self) -> Sequence {
        // -- 🐢 stages are chained, so the last one is never ahead of the others
        self.cursors[self.cursors.len() - 1].load(Ordering::SeqCst)
    }

    #[inline]
    fn has_room(&self, current: Sequence) -> bool {
        current.saturating_sub(self.slowest()) < self.capacity
    }

    /// Exclusive end of what `stage` may consume, starting the search at `next`.
    fn available_end(&self, stage: usize, next: Sequence) -> Sequence {
        if stage == 0 {
            let limit = next + self.capacity;
            let mut end = next;
            while end < limit && self.published[self.index(end)].load(Ordering::SeqCst) == end + 1 {
                end += 1;
            }
            end
        } else {
            self.cursors[stage - 1].load(Ordering::SeqCst)
        }
    }

    fn drained(&self, next: Sequence) -> bool {
        let claim = self.claim.load(Ordering::SeqCst);
        claim & CLOSED != 0 && next >= claim & !CLOSED
    }
}

/// 🔗 One consumer stage's view of the ring.
pub struct StageCursor<T> {
    ring: Arc<TransferBuffer<T>>,
    stage: usize,
}

impl<T> std::fmt::Debug for StageCursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageCursor")
            .field("stage", &self.stage)
            .field("position", &self.position())
            .finish()
    }
}

impl<T> StageCursor<T> {
    pub fn stage(&self) -> usize {
        self.stage
    }

    /// The next sequence this stage has not released yet.
    pub fn position(&self) -> Sequence {
        self.ring.cursors[self.stage].load(Ordering::SeqCst)
    }

    /// ⏳ Block until `next` is available, then report how far the available run goes.
    pub fn wait_for(&self, next: Sequence) -> Available {
        let mut tries = 0;
        loop {
            let end = self.ring.available_end(self.stage, next);
            if end > next {
                return Available::UpTo(end - 1);
            }
            if self.ring.drained(next) {
                return Available::Drained;
            }

            if tries < YIELD_TRIES {
                tries += 1;
                std::thread::yield_now();
                continue;
            }
            self.ring.signal.wait_until(|| {
                self.ring.available_end(self.stage, next) > next || self.ring.drained(next)
            });
        }
    }

    pub fn read<R>(&self, seq: Sequence, f: impl FnOnce(&mut T) -> R) -> R {
        self.ring.read(seq, f)
    }

    /// ✅ Everything up to and including `seq` is done here. Hand it downstream.
    pub fn advance(&self, seq: Sequence) {
        self.ring.cursors[self.stage].store(seq + 1, Ordering::SeqCst);
        self.ring.signal.notify();
    }
}

/// 🔔 Wait/wake for everyone touching the ring. Notifiers only take the lock when
/// somebody is actually parked, and parked threads re-check every [`WAIT_SLICE`] anyway.
#[derive(Default)]
struct Signal {
    lock: Mutex<()>,
    condvar: Condvar,
    waiters: AtomicUsize,
}

impl Signal {
    fn wait_until(&self, ready: impl Fn() -> bool) {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.lock.lock();
        if !ready() {
            self.condvar.wait_for(&mut guard, WAIT_SLICE);
        }
        drop(guard);
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }

    fn notify(&self) {
        if self.waiters.load(Ordering::SeqCst) > 0 {
            self.notify_all();
        }
    }

    fn notify_all(&self) {
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn ring(capacity: usize, stages: usize) -> Arc<TransferBuffer<u64>> {
        Arc::new(TransferBuffer::new(capacity, stages).expect("💀 valid ring refused to exist"))
    }

    #[test]
    fn the_one_where_capacity_must_be_a_power_of_two() {
        assert_eq!(
            TransferBuffer::<u64>::new(3, 1).unwrap_err(),
            BufferError::InvalidCapacity(3)
        );
        assert_eq!(
            TransferBuffer::<u64>::new(0, 1).unwrap_err(),
            BufferError::InvalidCapacity(0)
        );
        assert_eq!(TransferBuffer::<u64>::new(4, 0).unwrap_err(), BufferError::NoStages);
        assert!(TransferBuffer::<u64>::new(1, 1).is_ok());
    }

    #[test]
    fn the_one_where_claims_are_handed_out_in_order_and_read_back() {
        let ring = ring(8, 1);
        let stage = ring.stage(0).expect("stage 0 exists");

        for expected in 0..3 {
            let seq = ring.claim().expect("room for three");
            assert_eq!(seq, expected);
            ring.write(seq, seq * 10);
            ring.publish(seq);
        }

        assert_eq!(stage.wait_for(0), Available::UpTo(2));
        let values: Vec<u64> = (0..=2).map(|seq| stage.read(seq, |v| *v)).collect();
        assert_eq!(values, vec![0, 10, 20]);
        stage.advance(2);
        assert_eq!(stage.position(), 3);
        assert_eq!(ring.in_flight(), 0);
    }

    #[test]
    fn the_one_where_an_early_publish_waits_for_its_elders() {
        let ring = ring(8, 1);
        let first = ring.claim().expect("claim 0");
        let second = ring.claim().expect("claim 1");

        ring.write(second, 2);
        ring.publish(second);
        // -- 🚫 seq 1 is published but seq 0 isn't. the prefix is empty.
        assert_eq!(ring.available_end(0, 0), 0);

        ring.write(first, 1);
        ring.publish(first);
        assert_eq!(ring.available_end(0, 0), 2);
    }

    #[test]
    fn the_one_where_the_second_stage_trails_the_first() {
        let ring = ring(8, 2);
        let formatter = ring.stage(0).expect("stage 0");
        let flusher = ring.stage(1).expect("stage 1");
        assert!(matches!(ring.stage(2), Err(BufferError::NoSuchStage(2))));

        let seq = ring.claim().expect("claim");
        ring.write(seq, 7);
        ring.publish(seq);

        assert_eq!(ring.available_end(1, 0), 0, "stage 1 must not see unformatted slots");
        assert_eq!(formatter.wait_for(0), Available::UpTo(0));
        formatter.read(0, |v| *v += 1);
        formatter.advance(0);

        assert_eq!(flusher.wait_for(0), Available::UpTo(0));
        assert_eq!(flusher.read(0, |v| *v), 8);
    }

    #[test]
    fn the_one_where_a_full_ring_blocks_the_fifth_claim_until_slot_zero_is_released() {
        let ring = ring(4, 2);
        let formatter = ring.stage(0).expect("stage 0");
        let flusher = ring.stage(1).expect("stage 1");

        for seq in 0..4 {
            assert_eq!(ring.claim().expect("room"), seq);
            ring.write(seq, 100 + seq);
            ring.publish(seq);
        }

        let (tx, rx) = mpsc::channel();
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let claimed = ring.claim();
                if let Ok(seq) = claimed {
                    ring.write(seq, 999);
                    ring.publish(seq);
                }
                tx.send(claimed).expect("test receiver alive");
            })
        };

        assert!(
            rx.recv_timeout(Duration::from_millis(100)).is_err(),
            "💀 the fifth claim must block on a full ring"
        );
        assert_eq!(ring.read(0, |v| *v), 100, "slot 0 must still hold its unread value");

        // -- 🐢 the formatter letting go is not enough. every stage has to be done with it.
        formatter.advance(0);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        flusher.advance(0);
        let claimed = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("💀 the claimant should have been released");
        assert_eq!(claimed, Ok(4));
        producer.join().expect("producer thread panicked");
        assert_eq!(ring.read(4, |v| *v), 999);
    }

    #[test]
    fn the_one_where_closing_releases_a_blocked_claimant() {
        let ring = ring(2, 1);
        for seq in 0..2 {
            ring.claim().expect("room");
            ring.publish(seq);
        }

        let (tx, rx) = mpsc::channel();
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || tx.send(ring.claim()).expect("test receiver alive"))
        };
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        assert_eq!(ring.close(), 2);
        let claimed = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("💀 close must release blocked claimants");
        assert_eq!(claimed, Err(BufferError::Closed));
        assert_eq!(ring.claim(), Err(BufferError::Closed));
        producer.join().expect("producer thread panicked");
    }

    #[test]
    fn the_one_where_stages_drain_what_was_claimed_before_the_close() {
        let ring = ring(8, 2);
        let formatter = ring.stage(0).expect("stage 0");
        let flusher = ring.stage(1).expect("stage 1");

        let published = ring.claim().expect("claim 0");
        ring.publish(published);
        let in_flight = ring.claim().expect("claim 1");
        assert_eq!(ring.close(), 2);

        // -- 🛬 seq 1 was claimed before the close, so its publish still counts
        let late = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                ring.write(in_flight, 42);
                ring.publish(in_flight);
            })
        };

        let mut next = 0;
        loop {
            match formatter.wait_for(next) {
                Available::UpTo(end) => {
                    formatter.advance(end);
                    next = end + 1;
                }
                Available::Drained => break,
            }
        }
        assert_eq!(next, 2);
        late.join().expect("late publisher panicked");

        assert_eq!(flusher.wait_for(0), Available::UpTo(1));
        assert_eq!(flusher.read(1, |v| *v), 42);
        flusher.advance(1);
        assert_eq!(flusher.wait_for(2), Available::Drained);
    }

    #[test]
    fn the_one_where_many_producers_share_one_global_order() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 2_000;

        let ring = ring(64, 1);
        let stage = ring.stage(0).expect("stage 0");

        let consumer = thread::spawn(move || {
            let mut seen = Vec::new();
            let mut next = 0;
            loop {
                match stage.wait_for(next) {
                    Available::UpTo(end) => {
                        for seq in next..=end {
                            seen.push(stage.read(seq, |v| *v));
                        }
                        stage.advance(end);
                        next = end + 1;
                    }
                    Available::Drained => return seen,
                }
            }
        });

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let seq = ring.claim().expect("ring closed too early");
                        ring.write(seq, producer * 1_000_000 + i);
                        ring.publish(seq);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().expect("producer panicked");
        }
        ring.close();

        let seen = consumer.join().expect("consumer panicked");
        assert_eq!(seen.len() as u64, PRODUCERS * PER_PRODUCER);
        for producer in 0..PRODUCERS {
            let mine: Vec<u64> = seen
                .iter()
                .filter(|v| **v / 1_000_000 == producer)
                .map(|v| *v % 1_000_000)
                .collect();
            let expected: Vec<u64> = (0..PER_PRODUCER).collect();
            assert_eq!(mine, expected, "producer {producer} lost or reordered events");
        }
    }
}
