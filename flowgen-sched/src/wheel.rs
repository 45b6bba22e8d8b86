//! Hierarchical timer wheel.
//!
//! Timers live in one of up to four cascading levels, each a power-of-two
//! array of buckets. Level 0 has one bucket per tick; each higher level
//! covers `buckets` times the span of the one below and hands its timers
//! down as the lower level completes revolutions. Insert, cancel and fire
//! all cost O(1) amortized, independent of how many timers are pending.

use std::time::Duration;

use thiserror::Error;
use tracing::trace;

use flowgen_common::Tick;

/// Smallest accepted bucket count per level.
pub const MIN_BUCKETS: usize = 256;
/// Bucket counts must stay below this.
pub const MAX_BUCKETS: usize = 65_536;
/// Largest accepted level count.
pub const MAX_LEVELS: u8 = 4;
/// Accepted bucket time range, in microseconds.
pub const BUCKET_TIME_USEC: std::ops::RangeInclusive<f64> = 10.0..=200.0;

/// Wheel geometry errors. All fatal and raised before any timer exists.
#[derive(Debug, Error, PartialEq)]
pub enum WheelError {
    #[error("bucket count must be a power of two in [{MIN_BUCKETS}, {MAX_BUCKETS}), got {0}")]
    InvalidBuckets(usize),
    #[error("level count must be in [1, {MAX_LEVELS}], got {0}")]
    InvalidLevels(u8),
    #[error("bucket time must be in [10.0, 200.0] microseconds, got {0}")]
    InvalidBucketTime(f64),
}

/// Timer wheel geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct WheelConfig {
    /// Buckets per level. Power of two in `[256, 65536)`.
    pub buckets: usize,
    /// Cascading levels, `[1, 4]`.
    pub levels: u8,
    /// Wall-clock duration of one tick, `[10.0, 200.0]` microseconds.
    pub bucket_time_usec: f64,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self { buckets: 1024, levels: 3, bucket_time_usec: 20.0 }
    }
}

impl WheelConfig {
    pub fn validate(&self) -> Result<(), WheelError> {
        if !(MIN_BUCKETS..MAX_BUCKETS).contains(&self.buckets) || !self.buckets.is_power_of_two() {
            return Err(WheelError::InvalidBuckets(self.buckets));
        }
        if self.levels == 0 || self.levels > MAX_LEVELS {
            return Err(WheelError::InvalidLevels(self.levels));
        }
        if !BUCKET_TIME_USEC.contains(&self.bucket_time_usec) {
            return Err(WheelError::InvalidBucketTime(self.bucket_time_usec));
        }
        Ok(())
    }

    /// Wall-clock duration of one tick.
    pub fn bucket_time(&self) -> Duration {
        Duration::from_nanos((self.bucket_time_usec * 1_000.0) as u64)
    }

    /// Number of ticks in `duration`, rounded to the nearest tick and never
    /// less than 1.
    pub fn duration_to_ticks(&self, duration: Duration) -> Tick {
        let ticks = (duration.as_secs_f64() * 1e6 / self.bucket_time_usec).round() as Tick;
        ticks.max(1)
    }

    /// Ticks elapsing per second.
    pub fn ticks_per_second(&self) -> Tick {
        (1e6 / self.bucket_time_usec).round() as Tick
    }
}

/// Stable reference to a started timer. Remains safe to use after the
/// timer fires or is stopped; the generation check turns a stale handle
/// into a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    slot: u32,
    generation: u32,
}

const NIL: u32 = u32::MAX;

#[derive(Debug)]
struct Slot<T> {
    payload: Option<T>,
    generation: u32,
    prev: u32,
    next: u32,
    /// Level and bucket the timer currently sits in. Meaningless while the
    /// slot is on the free list (`payload` is `None`).
    level: u8,
    bucket: u32,
    /// Ticks still owed after the current placement pops. Non-zero only
    /// for timers parked in a higher level.
    ticks_left: Tick,
}

#[derive(Debug)]
struct Level {
    heads: Vec<u32>,
    tails: Vec<u32>,
    cursor: usize,
}

impl Level {
    fn new(buckets: usize) -> Self {
        Self { heads: vec![NIL; buckets], tails: vec![NIL; buckets], cursor: 0 }
    }
}

/// Hierarchical timer wheel owning timers of payload type `T` from
/// [`start`](Self::start) until they fire or are stopped.
#[derive(Debug)]
pub struct TimerWheel<T> {
    config: WheelConfig,
    slots: Vec<Slot<T>>,
    free_head: u32,
    levels: Vec<Level>,
    mask: u64,
    shift: u32,
    ticks: Tick,
    pending: usize,
}

impl<T> TimerWheel<T> {
    /// Builds a wheel with the given geometry. Invalid geometry is a fatal
    /// configuration error; no wheel is constructed.
    pub fn new(config: WheelConfig) -> Result<Self, WheelError> {
        config.validate()?;

        let levels = (0..config.levels).map(|_| Level::new(config.buckets)).collect();
        Ok(Self {
            mask: config.buckets as u64 - 1,
            shift: config.buckets.trailing_zeros(),
            config,
            slots: Vec::new(),
            free_head: NIL,
            levels,
            ticks: 0,
            pending: 0,
        })
    }

    pub fn config(&self) -> &WheelConfig {
        &self.config
    }

    /// Ticks elapsed since construction.
    pub fn ticks(&self) -> Tick {
        self.ticks
    }

    /// Number of timers currently owned by the wheel.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Starts a timer firing `delay` ticks from now. A zero delay is
    /// clamped to 1, so the timer fires on the next tick boundary, never
    /// synchronously.
    pub fn start(&mut self, delay: Tick, payload: T) -> TimerHandle {
        let slot = self.alloc(payload);
        self.place(slot, delay.max(1));
        self.pending += 1;
        TimerHandle { slot, generation: self.slots[slot as usize].generation }
    }

    /// Stops a timer and hands its payload back. `None` if the timer
    /// already fired or was already stopped; double-stop is a safe no-op.
    pub fn stop(&mut self, handle: TimerHandle) -> Option<T> {
        let slot = self.slots.get(handle.slot as usize)?;
        if slot.generation != handle.generation || slot.payload.is_none() {
            return None;
        }

        self.unlink(handle.slot);
        let payload = self.free(handle.slot);
        self.pending -= 1;
        payload
    }

    /// Advances the wheel by one tick and fires every timer due at the new
    /// tick. Callbacks may start timers; those take effect starting the
    /// next tick, never the current one.
    pub fn tick<F>(&mut self, cb: &mut F)
    where
        F: FnMut(&mut Self, T),
    {
        self.ticks += 1;

        // advance the base level; each wrap advances the level above
        let mask = self.mask as usize;
        let mut advanced = 0;
        for level in self.levels.iter_mut() {
            level.cursor = (level.cursor + 1) & mask;
            advanced += 1;
            if level.cursor != 0 {
                break;
            }
        }

        // drain the new active bucket of every level that advanced; higher
        // levels cascade their timers down, the base level fires them
        for li in 0..advanced {
            loop {
                let cursor = self.levels[li].cursor;
                let head = self.levels[li].heads[cursor];
                if head == NIL {
                    break;
                }

                self.unlink(head);
                let ticks_left = self.slots[head as usize].ticks_left;
                if ticks_left == 0 {
                    if let Some(payload) = self.free(head) {
                        self.pending -= 1;
                        cb(self, payload);
                    }
                } else {
                    self.place(head, ticks_left);
                }
            }
        }
    }

    /// Detaches every pending timer and hands each payload to `f`. Used at
    /// shutdown so no timer is silently dropped while armed.
    pub fn detach_all<F>(&mut self, mut f: F)
    where
        F: FnMut(T),
    {
        for li in 0..self.levels.len() {
            for bucket in 0..self.levels[li].heads.len() {
                loop {
                    let head = self.levels[li].heads[bucket];
                    if head == NIL {
                        break;
                    }
                    self.unlink(head);
                    if let Some(payload) = self.free(head) {
                        self.pending -= 1;
                        f(payload);
                    }
                }
            }
        }
        debug_assert_eq!(self.pending, 0);
    }

    /// Links `slot` into the level and bucket matching `delay` ticks from
    /// now. Delays beyond a level's span cascade upward; delays beyond the
    /// whole wheel's horizon park in the top level's furthest bucket and
    /// come back around lap by lap.
    fn place(&mut self, slot: u32, delay: Tick) {
        let buckets = self.mask + 1;

        if delay < buckets {
            let bucket = (self.levels[0].cursor as u64 + delay) & self.mask;
            self.link(slot, 0, bucket as u32, 0);
            return;
        }

        let mut nticks = delay;
        let mut total_shift = 0;
        let mut residue = self.levels[0].cursor as u64;

        for li in 1..self.levels.len() {
            nticks >>= self.shift;
            total_shift += self.shift;

            if nticks < buckets {
                let ticks_left = delay - ((nticks << total_shift) - residue);
                let bucket = (self.levels[li].cursor as u64 + nticks) & self.mask;
                self.link(slot, li as u8, bucket as u32, ticks_left);
                return;
            }
            residue += (self.levels[li].cursor as u64) << total_shift;
        }

        // beyond the horizon: park in the top level's furthest bucket and
        // re-place with the residue when it pops
        let top = self.levels.len() - 1;
        residue -= (self.levels[top].cursor as u64) << total_shift;
        let ticks_left = delay - ((self.mask << total_shift) - residue);
        let bucket = (self.levels[top].cursor as u64 + self.mask) & self.mask;
        trace!(delay, ticks_left, "timer beyond wheel horizon, parking in top level");
        self.link(slot, top as u8, bucket as u32, ticks_left);
    }

    fn link(&mut self, slot: u32, level: u8, bucket: u32, ticks_left: Tick) {
        let lv = &mut self.levels[level as usize];
        let tail = lv.tails[bucket as usize];

        {
            let s = &mut self.slots[slot as usize];
            s.level = level;
            s.bucket = bucket;
            s.ticks_left = ticks_left;
            s.prev = tail;
            s.next = NIL;
        }

        if tail == NIL {
            lv.heads[bucket as usize] = slot;
        } else {
            self.slots[tail as usize].next = slot;
        }
        self.levels[level as usize].tails[bucket as usize] = slot;
    }

    fn unlink(&mut self, slot: u32) {
        let (prev, next, level, bucket) = {
            let s = &self.slots[slot as usize];
            (s.prev, s.next, s.level as usize, s.bucket as usize)
        };

        if prev == NIL {
            self.levels[level].heads[bucket] = next;
        } else {
            self.slots[prev as usize].next = next;
        }
        if next == NIL {
            self.levels[level].tails[bucket] = prev;
        } else {
            self.slots[next as usize].prev = prev;
        }

        let s = &mut self.slots[slot as usize];
        s.prev = NIL;
        s.next = NIL;
    }

    fn alloc(&mut self, payload: T) -> u32 {
        if self.free_head != NIL {
            let slot = self.free_head;
            let s = &mut self.slots[slot as usize];
            self.free_head = s.next;
            s.payload = Some(payload);
            s.prev = NIL;
            s.next = NIL;
            slot
        } else {
            let slot = self.slots.len() as u32;
            self.slots.push(Slot {
                payload: Some(payload),
                generation: 0,
                prev: NIL,
                next: NIL,
                level: 0,
                bucket: 0,
                ticks_left: 0,
            });
            slot
        }
    }

    /// Takes the payload out of `slot`, bumps its generation so stale
    /// handles miss, and returns it to the free list.
    fn free(&mut self, slot: u32) -> Option<T> {
        let s = &mut self.slots[slot as usize];
        let payload = s.payload.take();
        s.generation = s.generation.wrapping_add(1);
        s.next = self.free_head;
        self.free_head = slot;
        payload
    }
}
