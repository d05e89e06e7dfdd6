//! Periodic time series on top of [`RingBuffer`].
//!
//! A [`TimeRingBuffer`] is created with a `period`, the expected interval
//! between two samples in an arbitrary time unit. `insert` can be called as
//! often as convenient: a sample is only stored once a whole number of periods
//! has elapsed since the last stored one. Periods that went by without a
//! sample are kept as erased placeholders, so element `i` is always exactly
//! `i` periods older than the newest.
//!
//! The timestamp of the newest sample is persisted in its own
//! [`EnduranceIndex`] right after the ring, so the series resumes correctly
//! after a power loss.

use log::{debug, info, warn};

use crate::config::{LayoutPlanner, TimeRingConfig};
use crate::endurance::{EnduranceIndex, Readback};
use crate::error::{StorageError, StorageResult};
use crate::record::Record;
use crate::ring::RingBuffer;
use crate::storage::{Address, NonVolatileStore};

/// Time in caller-defined units (seconds, minutes, ...)
pub type Timestamp = i32;

/// Stored timestamp of a region that was never written.
///
/// This is the erased bit pattern `0xFFFF_FFFF`; a real timestamp of `-1` is
/// indistinguishable from it and resets the series on the next start.
pub const VIRGIN_TIMESTAMP: Timestamp = -1;

/// Timestamp recorded for an empty series.
///
/// `insert` treats it as "no sample yet" and always starts a fresh series.
pub const UNSET_TIMESTAMP: Timestamp = Timestamp::MIN;

/// Endurance factor used for both indexes when none is configured
pub const DEFAULT_ENDURANCE: u16 = 8;

/// Element of a time series together with its timestamp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedSample<R> {
    /// When the sample was taken
    pub timestamp: Timestamp,
    /// The stored sample
    pub record: R,
}

/// Ring buffer admitting one sample per `period`
#[derive(Debug)]
pub struct TimeRingBuffer<R> {
    ring: RingBuffer<R>,
    last_timestamp: EnduranceIndex<Timestamp>,
    period: Timestamp,
}

impl<R: Record> TimeRingBuffer<R> {
    /// Bind a time series to `base`, restoring the ring and last timestamp.
    ///
    /// `endurance` applies to both the ring head and the timestamp index.
    pub fn new<S: NonVolatileStore>(
        store: &mut S,
        base: Address,
        capacity: u16,
        period: Timestamp,
        endurance: u16,
    ) -> StorageResult<Self> {
        if period <= 0 {
            return Err(StorageError::InvalidConfig("period must be positive"));
        }
        if endurance == 0 {
            return Err(StorageError::InvalidConfig(
                "endurance factor must be at least 1",
            ));
        }

        let required = Self::footprint(capacity, endurance);
        if base as u32 + required > store.mem_size() as u32 {
            return Err(StorageError::InsufficientMemory {
                base,
                required,
                available: store.mem_size(),
            });
        }

        let ring = RingBuffer::<R>::new(store, base, capacity, endurance)?;
        let last_timestamp =
            EnduranceIndex::<Timestamp>::new(store, base + ring.storage_size(), endurance)?;

        let mut series = Self {
            ring,
            last_timestamp,
            period,
        };

        let readback = series.last_timestamp_readback(store);
        if readback.record == VIRGIN_TIMESTAMP {
            info!("Time ring buffer 0x{:04X}: first use, clearing", base);
            series.clear(store);
        } else if !readback.intact {
            warn!(
                "Time ring buffer 0x{:04X}: last timestamp failed its checksum, keeping {}",
                base, readback.record
            );
        }

        Ok(series)
    }

    /// Reserve space from `planner` and build the series described by `config`
    pub fn open<S: NonVolatileStore>(
        store: &mut S,
        planner: &mut LayoutPlanner,
        config: &TimeRingConfig,
    ) -> StorageResult<Self> {
        let base = planner.place(Self::footprint(config.capacity, config.endurance))?;
        Self::new(store, base, config.capacity, config.period, config.endurance)
    }

    /// Bytes needed by the ring and the timestamp index
    pub fn footprint(capacity: u16, endurance: u16) -> u32 {
        RingBuffer::<R>::footprint(capacity, endurance)
            + EnduranceIndex::<Timestamp>::footprint(endurance)
    }

    /// Bytes this series occupies in the store
    pub fn storage_size(&self) -> u16 {
        self.ring.storage_size() + self.last_timestamp.storage_size()
    }

    /// Interval between two samples
    pub fn period(&self) -> Timestamp {
        self.period
    }

    /// Capacity in elements
    pub fn buffer_size(&self) -> u16 {
        self.ring.buffer_size()
    }

    /// Position of the newest element in the ring
    pub fn current_index(&self) -> u16 {
        self.ring.current_index()
    }

    /// Offer a sample taken at `timestamp`.
    ///
    /// Returns `true` when the sample was stored. It is rejected, with no
    /// change to the stored state, while less than a period has elapsed or
    /// when `timestamp` is not a whole number of periods after the last
    /// sample. Time going backwards, or a gap longer than the whole buffer,
    /// restarts the series with this sample, as does the first insert into an
    /// empty series.
    ///
    /// The last timestamp is trusted even when it failed its checksum; check
    /// [`is_intact`](Self::is_intact) after opening to catch that case.
    pub fn insert<S: NonVolatileStore>(
        &mut self,
        store: &mut S,
        sample: &R,
        timestamp: Timestamp,
    ) -> bool {
        let last = self.last_timestamp(store);
        if last == UNSET_TIMESTAMP {
            debug!("Time ring buffer: first sample at {}", timestamp);
            self.restart(store, sample, timestamp);
            return true;
        }

        let last = last as i64;
        let delta = timestamp as i64 - last;
        let period = self.period as i64;
        let span = period * self.buffer_size() as i64;

        if delta < 0 {
            info!(
                "Time ring buffer: clock moved backwards ({} -> {}), restarting series",
                last, timestamp
            );
            self.restart(store, sample, timestamp);
            return true;
        }
        if delta > span {
            info!(
                "Time ring buffer: {} elapsed exceeds buffer span {}, restarting series",
                delta, span
            );
            self.restart(store, sample, timestamp);
            return true;
        }

        let steps = delta / period;
        if steps == 0 || delta % period != 0 {
            debug!(
                "Time ring buffer: sample at {} rejected (delta {}, period {})",
                timestamp, delta, period
            );
            return false;
        }

        if steps > 1 {
            debug!("Time ring buffer: {} periods without sample", steps - 1);
            self.ring.rotate(store, (steps - 1) as u16);
        }
        self.last_timestamp.write(store, &timestamp);
        self.ring.push(store, sample);
        true
    }

    /// Element `index` and its timestamp.
    ///
    /// Indexing follows [`RingBuffer::get`]: `0` is the newest, positive
    /// indexes are older. Placeholder elements decode from the erased pattern.
    pub fn read<S: NonVolatileStore>(&self, store: &S, index: i32) -> (Timestamp, R) {
        let record = self.ring.get(store, index);
        (self.timestamp_of(store, index), record)
    }

    /// Element `index` with its timestamp, or `None` for a placeholder
    pub fn sample<S: NonVolatileStore>(&self, store: &S, index: i32) -> Option<TimedSample<R>> {
        if self.ring.is_erased(store, index) {
            return None;
        }
        Some(TimedSample {
            timestamp: self.timestamp_of(store, index),
            record: self.ring.get(store, index),
        })
    }

    /// Timestamp of the newest element
    pub fn last_timestamp<S: NonVolatileStore>(&self, store: &S) -> Timestamp {
        self.last_timestamp.read(store).record
    }

    /// Timestamp of the newest element along with its checksum result
    pub fn last_timestamp_readback<S: NonVolatileStore>(&self, store: &S) -> Readback<Timestamp> {
        self.last_timestamp.read(store)
    }

    /// `false` when the ring head or the last timestamp failed its checksum.
    ///
    /// A corrupted timestamp shifts the time of every element and may make
    /// the next `insert` restart the series; [`set_timestamp`](Self::set_timestamp)
    /// or [`clear`](Self::clear) repair it.
    pub fn is_intact<S: NonVolatileStore>(&self, store: &S) -> bool {
        self.ring.head_intact() && self.last_timestamp.read(store).intact
    }

    /// Overwrite the timestamp of the newest element.
    ///
    /// This shifts the time of every stored element and bypasses the period
    /// checks. Only meant for initialization, e.g. once the real time is
    /// known after boot.
    pub fn set_timestamp<S: NonVolatileStore>(&mut self, store: &mut S, timestamp: Timestamp) {
        self.last_timestamp.write(store, &timestamp);
    }

    /// Erase every element and forget the last timestamp
    pub fn clear<S: NonVolatileStore>(&mut self, store: &mut S) {
        self.ring.clear(store);
        self.last_timestamp.write(store, &UNSET_TIMESTAMP);
    }

    fn restart<S: NonVolatileStore>(&mut self, store: &mut S, sample: &R, timestamp: Timestamp) {
        self.ring.clear(store);
        self.last_timestamp.write(store, &timestamp);
        self.ring.push(store, sample);
    }

    fn timestamp_of<S: NonVolatileStore>(&self, store: &S, index: i32) -> Timestamp {
        let steps = (index as i64).rem_euclid(self.buffer_size() as i64);
        let timestamp = self.last_timestamp(store) as i64 - steps * self.period as i64;
        timestamp.clamp(Timestamp::MIN as i64, Timestamp::MAX as i64) as Timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;

    fn series(store: &mut MemStore) -> TimeRingBuffer<u32> {
        TimeRingBuffer::<u32>::new(store, 0, 8, 2, DEFAULT_ENDURANCE).unwrap()
    }

    fn stored(series: &TimeRingBuffer<u32>, store: &MemStore) -> usize {
        (0..series.buffer_size() as i32)
            .filter(|&i| series.sample(store, i).is_some())
            .count()
    }

    #[test]
    fn test_admits_only_whole_periods() {
        let mut store = MemStore::new(1024, 4);
        let mut series = series(&mut store);

        assert!(series.insert(&mut store, &10, 0));
        assert!(series.insert(&mut store, &11, 2));
        assert!(!series.insert(&mut store, &12, 3), "not a multiple of the period");
        assert_eq!(series.last_timestamp(&store), 2, "rejection leaves state unchanged");
        assert!(series.insert(&mut store, &13, 4));

        assert_eq!(series.read(&store, 0), (4, 13));
        assert_eq!(series.read(&store, 1), (2, 11));
        assert_eq!(series.read(&store, 2), (0, 10));
    }

    #[test]
    fn test_rejects_before_period_elapsed() {
        let mut store = MemStore::new(1024, 4);
        let mut series = series(&mut store);

        assert!(series.insert(&mut store, &1, 10));
        let index = series.current_index();
        assert!(!series.insert(&mut store, &2, 10));
        assert!(!series.insert(&mut store, &3, 11));
        assert_eq!(series.current_index(), index);
        assert_eq!(stored(&series, &store), 1);
    }

    #[test]
    fn test_gap_longer_than_span_restarts() {
        let mut store = MemStore::new(1024, 4);
        let mut series = series(&mut store);

        assert!(series.insert(&mut store, &1, 0));
        assert!(series.insert(&mut store, &2, 2));
        assert!(series.insert(&mut store, &3, 100));

        assert_eq!(series.last_timestamp(&store), 100);
        assert_eq!(stored(&series, &store), 1);
        assert_eq!(series.read(&store, 0), (100, 3));
    }

    #[test]
    fn test_clock_going_backwards_restarts() {
        let mut store = MemStore::new(1024, 4);
        let mut series = series(&mut store);

        assert!(series.insert(&mut store, &1, 10));
        assert!(series.insert(&mut store, &2, 4));

        assert_eq!(series.last_timestamp(&store), 4);
        assert_eq!(stored(&series, &store), 1);
    }

    #[test]
    fn test_missed_periods_become_placeholders() {
        let mut store = MemStore::new(1024, 4);
        let mut series = series(&mut store);

        assert!(series.insert(&mut store, &7, 0));
        assert!(series.insert(&mut store, &8, 6));

        assert_eq!(series.sample(&store, 0), Some(TimedSample { timestamp: 6, record: 8 }));
        assert_eq!(series.sample(&store, 1), None);
        assert_eq!(series.sample(&store, 2), None);
        assert_eq!(series.sample(&store, 3), Some(TimedSample { timestamp: 0, record: 7 }));
        assert_eq!(series.read(&store, 1), (4, u32::MAX));
    }

    #[test]
    fn test_gap_of_exactly_span_keeps_only_new_sample() {
        let mut store = MemStore::new(1024, 4);
        let mut series = TimeRingBuffer::<u32>::new(&mut store, 0, 4, 2, 1).unwrap();

        assert!(series.insert(&mut store, &1, 0));
        assert!(series.insert(&mut store, &2, 8));

        assert_eq!(stored(&series, &store), 1);
        assert_eq!(series.read(&store, 0), (8, 2));
    }

    #[test]
    fn test_negative_index_timestamps() {
        let mut store = MemStore::new(1024, 4);
        let mut series = TimeRingBuffer::<u32>::new(&mut store, 0, 4, 10, 2).unwrap();
        for t in [0, 10, 20, 30] {
            assert!(series.insert(&mut store, &(t as u32), t));
        }

        assert_eq!(series.read(&store, -1), (0, 0), "-1 is the oldest");
        assert_eq!(series.read(&store, -2), (10, 10));
        assert_eq!(series.read(&store, 5), (20, 20));
    }

    #[test]
    fn test_resumes_after_restart() {
        let mut store = MemStore::new(1024, 4);
        {
            let mut series = series(&mut store);
            assert!(series.insert(&mut store, &1, 40));
            assert!(series.insert(&mut store, &2, 42));
        }

        let mut series = series(&mut store);
        assert_eq!(series.last_timestamp(&store), 42);
        assert!(!series.insert(&mut store, &3, 43));
        assert!(series.insert(&mut store, &3, 44));
        assert_eq!(series.read(&store, 2), (40, 1));
    }

    #[test]
    fn test_first_insert_on_fresh_store() {
        let mut store = MemStore::new(1024, 4);
        let mut series = series(&mut store);

        assert_eq!(series.last_timestamp(&store), UNSET_TIMESTAMP);
        assert_eq!(stored(&series, &store), 0);
        assert!(series.insert(&mut store, &5, -1_000));
        assert_eq!(series.read(&store, 0), (-1_000, 5));
    }

    #[test]
    fn test_first_insert_near_unset_timestamp() {
        let mut store = MemStore::new(1024, 4);
        let mut series = series(&mut store);

        assert!(series.insert(&mut store, &1, Timestamp::MIN), "empty series accepts any time");
        assert_eq!(series.read(&store, 0), (Timestamp::MIN, 1));

        series.clear(&mut store);
        assert!(series.insert(&mut store, &2, Timestamp::MIN + 3));
        assert_eq!(series.read(&store, 0), (Timestamp::MIN + 3, 2));
    }

    #[test]
    fn test_old_timestamps_saturate() {
        let mut store = MemStore::new(1024, 4);
        let mut series = series(&mut store);

        assert_eq!(series.read(&store, 1).0, Timestamp::MIN);
        assert_eq!(series.read(&store, -1).0, Timestamp::MIN);

        series.set_timestamp(&mut store, Timestamp::MIN + 5);
        assert_eq!(series.read(&store, 2).0, Timestamp::MIN + 1);
        assert_eq!(series.read(&store, 3).0, Timestamp::MIN);
    }

    #[test]
    fn test_corrupted_timestamp_is_reported() {
        let mut store = MemStore::new(1024, 4);
        {
            let mut series = series(&mut store);
            assert!(series.insert(&mut store, &1, 100));
            assert!(series.is_intact(&store));

            // Low byte of the current timestamp slot: 100 becomes 0
            let slot = (series.last_timestamp.counter() - 1) % DEFAULT_ENDURANCE;
            let data = series.ring.storage_size() + DEFAULT_ENDURANCE * 4;
            store.poke(data + slot * 4, 0x00);
        }

        let mut series = series(&mut store);
        let readback = series.last_timestamp_readback(&store);
        assert_eq!(readback.record, 0);
        assert!(!readback.intact, "checksum mismatch must be visible");
        assert!(matches!(readback.checked(), Err(StorageError::Corrupted)));
        assert!(!series.is_intact(&store));

        series.set_timestamp(&mut store, 100);
        assert!(series.is_intact(&store));
        assert_eq!(series.read(&store, 0), (100, 1));
    }

    #[test]
    fn test_set_timestamp_shifts_series() {
        let mut store = MemStore::new(1024, 4);
        let mut series = series(&mut store);
        assert!(series.insert(&mut store, &1, 0));

        series.set_timestamp(&mut store, 1_000);
        assert_eq!(series.read(&store, 0), (1_000, 1));
        assert!(series.insert(&mut store, &2, 1_002));
    }

    #[test]
    fn test_storage_size() {
        let mut store = MemStore::new(1024, 4);
        let series = series(&mut store);

        let expected = 8 * (4 + 4) + 8 * 4 + 8 * (4 + 4);
        assert_eq!(series.storage_size(), expected);
        assert_eq!(TimeRingBuffer::<u32>::footprint(8, 8), expected as u32);
    }

    #[test]
    fn test_invalid_period() {
        let mut store = MemStore::new(1024, 4);
        assert!(matches!(
            TimeRingBuffer::<u32>::new(&mut store, 0, 8, 0, 8),
            Err(StorageError::InvalidConfig(_))
        ));
    }
}
