//! Structure configuration and address layout.
//!
//! The stored layout is not self-describing: a structure must be reopened with
//! exactly the configuration it was created with, at the same address. The
//! configs here are `serde` types so a firmware can keep them in a postcard
//! blob next to its other settings, and [`LayoutPlanner`] turns a list of
//! configs into non-overlapping address ranges.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::storage::{Address, NonVolatileStore};
use crate::time_ring::{DEFAULT_ENDURANCE, Timestamp};

/// Configuration of a standalone [`EnduranceIndex`](crate::endurance::EnduranceIndex)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnduranceConfig {
    /// Number of slots the writes rotate over
    pub endurance: u16,
}

/// Configuration of a [`RingBuffer`](crate::ring::RingBuffer)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    /// Number of elements
    pub capacity: u16,
    /// Endurance factor of the head index
    pub endurance: u16,
}

/// Configuration of a [`TimeRingBuffer`](crate::time_ring::TimeRingBuffer)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRingConfig {
    /// Number of elements
    pub capacity: u16,
    /// Interval between samples
    pub period: Timestamp,
    /// Endurance factor of the head and timestamp indexes
    pub endurance: u16,
}

impl Default for EnduranceConfig {
    fn default() -> Self {
        Self { endurance: 1 }
    }
}

impl RingConfig {
    /// Ring without endurance on its head index
    pub const fn new(capacity: u16) -> Self {
        Self {
            capacity,
            endurance: 1,
        }
    }
}

impl TimeRingConfig {
    /// Series using [`DEFAULT_ENDURANCE`]
    pub const fn new(capacity: u16, period: Timestamp) -> Self {
        Self {
            capacity,
            period,
            endurance: DEFAULT_ENDURANCE,
        }
    }
}

/// Decode a configuration from a postcard blob
pub fn from_postcard<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> StorageResult<T> {
    postcard::from_bytes(bytes).map_err(StorageError::Config)
}

/// Encode a configuration as a postcard blob
pub fn to_postcard<T: Serialize>(config: &T) -> StorageResult<Vec<u8>> {
    postcard::to_allocvec(config).map_err(StorageError::Config)
}

/// Hands out consecutive, non-overlapping address ranges of a store.
///
/// Structures are placed in call order, so the same sequence of `place`
/// calls yields the same addresses on every boot.
#[derive(Debug, Clone)]
pub struct LayoutPlanner {
    next: Address,
    mem_size: u16,
}

impl LayoutPlanner {
    /// Plan a layout starting at `start`
    pub fn new<S: NonVolatileStore>(store: &S, start: Address) -> Self {
        Self {
            next: start,
            mem_size: store.mem_size(),
        }
    }

    /// Reserve `size` bytes and return their first address
    pub fn place(&mut self, size: u32) -> StorageResult<Address> {
        let base = self.next;
        if base as u32 + size > self.mem_size as u32 {
            return Err(StorageError::InsufficientMemory {
                base,
                required: size,
                available: self.mem_size,
            });
        }
        self.next = (base as u32 + size) as Address;
        Ok(base)
    }

    /// First address not yet reserved
    pub fn next_address(&self) -> Address {
        self.next
    }

    /// Bytes still available
    pub fn remaining(&self) -> u16 {
        self.mem_size.saturating_sub(self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endurance::EnduranceIndex;
    use crate::ring::RingBuffer;
    use crate::storage::MemStore;
    use crate::time_ring::TimeRingBuffer;

    #[test]
    fn test_planner_places_back_to_back() {
        let store = MemStore::new(100, 4);
        let mut planner = LayoutPlanner::new(&store, 10);

        assert_eq!(planner.place(30).unwrap(), 10);
        assert_eq!(planner.place(20).unwrap(), 40);
        assert_eq!(planner.next_address(), 60);
        assert_eq!(planner.remaining(), 40);
    }

    #[test]
    fn test_planner_rejects_overflow() {
        let store = MemStore::new(100, 4);
        let mut planner = LayoutPlanner::new(&store, 0);
        planner.place(90).unwrap();

        assert!(matches!(
            planner.place(11),
            Err(StorageError::InsufficientMemory { base: 90, required: 11, available: 100 })
        ));
        assert_eq!(planner.next_address(), 90, "failed placement reserves nothing");
    }

    #[test]
    fn test_open_structures_without_overlap() {
        let mut store = MemStore::new(1024, 4);
        let mut planner = LayoutPlanner::new(&store, 0);

        let mut counter = EnduranceIndex::<u32>::open(
            &mut store,
            &mut planner,
            &EnduranceConfig { endurance: 4 },
        )
        .unwrap();
        let mut ring =
            RingBuffer::<u16>::open(&mut store, &mut planner, &RingConfig::new(6)).unwrap();
        let mut series =
            TimeRingBuffer::<u32>::open(&mut store, &mut planner, &TimeRingConfig::new(5, 60))
                .unwrap();

        assert_eq!(ring.base_address(), counter.storage_size());
        assert_eq!(
            planner.next_address(),
            counter.storage_size() + ring.storage_size() + series.storage_size()
        );

        counter.write(&mut store, &42);
        ring.push(&mut store, &7);
        assert!(series.insert(&mut store, &9, 600));

        assert_eq!(counter.read(&store).record, 42);
        assert_eq!(ring.get(&store, 0), 7);
        assert_eq!(series.read(&store, 0), (600, 9));
    }

    #[test]
    fn test_postcard_config() {
        let config = TimeRingConfig::new(24, 3600);
        let bytes = to_postcard(&config).unwrap();
        let decoded: TimeRingConfig = from_postcard(&bytes).unwrap();
        assert_eq!(decoded, config);
        assert_eq!(decoded.endurance, DEFAULT_ENDURANCE);
    }

    #[test]
    fn test_truncated_postcard_config() {
        let bytes = to_postcard(&RingConfig::new(300)).unwrap();
        let result: StorageResult<RingConfig> = from_postcard(&bytes[..1]);
        assert!(matches!(result, Err(StorageError::Config(_))));
    }
}
