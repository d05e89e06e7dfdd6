//! Power-loss tolerant ring buffers and time series for EEPROM-class storage
//!
//! The crate is a stack of three layers over a byte-addressable
//! [`NonVolatileStore`]:
//!
//! - [`EnduranceIndex`]: one record rotated over several slots to spread
//!   wear, with a CRC16 to detect corruption and counters to find the latest
//!   write after a restart.
//! - [`RingBuffer`]: a circular buffer whose head survives power loss.
//! - [`TimeRingBuffer`]: a ring that admits one sample per period and fills
//!   missed periods with erased placeholders.
//!
//! Structures never own the store. The application creates one store
//! instance and passes it to every call, which keeps the crate `#![no_std]`
//! and lets tests use [`MemStore`] instead of real hardware.
//!
//! ```ignore
//! let mut store = MemStore::new(1024, 4);
//! let mut planner = LayoutPlanner::new(&store, 0);
//! let mut hourly = TimeRingBuffer::<i32>::open(&mut store, &mut planner, &TimeRingConfig::new(24, 3600))?;
//!
//! hourly.insert(&mut store, &temperature, now);
//! let (when, value) = hourly.read(&store, 1);
//! ```

#![no_std]

extern crate alloc;

pub mod config;
pub mod crc;
pub mod endurance;
pub mod error;
pub mod record;
pub mod ring;
pub mod storage;
pub mod time_ring;

pub use config::{EnduranceConfig, LayoutPlanner, RingConfig, TimeRingConfig};
pub use endurance::{EnduranceIndex, Readback};
pub use error::{StorageError, StorageResult};
pub use record::Record;
pub use ring::RingBuffer;
pub use storage::{Address, MemStore, NonVolatileStore};
pub use time_ring::{TimeRingBuffer, TimedSample, Timestamp};
