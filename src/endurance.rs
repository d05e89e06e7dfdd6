//! Wear-leveled storage of a single record.
//!
//! An EEPROM cell survives a limited number of writes (about 100k on AVR
//! parts). A value rewritten every minute would wear its cells out in a few
//! months. [`EnduranceIndex`] rotates successive writes over `N` data slots so
//! each physical address sees only `1/N` of the writes.
//!
//! # Layout
//!
//! With `N > 1` the region holds `N` status slots followed by `N` data slots:
//!
//! ```text
//! base                          base + 4N
//! | status 0 | ... | status N-1 | data 0 | ... | data N-1 |
//! ```
//!
//! Each status slot is `{ counter: u16, checksum: u16 }` little-endian. The
//! counter is the number of writes performed so far; data slot `c mod N` is the
//! next one to be written. With `N == 1` the region is a single data slot and
//! there is no status at all.
//!
//! # Recovery
//!
//! Data is written before its status, so a power cut between the two leaves
//! the previous status (and the previous record) intact. On startup the status
//! slots are scanned in circular order; counters increase by exactly one from
//! slot to slot everywhere except right after the most recently written slot.

use core::marker::PhantomData;

use log::{debug, info, warn};

use crate::config::{EnduranceConfig, LayoutPlanner};
use crate::crc::crc16;
use crate::error::{StorageError, StorageResult};
use crate::record::{MAX_RECORD_SIZE, Record};
use crate::storage::{Address, ERASED_BYTE, NonVolatileStore};

/// Counter value of a status slot that has never been written.
///
/// Matches the erased state of the medium, so no separate "valid" flag is
/// stored. Real counters never take this value.
pub const VIRGIN_COUNTER: u16 = 0xFFFF;

/// Bytes occupied by one [`SlotStatus`]
pub const STATUS_SIZE: u16 = 4;

/// Bookkeeping stored alongside each data slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotStatus {
    /// Number of writes performed when this slot was last updated
    pub counter: u16,
    /// CRC16 of the slot's data bytes
    pub checksum: u16,
}

impl SlotStatus {
    const VIRGIN: Self = Self {
        counter: VIRGIN_COUNTER,
        checksum: 0xFFFF,
    };

    fn load<S: NonVolatileStore>(store: &S, addr: Address) -> Self {
        Self {
            counter: store.read_word(addr),
            checksum: store.read_word(addr + 2),
        }
    }

    fn to_bytes(self) -> [u8; STATUS_SIZE as usize] {
        let mut bytes = [0u8; STATUS_SIZE as usize];
        bytes[0..2].copy_from_slice(&self.counter.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }
}

/// Record read back from an [`EnduranceIndex`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readback<R> {
    /// Decoded record, returned even when the checksum does not match
    pub record: R,
    /// Whether the stored checksum matched the data
    pub intact: bool,
}

impl<R> Readback<R> {
    /// Turn a checksum mismatch into [`StorageError::Corrupted`]
    pub fn checked(self) -> StorageResult<R> {
        if self.intact {
            Ok(self.record)
        } else {
            Err(StorageError::Corrupted)
        }
    }
}

/// One record of type `R` spread over `N` slots for write endurance
#[derive(Debug)]
pub struct EnduranceIndex<R> {
    status_addr: Address,
    data_addr: Address,
    endurance: u16,
    /// Status of the current slot, kept to avoid rescanning on every call
    status: SlotStatus,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> EnduranceIndex<R> {
    /// Bind an endurance index to `base` and recover its state from the store.
    ///
    /// Virgin memory is initialized with an erased record in slot 0. A
    /// checksum mismatch found during recovery is logged; the data is kept.
    pub fn new<S: NonVolatileStore>(
        store: &mut S,
        base: Address,
        endurance: u16,
    ) -> StorageResult<Self> {
        if endurance == 0 {
            return Err(StorageError::InvalidConfig(
                "endurance factor must be at least 1",
            ));
        }
        if R::SIZE > MAX_RECORD_SIZE {
            return Err(StorageError::RecordTooLarge {
                size: R::SIZE,
                max: MAX_RECORD_SIZE,
            });
        }

        let required = Self::footprint(endurance);
        if base as u32 + required > store.mem_size() as u32 {
            return Err(StorageError::InsufficientMemory {
                base,
                required,
                available: store.mem_size(),
            });
        }

        let data_addr = if endurance > 1 {
            base + endurance * STATUS_SIZE
        } else {
            base
        };

        let mut index = Self {
            status_addr: base,
            data_addr,
            endurance,
            status: SlotStatus::VIRGIN,
            _record: PhantomData,
        };

        if endurance > 1 {
            let page = store.page_size() as usize;
            if page > 0 && R::SIZE % page != 0 {
                warn!(
                    "Record size {} is not a multiple of the page size {}, endurance is not optimal",
                    R::SIZE,
                    page
                );
            }
            index.recover(store);
        }

        Ok(index)
    }

    /// Reserve space from `planner` and build the index described by `config`
    pub fn open<S: NonVolatileStore>(
        store: &mut S,
        planner: &mut LayoutPlanner,
        config: &EnduranceConfig,
    ) -> StorageResult<Self> {
        let base = planner.place(Self::footprint(config.endurance))?;
        Self::new(store, base, config.endurance)
    }

    /// Bytes needed for a record of type `R` with the given endurance factor
    pub fn footprint(endurance: u16) -> u32 {
        if endurance > 1 {
            endurance as u32 * (STATUS_SIZE as u32 + R::SIZE as u32)
        } else {
            R::SIZE as u32
        }
    }

    /// Bytes this index occupies in the store
    pub fn storage_size(&self) -> u16 {
        Self::footprint(self.endurance) as u16
    }

    /// First address of the index
    pub fn base_address(&self) -> Address {
        self.status_addr
    }

    /// Number of slots the writes rotate over
    pub fn endurance_factor(&self) -> u16 {
        self.endurance
    }

    /// Write counter of the current slot ([`VIRGIN_COUNTER`] when `N == 1`)
    pub fn counter(&self) -> u16 {
        self.status.counter
    }

    /// Persist `record` in the next slot
    pub fn write<S: NonVolatileStore>(&mut self, store: &mut S, record: &R) {
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let bytes = &mut buf[..R::SIZE];
        record.encode(bytes);

        if self.endurance == 1 {
            store.write_block(self.data_addr, bytes);
            return;
        }

        // The counter already designates the next slot
        let slot = self.status.counter % self.endurance;
        store.write_block(self.data_slot_addr(slot), bytes);

        self.status = SlotStatus {
            counter: self.next_counter(),
            checksum: crc16(bytes),
        };
        store.write_block(self.status_slot_addr(slot), &self.status.to_bytes());

        debug!(
            "Endurance index 0x{:04X}: wrote slot {} (counter {})",
            self.status_addr, slot, self.status.counter
        );
    }

    /// Read the most recently written record and verify its checksum
    pub fn read<S: NonVolatileStore>(&self, store: &S) -> Readback<R> {
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let bytes = &mut buf[..R::SIZE];

        if self.endurance == 1 {
            store.read_block(self.data_addr, bytes);
            return Readback {
                record: R::decode(bytes),
                intact: true,
            };
        }

        store.read_block(self.data_slot_addr(self.current_slot()), bytes);
        let intact = crc16(bytes) == self.status.checksum;
        if !intact {
            warn!(
                "Endurance index 0x{:04X}: checksum mismatch in slot {}",
                self.status_addr,
                self.current_slot()
            );
        }

        Readback {
            record: R::decode(bytes),
            intact,
        }
    }

    /// Counters run modulo the largest multiple of `N` below the virgin value,
    /// so `counter mod N` stays continuous across the wrap.
    fn wrap_limit(&self) -> u32 {
        let n = self.endurance as u32;
        (VIRGIN_COUNTER as u32 - 1) / n * n
    }

    fn next_counter(&self) -> u16 {
        ((self.status.counter as u32 + 1) % self.wrap_limit()) as u16
    }

    /// Slot holding the latest data: `(counter - 1) mod N`
    fn current_slot(&self) -> u16 {
        let limit = self.wrap_limit();
        let previous = (self.status.counter as u32 % limit + limit - 1) % limit;
        (previous % self.endurance as u32) as u16
    }

    /// True when `next` is exactly one write after `prev`
    fn follows(&self, prev: u16, next: u16) -> bool {
        let limit = self.wrap_limit();
        let (prev, next) = (prev as u32, next as u32);
        prev < limit && next < limit && (next + limit - prev) % limit == 1
    }

    fn status_slot_addr(&self, slot: u16) -> Address {
        self.status_addr + slot * STATUS_SIZE
    }

    fn data_slot_addr(&self, slot: u16) -> Address {
        self.data_addr + slot * R::SIZE as u16
    }

    /// Locate the current slot from the persisted counters
    fn recover<S: NonVolatileStore>(&mut self, store: &mut S) {
        let n = self.endurance;
        let mut status = SlotStatus::load(store, self.status_slot_addr(0));
        let mut found = None;

        for slot in 0..n {
            let next = SlotStatus::load(store, self.status_slot_addr((slot + 1) % n));
            if !self.follows(status.counter, next.counter) {
                found = Some(slot);
                break;
            }
            status = next;
        }

        let Some(slot) = found else {
            // Counters can't all follow each other around the ring
            warn!(
                "Endurance index 0x{:04X}: no write boundary found, reinitializing",
                self.status_addr
            );
            self.initialize(store);
            return;
        };

        self.status = status;
        if status.counter == VIRGIN_COUNTER {
            self.initialize(store);
            return;
        }

        if slot != self.current_slot() {
            warn!(
                "Endurance index 0x{:04X}: counter {} does not belong to slot {}",
                self.status_addr, status.counter, slot
            );
        }

        let mut buf = [0u8; MAX_RECORD_SIZE];
        let bytes = &mut buf[..R::SIZE];
        store.read_block(self.data_slot_addr(self.current_slot()), bytes);
        if crc16(bytes) != status.checksum {
            // No rollback: the caller sees the mismatch on read
            warn!(
                "Endurance index 0x{:04X}: memory corruption detected in slot {}",
                self.status_addr, slot
            );
        }

        debug!(
            "Endurance index 0x{:04X}: recovered slot {} (counter {})",
            self.status_addr, slot, status.counter
        );
    }

    /// Claim a never used region: erased record in slot 0, counter 1
    fn initialize<S: NonVolatileStore>(&mut self, store: &mut S) {
        info!(
            "Endurance index 0x{:04X}: initializing {} slots of {} bytes",
            self.status_addr, self.endurance, R::SIZE
        );

        let erased = [ERASED_BYTE; MAX_RECORD_SIZE];
        let bytes = &erased[..R::SIZE];
        store.write_block(self.data_slot_addr(0), bytes);

        self.status = SlotStatus {
            counter: 1,
            checksum: crc16(bytes),
        };
        store.write_block(self.status_slot_addr(0), &self.status.to_bytes());
    }
}
