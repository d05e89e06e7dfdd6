//! Ring buffer of fixed-size elements kept in non-volatile memory.
//!
//! Elements live in a contiguous data region right after an
//! [`EnduranceIndex`] that persists the head position, so the buffer picks up
//! where it left off after a power loss. The endurance index only protects the
//! head; the elements themselves are naturally spread over the region.
//!
//! ```text
//! base                       base + index size
//! | endurance index (head) | element 0 | element 1 | ... | element C-1 |
//! ```

use core::marker::PhantomData;

use log::{debug, info, warn};

use crate::config::{LayoutPlanner, RingConfig};
use crate::endurance::EnduranceIndex;
use crate::error::{StorageError, StorageResult};
use crate::record::{MAX_RECORD_SIZE, Record, is_erased};
use crate::storage::{Address, ERASED_BYTE, NonVolatileStore};

/// Persisted head of a [`RingBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingIndex {
    /// Byte offset of the most recently written element in the data region
    pub last: u16,
    /// Reserved, pads the index to 4 bytes and stays erased
    pub start: u16,
}

impl RingIndex {
    /// Head value of an index that has never been written
    pub const UNSET: u16 = 0xFFFF;
}

impl Record for RingIndex {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.last.to_le_bytes());
        buf[2..4].copy_from_slice(&self.start.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            last: u16::from_le_bytes([buf[0], buf[1]]),
            start: u16::from_le_bytes([buf[2], buf[3]]),
        }
    }
}

/// Circular buffer of `capacity` records of type `R`
#[derive(Debug)]
pub struct RingBuffer<R> {
    index: EnduranceIndex<RingIndex>,
    ram_index: RingIndex,
    buffer_start: Address,
    /// Total length of the data region: capacity * record size
    buffer_length: u16,
    /// Whether the head passed its checksum when it was last loaded or written
    head_intact: bool,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> RingBuffer<R> {
    /// Bind a ring buffer to `base`, restoring its head from the store.
    ///
    /// A region that was never used, or whose head is not a valid element
    /// offset, is cleared. A head that fails its checksum but still points at
    /// a valid element is kept and reported by [`head_intact`](Self::head_intact).
    pub fn new<S: NonVolatileStore>(
        store: &mut S,
        base: Address,
        capacity: u16,
        index_endurance: u16,
    ) -> StorageResult<Self> {
        if capacity == 0 {
            return Err(StorageError::InvalidConfig("ring capacity must be at least 1"));
        }
        if R::SIZE == 0 {
            return Err(StorageError::InvalidConfig("ring element size must be non-zero"));
        }
        if R::SIZE > MAX_RECORD_SIZE {
            return Err(StorageError::RecordTooLarge {
                size: R::SIZE,
                max: MAX_RECORD_SIZE,
            });
        }
        if index_endurance == 0 {
            return Err(StorageError::InvalidConfig(
                "endurance factor must be at least 1",
            ));
        }

        let required = Self::footprint(capacity, index_endurance);
        if base as u32 + required > store.mem_size() as u32 {
            return Err(StorageError::InsufficientMemory {
                base,
                required,
                available: store.mem_size(),
            });
        }

        let index = EnduranceIndex::<RingIndex>::new(store, base, index_endurance)?;
        let buffer_start = base + index.storage_size();
        let readback = index.read(store);

        let mut ring = Self {
            index,
            ram_index: readback.record,
            buffer_start,
            buffer_length: capacity * R::SIZE as u16,
            head_intact: readback.intact,
            _record: PhantomData,
        };

        let last = ring.ram_index.last;
        if last == RingIndex::UNSET {
            info!("Ring buffer 0x{:04X}: first use, clearing", base);
            ring.clear(store);
        } else if last % R::SIZE as u16 != 0 || last >= ring.buffer_length {
            warn!(
                "Ring buffer 0x{:04X}: invalid head offset {}, clearing",
                base, last
            );
            ring.clear(store);
        } else if !readback.intact {
            warn!(
                "Ring buffer 0x{:04X}: head index failed its checksum, keeping offset {}",
                base, last
            );
        }

        Ok(ring)
    }

    /// Reserve space from `planner` and build the ring described by `config`
    pub fn open<S: NonVolatileStore>(
        store: &mut S,
        planner: &mut LayoutPlanner,
        config: &RingConfig,
    ) -> StorageResult<Self> {
        let base = planner.place(Self::footprint(config.capacity, config.endurance))?;
        Self::new(store, base, config.capacity, config.endurance)
    }

    /// Bytes needed for `capacity` elements plus the head index
    pub fn footprint(capacity: u16, index_endurance: u16) -> u32 {
        EnduranceIndex::<RingIndex>::footprint(index_endurance) + capacity as u32 * R::SIZE as u32
    }

    /// Bytes this ring occupies in the store
    pub fn storage_size(&self) -> u16 {
        self.index.storage_size() + self.buffer_length
    }

    /// Capacity in elements
    pub fn buffer_size(&self) -> u16 {
        self.buffer_length / R::SIZE as u16
    }

    /// Length of the data region in bytes
    pub fn buffer_length(&self) -> u16 {
        self.buffer_length
    }

    /// Position of the newest element, in elements from the start of the region
    pub fn current_index(&self) -> u16 {
        self.ram_index.last / R::SIZE as u16
    }

    /// First address of the structure
    pub fn base_address(&self) -> Address {
        self.index.base_address()
    }

    /// `false` when the head restored from the store failed its checksum.
    ///
    /// It turns `true` again once the head is rewritten by `push`, `rotate`
    /// or `clear`.
    pub fn head_intact(&self) -> bool {
        self.head_intact
    }

    /// Append `record`, overwriting the oldest element when full
    pub fn push<S: NonVolatileStore>(&mut self, store: &mut S, record: &R) {
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let bytes = &mut buf[..R::SIZE];
        record.encode(bytes);

        let previous = self.ram_index.last;
        self.advance();
        debug!(
            "Ring buffer 0x{:04X}: push, byte index {} -> {}",
            self.base_address(),
            previous,
            self.ram_index.last
        );

        store.write_block(self.buffer_start + self.ram_index.last, bytes);
        self.index.write(store, &self.ram_index);
        self.head_intact = true;
    }

    /// Element `index` positions away from the newest.
    ///
    /// `0` is the newest element and positive indexes go back in time: `1` is
    /// the element pushed before it. Negative indexes count from the oldest
    /// end instead, `-1` being the oldest element. Any index is valid; it is
    /// wrapped modulo the capacity.
    pub fn get<S: NonVolatileStore>(&self, store: &S, index: i32) -> R {
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let bytes = &mut buf[..R::SIZE];
        self.get_bytes(store, index, bytes);
        R::decode(bytes)
    }

    /// Raw bytes of element `index`, see [`get`](Self::get) for the indexing.
    ///
    /// `buf` must be exactly one record long.
    pub fn get_bytes<S: NonVolatileStore>(&self, store: &S, index: i32, buf: &mut [u8]) {
        store.read_block(self.buffer_start + self.offset_of(index), buf);
    }

    /// True when element `index` holds the erased placeholder pattern
    pub fn is_erased<S: NonVolatileStore>(&self, store: &S, index: i32) -> bool {
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let bytes = &mut buf[..R::SIZE];
        self.get_bytes(store, index, bytes);
        is_erased(bytes)
    }

    /// Advance the head by `steps` elements, erasing every element passed.
    ///
    /// After the call the head points at the last erased element. Rotating by
    /// the capacity or more is the same as [`clear`](Self::clear).
    pub fn rotate<S: NonVolatileStore>(&mut self, store: &mut S, steps: u16) {
        if steps >= self.buffer_size() {
            self.clear(store);
            return;
        }
        if steps == 0 {
            return;
        }

        let previous = self.ram_index.last;
        let erased = [ERASED_BYTE; MAX_RECORD_SIZE];
        for _ in 0..steps {
            self.advance();
            store.write_block(self.buffer_start + self.ram_index.last, &erased[..R::SIZE]);
        }
        debug!(
            "Ring buffer 0x{:04X}: rotate {}, byte index {} -> {}",
            self.base_address(),
            steps,
            previous,
            self.ram_index.last
        );

        self.index.write(store, &self.ram_index);
        self.head_intact = true;
    }

    /// Erase every element and move the head to the start of the region
    pub fn clear<S: NonVolatileStore>(&mut self, store: &mut S) {
        let erased = [ERASED_BYTE; MAX_RECORD_SIZE];
        let mut offset = 0u16;
        while offset < self.buffer_length {
            let len = (self.buffer_length - offset).min(MAX_RECORD_SIZE as u16);
            store.write_block(self.buffer_start + offset, &erased[..len as usize]);
            offset += len;
        }

        self.ram_index = RingIndex {
            last: 0,
            start: RingIndex::UNSET,
        };
        self.index.write(store, &self.ram_index);
        self.head_intact = true;
    }

    fn advance(&mut self) {
        self.ram_index.last = ((self.ram_index.last as u32 + R::SIZE as u32)
            % self.buffer_length as u32) as u16;
    }

    /// Byte offset of logical element `index` within the data region
    fn offset_of(&self, index: i32) -> u16 {
        let capacity = self.buffer_size() as i64;
        let head = self.current_index() as i64;
        let slot = (head - (index as i64).rem_euclid(capacity)).rem_euclid(capacity);
        slot as u16 * R::SIZE as u16
    }
}
