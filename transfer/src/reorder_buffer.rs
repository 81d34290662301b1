use std::collections::BTreeMap;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::OwnedSemaphorePermit;

/// Holds out-of-order completed blocks and releases them to the sink
/// strictly in index order.
///
/// `active_index` is the lowest not-yet-flushed index. Slots exist only for
/// blocks fetched at or ahead of it and are removed the moment they flush.
/// Each slot carries the buffer-capacity permit its worker acquired, so
/// discarding or flushing a slot frees capacity for further fetches.
pub struct ReorderBuffer {
    state: Mutex<ReorderState>,
}

struct ReorderState {
    active_index: u64,
    slots: BTreeMap<u64, BlockSlot>,
}

struct BlockSlot {
    done: bool,
    chunks: Vec<Bytes>,
    _capacity: OwnedSemaphorePermit,
}

impl ReorderBuffer {
    pub fn new(first_index: u64) -> Self {
        Self {
            state: Mutex::new(ReorderState {
                active_index: first_index,
                slots: BTreeMap::new(),
            }),
        }
    }

    /// The lowest block index not yet flushed to the sink.
    pub fn active_index(&self) -> u64 {
        self.state.lock().unwrap().active_index
    }

    pub fn is_active(&self, index: u64) -> bool {
        self.state.lock().unwrap().active_index == index
    }

    /// Opens the slot for `index`, consuming a buffer-capacity permit.
    pub fn open_slot(&self, index: u64, capacity: OwnedSemaphorePermit) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(index >= state.active_index);
        state.slots.insert(
            index,
            BlockSlot {
                done: false,
                chunks: Vec::new(),
                _capacity: capacity,
            },
        );
    }

    pub fn push_chunk(&self, index: u64, chunk: Bytes) {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.slots.get_mut(&index) {
            slot.chunks.push(chunk);
        }
    }

    /// Marks the block's stream as ended. A zero-length block becomes a
    /// done slot with an empty chunk list, so the flush walk does not stall
    /// on it.
    pub fn mark_done(&self, index: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.slots.get_mut(&index) {
            slot.done = true;
        }
    }

    /// If the slot at the active index is done, removes it, advances the
    /// active index, and returns its chunks. Callers loop this while
    /// holding the sink, which turns out-of-order completion into one
    /// strictly sequential output: only consecutive completed entries are
    /// released, always in index order.
    pub fn take_ready(&self) -> Option<(u64, Vec<Bytes>)> {
        let mut state = self.state.lock().unwrap();
        let index = state.active_index;
        match state.slots.get(&index) {
            Some(slot) if slot.done => {
                let slot = state.slots.remove(&index).unwrap();
                state.active_index += 1;
                Some((index, slot.chunks))
            },
            _ => None,
        }
    }

    /// Discards every buffered-but-unflushed slot (the revert path). The
    /// active index is untouched: flushed bytes stay flushed, and the next
    /// round re-fetches from the boundary.
    pub fn discard_unflushed(&self) {
        self.state.lock().unwrap().slots.clear();
    }

    pub fn buffered_blocks(&self) -> usize {
        self.state.lock().unwrap().slots.len()
    }
}
