use heapless::{HistoryBuf, OldestOrdered};

use super::RegisterBus;

/// Number of 32-bit words backing a [`MemoryBus`] window.
pub const MEMORY_BUS_WORDS: usize = 16;

/// Number of stores retained in the write journal.
pub const JOURNAL_CAPACITY: usize = 256;

/// A store observed by [`MemoryBus`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BusWrite {
    pub offset: u32,
    pub value: u32,
}

/// Plain latch memory standing in for a register window.
///
/// Reads return the last stored value. Stores made through [`RegisterBus`]
/// are journaled; [`MemoryBus::poke`] changes a word the way hardware would,
/// without touching the journal.
pub struct MemoryBus {
    words: [u32; MEMORY_BUS_WORDS],
    reads: [u32; MEMORY_BUS_WORDS],
    journal: HistoryBuf<BusWrite, JOURNAL_CAPACITY>,
}

impl MemoryBus {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            words: [0; MEMORY_BUS_WORDS],
            reads: [0; MEMORY_BUS_WORDS],
            journal: HistoryBuf::new(),
        }
    }

    /// Overwrites a word as the hardware side would.
    pub fn poke(&mut self, offset: u32, value: u32) {
        self.words[slot(offset)] = value;
    }

    /// Returns a word without counting it as a bus read.
    #[must_use]
    pub fn peek(&self, offset: u32) -> u32 {
        self.words[slot(offset)]
    }

    /// Number of bus reads issued against `offset`.
    #[must_use]
    pub fn read_count(&self, offset: u32) -> u32 {
        self.reads[slot(offset)]
    }

    /// Journaled stores, oldest first.
    pub fn writes(&self) -> OldestOrdered<'_, BusWrite> {
        self.journal.oldest_ordered()
    }

    /// Journaled stores that targeted `offset`, oldest first.
    pub fn writes_to(&self, offset: u32) -> impl Iterator<Item = u32> + '_ {
        self.writes()
            .filter(move |write| write.offset == offset)
            .map(|write| write.value)
    }

    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBus for MemoryBus {
    fn read_u32(&mut self, offset: u32) -> u32 {
        let index = slot(offset);
        self.reads[index] = self.reads[index].saturating_add(1);
        self.words[index]
    }

    fn write_u32(&mut self, offset: u32, value: u32) {
        self.words[slot(offset)] = value;
        self.journal.write(BusWrite { offset, value });
    }
}

fn slot(offset: u32) -> usize {
    (offset as usize / 4) % MEMORY_BUS_WORDS
}
