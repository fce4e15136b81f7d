use core::{fmt, ptr};

use crate::{MAX_ENTRIES, NESTING_LEVELS, SENTINEL};

/// Storage for one captured callstack.
///
/// Only `entries[..count]` is meaningful; whatever lies past it is left over from earlier
/// captures and never read.
#[derive(Clone)]
pub struct CaptureSlot {
    entries: [usize; MAX_ENTRIES],
    count: usize,
}

impl CaptureSlot {
    pub const fn new() -> Self {
        Self { entries: [0; MAX_ENTRIES], count: 0 }
    }

    /// Forgets the previous capture. The entries themselves are not cleared.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Lets `walk` fill the slot, keeping at most [`MAX_ENTRIES`] of what it reports.
    pub fn fill(&mut self, walk: impl FnOnce(&mut [usize]) -> usize) {
        self.count = walk(&mut self.entries[..]).min(MAX_ENTRIES);
    }

    /// Drops the trailing all-ones terminator(s) a complete walk ends with.
    pub fn normalize(&mut self) {
        while self.count > 0 && self.entries[self.count - 1] == SENTINEL {
            self.count -= 1;
        }
    }

    pub fn entries(&self) -> &[usize] {
        &self.entries[..self.count]
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// A walk filling the whole slot may have lost the outermost frames.
    pub fn is_truncated(&self) -> bool {
        self.count == MAX_ENTRIES
    }

    /// Number of entries the emitted sequence holds, truncation marker included.
    pub fn sequence_len(&self) -> usize {
        self.count + usize::from(self.is_truncated())
    }
}

impl Default for CaptureSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CaptureSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries().iter().map(|ip| *ip as *const ())).finish()
    }
}

/// The capture slots of one CPU, one per reservation nesting level.
#[derive(Debug, Clone, Default)]
pub struct NestedBuffer {
    slots: [CaptureSlot; NESTING_LEVELS],
}

impl NestedBuffer {
    pub const fn new() -> Self {
        const EMPTY: CaptureSlot = CaptureSlot::new();
        Self { slots: [EMPTY; NESTING_LEVELS] }
    }

    pub fn slot(&self, level: usize) -> Option<&CaptureSlot> {
        self.slots.get(level)
    }

    pub fn slot_mut(&mut self, level: usize) -> Option<&mut CaptureSlot> {
        self.slots.get_mut(level)
    }

    /// Slot of `level` without borrowing the other levels, which an interrupted writer may
    /// be holding.
    ///
    /// # Safety
    ///
    /// `buffer` points to a live `NestedBuffer`.
    pub(crate) unsafe fn slot_ptr(buffer: *mut Self, level: usize) -> Option<*mut CaptureSlot> {
        if level >= NESTING_LEVELS {
            return None;
        }
        let slots = unsafe { ptr::addr_of_mut!((*buffer).slots) }.cast::<CaptureSlot>();
        Some(unsafe { slots.add(level) })
    }
}
