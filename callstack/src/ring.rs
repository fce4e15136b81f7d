//! The slice of the ring buffer interface callstack fields rely on.

use alloc::vec::Vec;
use core::mem;

/// Reservation context of the event being written.
///
/// # Safety
///
/// Callstack fields keep per-CPU state without locks or atomics. Implementors guarantee that
/// while a context is handed to a field:
///
/// - the caller runs with preemption and migration disabled on `cpu()`, and anything that
///   interrupts it writes its own event at a deeper `nesting()` level, and completes before
///   the interrupted one resumes;
/// - `cpu()` is below the CPU count the field was registered for, or the field is told an
///   out-of-range id (which it ignores);
/// - `cpu()` and `nesting()` return the same values for the size and the record pass of a
///   given event.
pub unsafe trait RingBufferCtx {
    /// CPU the event is written on.
    fn cpu(&self) -> usize;

    /// Reservation nesting counter of `cpu()`, counting the current reservation.
    fn nesting(&self) -> usize;

    /// Pads the write position up to a multiple of `align`.
    fn align(&mut self, align: usize);

    /// Appends `bytes` at the write position.
    fn write(&mut self, bytes: &[u8]);
}

/// Padding needed to bring `offset` to a multiple of `align`, a power of two.
pub const fn align_pad(offset: usize, align: usize) -> usize {
    offset.wrapping_neg() & (align - 1)
}

/// Alignment rules of an emitted callstack sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireLayout {
    pub len_align: usize,
    pub entry_align: usize,
}

impl WireLayout {
    /// Natural alignment of the `u32` length and of the machine word entries.
    pub const fn natural() -> Self {
        Self { len_align: mem::align_of::<u32>(), entry_align: mem::align_of::<usize>() }
    }

    /// No padding at all.
    pub const fn packed() -> Self {
        Self { len_align: 1, entry_align: 1 }
    }

    /// Bytes taken by a sequence of `entries` words starting at `offset`, padding included.
    pub const fn sequence_size(&self, offset: usize, entries: usize) -> usize {
        let mut end = offset;
        end += align_pad(end, self.len_align);
        end += mem::size_of::<u32>();
        end += align_pad(end, self.entry_align);
        end += entries * mem::size_of::<usize>();
        end - offset
    }
}

impl Default for WireLayout {
    fn default() -> Self {
        Self::natural()
    }
}

/// Reservation context writing into memory, for hosts without a real ring buffer.
#[derive(Debug)]
pub struct MemoryRing {
    cpu: usize,
    nesting: usize,
    buf: Vec<u8>,
}

impl MemoryRing {
    /// # Safety
    ///
    /// For the lifetime of the returned context, nothing else may write an event on `cpu`
    /// at nesting level `nesting` or shallower, as required by [`RingBufferCtx`].
    pub unsafe fn new(cpu: usize, nesting: usize) -> Self {
        Self { cpu, nesting, buf: Vec::new() }
    }

    /// Starts writing at `offset`, as if an event header of that size preceded the fields.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.buf.resize(offset, 0);
        self
    }

    /// Reserves room for `len` more bytes so recording does not reallocate.
    pub fn reserve(&mut self, len: usize) {
        self.buf.reserve_exact(len);
    }

    pub fn offset(&self) -> usize {
        self.buf.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

unsafe impl RingBufferCtx for MemoryRing {
    fn cpu(&self) -> usize {
        self.cpu
    }

    fn nesting(&self) -> usize {
        self.nesting
    }

    fn align(&mut self, align: usize) {
        let pad = align_pad(self.buf.len(), align);
        self.buf.resize(self.buf.len() + pad, 0);
    }

    fn write(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}
