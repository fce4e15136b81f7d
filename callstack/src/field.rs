//! The callstack field: capture when sizing the event, replay when recording it.
//!
//! The ring buffer asks every field for its size before reserving the event, then asks it to
//! record into the reservation. To know its size, the field has to walk the stack; the walk
//! is kept in the capture slot of the event's (CPU, nesting level) and the record pass only
//! serializes what the size pass stored. Both passes go through [`CallstackField::select`],
//! and the ring buffer guarantees CPU and nesting level do not change in between, so they
//! always agree on the slot, and on the byte count.

use alloc::sync::Arc;
use core::{mem, slice};

use tracing::debug;

use crate::{
    percpu::PerCpu, CallstackConfig, CallstackMode, CaptureSlot, Capturer, ContextField, Error,
    EventField, NestedBuffer, RingBufferCtx, UserNesting, WireLayout, SENTINEL,
};

pub struct CallstackField {
    capturer: Capturer,
    buffers: PerCpu<NestedBuffer>,
    user_nesting: Arc<UserNesting>,
    layout: WireLayout,
}

impl CallstackField {
    pub(crate) fn new(
        capturer: Capturer,
        config: &CallstackConfig,
        user_nesting: Arc<UserNesting>,
    ) -> Result<Self, Error> {
        let buffers = PerCpu::try_new_with(config.possible_cpus, NestedBuffer::new)?;
        debug!(
            "Allocated {} bytes of {} callstack buffers for {} CPUs",
            config.buffer_footprint(),
            capturer.mode(),
            config.possible_cpus,
        );
        Ok(Self { capturer, buffers, user_nesting, layout: config.layout() })
    }

    pub fn mode(&self) -> CallstackMode {
        self.capturer.mode()
    }

    pub fn layout(&self) -> WireLayout {
        self.layout
    }

    /// Type description of the emitted sequence.
    pub fn event_field(&self) -> EventField {
        EventField::callstack(self.mode(), self.layout)
    }

    /// Capture slot of the event described by `ctx`, if its callstack is to be recorded.
    ///
    /// No slot when the event fired from within a userspace walk on this CPU, when the
    /// nesting level is beyond what the buffers hold (the ring buffer checks it too, this is
    /// a safety net) or when the CPU is unknown.
    ///
    /// # Safety
    ///
    /// `ctx` upholds the [`RingBufferCtx`] contract for the duration of the slot's use.
    unsafe fn select(&self, ctx: &dyn RingBufferCtx) -> Option<*mut CaptureSlot> {
        let cpu = ctx.cpu();
        if self.mode() == CallstackMode::User && unsafe { self.user_nesting.engaged(cpu) } {
            return None;
        }
        let level = ctx.nesting().checked_sub(1)?;
        let buffer = self.buffers.get(cpu)?;
        unsafe { NestedBuffer::slot_ptr(buffer, level) }
    }

    fn capture(&self, cpu: usize, slot: &mut CaptureSlot) {
        slot.reset();
        match self.capturer {
            Capturer::Kernel(_) => self.capturer.capture(slot),
            Capturer::User(_) => {
                // Events fired by the walk itself see the guard and skip their callstack.
                let _scope = unsafe { self.user_nesting.enter(cpu) };
                self.capturer.capture(slot);
            }
        }
    }
}

impl ContextField for CallstackField {
    /// Walks the stack and returns the space the callstack takes when written at `offset`.
    fn get_size(&self, offset: usize, ctx: &dyn RingBufferCtx) -> usize {
        // The slot belongs to this (CPU, nesting level) for as long as the ctx is live.
        let Some(slot) = (unsafe { self.select(ctx) }) else {
            return self.layout.sequence_size(offset, 0);
        };
        let slot = unsafe { &mut *slot };
        self.capture(ctx.cpu(), slot);
        self.layout.sequence_size(offset, slot.sequence_len())
    }

    /// Writes the callstack captured by [`ContextField::get_size`] for this event.
    fn record(&self, ctx: &mut dyn RingBufferCtx) {
        let slot = unsafe { self.select(ctx) }.map(|slot| unsafe { &*slot });

        ctx.align(self.layout.len_align);
        let Some(slot) = slot else {
            ctx.write(&0u32.to_ne_bytes());
            ctx.align(self.layout.entry_align);
            return;
        };
        // Bounded by MAX_ENTRIES + 1.
        ctx.write(&(slot.sequence_len() as u32).to_ne_bytes());
        ctx.align(self.layout.entry_align);
        ctx.write(words_as_bytes(slot.entries()));
        if slot.is_truncated() {
            ctx.write(&SENTINEL.to_ne_bytes());
        }
    }
}

impl Drop for CallstackField {
    fn drop(&mut self) {
        debug!(
            "Releasing {} callstack buffers of {} CPUs",
            self.capturer.mode(),
            self.buffers.cpus()
        );
    }
}

impl core::fmt::Debug for CallstackField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallstackField")
            .field("capturer", &self.capturer)
            .field("cpus", &self.buffers.cpus())
            .field("layout", &self.layout)
            .finish()
    }
}

fn words_as_bytes(words: &[usize]) -> &[u8] {
    // usize has no padding bytes, every byte pattern is a valid u8.
    unsafe { slice::from_raw_parts(words.as_ptr().cast::<u8>(), mem::size_of_val(words)) }
}
