use alloc::{boxed::Box, collections::TryReserveError, vec::Vec};
use core::cell::UnsafeCell;

/// One `T` per possible CPU, allocated once.
///
/// Values are handed out as raw pointers: exclusive access to a CPU's value is the caller's
/// business, see [`crate::RingBufferCtx`].
pub(crate) struct PerCpu<T> {
    cpus: Box<[UnsafeCell<T>]>,
}

// Each CPU only ever touches its own value, under the non-preemption contract.
unsafe impl<T: Send> Sync for PerCpu<T> {}

impl<T> PerCpu<T> {
    pub(crate) fn try_new_with(
        cpus: usize,
        mut init: impl FnMut() -> T,
    ) -> Result<Self, TryReserveError> {
        let mut values = Vec::new();
        values.try_reserve_exact(cpus)?;
        values.extend((0..cpus).map(|_| UnsafeCell::new(init())));
        Ok(Self { cpus: values.into_boxed_slice() })
    }

    pub(crate) fn cpus(&self) -> usize {
        self.cpus.len()
    }

    /// Value of `cpu`, if such a CPU exists.
    pub(crate) fn get(&self, cpu: usize) -> Option<*mut T> {
        self.cpus.get(cpu).map(UnsafeCell::get)
    }
}
