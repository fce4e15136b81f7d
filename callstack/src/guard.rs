use crate::{percpu::PerCpu, Error};

/// Per-CPU count of userspace stack walks in progress.
///
/// Walking a userspace stack can itself fire events (page faults, instrumented helpers, ...).
/// Those must not walk the userspace stack again, or the walker would recurse into itself.
pub struct UserNesting {
    depth: PerCpu<u32>,
}

impl UserNesting {
    pub fn new(possible_cpus: usize) -> Result<Self, Error> {
        Ok(Self { depth: PerCpu::try_new_with(possible_cpus, || 0)? })
    }

    /// Whether a userspace walk is already in progress on `cpu`.
    ///
    /// # Safety
    ///
    /// The caller runs on `cpu` with preemption disabled.
    pub unsafe fn engaged(&self, cpu: usize) -> bool {
        self.depth.get(cpu).is_some_and(|depth| unsafe { *depth } >= 1)
    }

    /// Marks a userspace walk in progress on `cpu` until the returned scope is dropped.
    ///
    /// # Safety
    ///
    /// The caller runs on `cpu` with preemption disabled, and drops the scope before
    /// re-enabling it.
    pub unsafe fn enter(&self, cpu: usize) -> UserCaptureScope<'_> {
        if let Some(depth) = self.depth.get(cpu) {
            unsafe { *depth += 1 };
        }
        UserCaptureScope { nesting: self, cpu }
    }

    /// # Safety
    ///
    /// Same as [`UserNesting::enter`].
    unsafe fn exit(&self, cpu: usize) {
        if let Some(depth) = self.depth.get(cpu) {
            unsafe { *depth -= 1 };
        }
    }
}

impl core::fmt::Debug for UserNesting {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserNesting").field("cpus", &self.depth.cpus()).finish()
    }
}

/// A userspace walk in progress.
#[must_use]
pub struct UserCaptureScope<'a> {
    nesting: &'a UserNesting,
    cpu: usize,
}

impl Drop for UserCaptureScope<'_> {
    fn drop(&mut self) {
        // The scope was created under the same non-preemptible window.
        unsafe { self.nesting.exit(self.cpu) };
    }
}
