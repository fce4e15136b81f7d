use core::mem;

use crate::{WireLayout, MAX_ENTRIES, NESTING_LEVELS};

/// Platform and layout knobs for callstack contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallstackConfig {
    /// Number of possible CPUs. CPU ids at or above this get an empty callstack.
    pub possible_cpus: usize,
    /// Whether the platform can walk userspace stacks from an event.
    pub user_callstack: bool,
    /// Disable alignment padding in emitted fields.
    pub packed: bool,
}

impl CallstackConfig {
    pub fn new(possible_cpus: usize) -> Self {
        Self {
            possible_cpus,
            user_callstack: cfg!(any(target_arch = "x86", target_arch = "x86_64")),
            packed: false,
        }
    }

    pub fn with_user_callstack(self, user_callstack: bool) -> Self {
        Self { user_callstack, ..self }
    }

    pub fn with_packed(self, packed: bool) -> Self {
        Self { packed, ..self }
    }

    pub fn layout(&self) -> WireLayout {
        if self.packed {
            WireLayout::packed()
        } else {
            WireLayout::natural()
        }
    }

    /// Bytes of capture buffers one callstack context allocates.
    pub fn buffer_footprint(&self) -> usize {
        self.possible_cpus * NESTING_LEVELS * MAX_ENTRIES * mem::size_of::<usize>()
    }
}

impl Default for CallstackConfig {
    fn default() -> Self {
        Self::new(1)
    }
}
