//! Callstack context for trace events.
//!
//! The callstack context can be added to any event. It records either the kernel or the
//! userspace callstack, up to [`MAX_ENTRIES`] frames. The field is a sequence, so it only
//! takes the space required by the frames actually captured.
//!
//! Capture buffers are allocated per CPU, one per reservation nesting level (up to
//! [`NESTING_LEVELS`], the same limit as the ring buffer). Memory use is therefore fixed and
//! proportional to the number of CPUs:
//!
//! ```text
//! size = cpus * nesting * depth * size_of::<usize>()
//! ```
//!
//! which is 4096 bytes per CPU on a 64-bit host. Everything is allocated when the context is
//! registered: capturing and recording never allocate, lock or block.
//!
//! Symbol resolution is left to whoever reads the trace.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

mod config;
mod context;
mod decode;
mod error;
mod field;
mod guard;
mod metadata;
mod percpu;
mod registry;
mod ring;
mod slot;
mod unwind;

pub use config::CallstackConfig;
pub use context::{Context, ContextField, CtxField};
pub use decode::{decode, DecodeError, DecodedCallstack};
pub use error::Error;
pub use field::CallstackField;
pub use guard::{UserCaptureScope, UserNesting};
pub use metadata::{EventField, IntegerType};
pub use registry::Callstacks;
pub use ring::{align_pad, MemoryRing, RingBufferCtx, WireLayout};
pub use slot::{CaptureSlot, NestedBuffer};
pub use unwind::{CallstackMode, Capturer, SymbolLookup, UnwindFn};

/// Maximum number of frames captured per callstack.
pub const MAX_ENTRIES: usize = 128;

/// Number of reservation nesting levels, one capture slot each. Matches the ring buffer's
/// maximum nesting.
pub const NESTING_LEVELS: usize = 4;

/// All-ones address. Terminates a complete walk when the platform emits it, and marks a
/// possibly truncated callstack when we emit it.
pub const SENTINEL: usize = usize::MAX;
