use core::fmt;

use tracing::{debug, warn};

use crate::{CaptureSlot, Error};

/// Platform stack walker. Fills the buffer from the innermost frame outwards and returns how
/// many entries it wrote. A complete walk may end with an all-ones terminator.
pub type UnwindFn = fn(&mut [usize]) -> usize;

/// Which callstack a context records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum CallstackMode {
    /// The kernel callstack of the event.
    Kernel,
    /// The userspace callstack of the task the event fired in.
    User,
}

impl CallstackMode {
    pub const ALL: [CallstackMode; 2] = [CallstackMode::Kernel, CallstackMode::User];

    /// Name of the context field.
    pub const fn ctx_name(self) -> &'static str {
        match self {
            CallstackMode::Kernel => "callstack_kernel",
            CallstackMode::User => "callstack_user",
        }
    }

    /// Platform routine walking this kind of stack.
    pub const fn unwind_symbol(self) -> &'static str {
        match self {
            CallstackMode::Kernel => "save_stack_trace",
            CallstackMode::User => "save_stack_trace_user",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for CallstackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallstackMode::Kernel => "kernel",
            CallstackMode::User => "user",
        })
    }
}

/// Where the platform unwind routines are looked up, by name.
pub trait SymbolLookup {
    fn lookup(&self, symbol: &str) -> Option<UnwindFn>;
}

impl<F> SymbolLookup for F
where
    F: Fn(&str) -> Option<UnwindFn>,
{
    fn lookup(&self, symbol: &str) -> Option<UnwindFn> {
        self(symbol)
    }
}

/// A resolved stack walker.
#[derive(Debug, Clone, Copy)]
pub enum Capturer {
    Kernel(UnwindFn),
    User(UnwindFn),
}

impl Capturer {
    pub fn new(mode: CallstackMode, walk: UnwindFn) -> Self {
        match mode {
            CallstackMode::Kernel => Capturer::Kernel(walk),
            CallstackMode::User => Capturer::User(walk),
        }
    }

    pub fn mode(&self) -> CallstackMode {
        match self {
            Capturer::Kernel(_) => CallstackMode::Kernel,
            Capturer::User(_) => CallstackMode::User,
        }
    }

    /// Walks the stack into `slot` and strips the platform terminator.
    ///
    /// A walker unable to unwind (no frame pointers, ...) leaves an empty slot.
    pub fn capture(&self, slot: &mut CaptureSlot) {
        let (Capturer::Kernel(walk) | Capturer::User(walk)) = *self;
        slot.fill(walk);
        slot.normalize();
    }
}

/// Unwind routines resolved so far. Resolution happens once per mode.
#[derive(Debug, Default)]
pub(crate) struct Unwinders {
    resolved: [Option<UnwindFn>; 2],
}

impl Unwinders {
    pub(crate) fn resolve(
        &mut self,
        mode: CallstackMode,
        symbols: &impl SymbolLookup,
    ) -> Result<Capturer, Error> {
        if let Some(walk) = self.resolved[mode.index()] {
            return Ok(Capturer::new(mode, walk));
        }

        let symbol = mode.unwind_symbol();
        let Some(walk) = symbols.lookup(symbol) else {
            warn!("symbol lookup failed: {symbol}");
            return Err(Error::CapabilityUnavailable(symbol));
        };
        debug!("Resolved {mode} unwinder {symbol}");
        self.resolved[mode.index()] = Some(walk);
        Ok(Capturer::new(mode, walk))
    }
}
