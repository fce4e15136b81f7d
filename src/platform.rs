//! Stack walkers a host process can offer to callstack contexts.
//!
//! A process can walk its own stack, which stands for the userspace callstack. The kernel
//! stack is out of reach, so kernel callstack contexts cannot be registered on a host.

use stackctx_callstack::{UnwindFn, SENTINEL};

/// Resolves the platform unwind routines by name.
pub fn lookup(symbol: &str) -> Option<UnwindFn> {
    match symbol {
        "save_stack_trace_user" => Some(save_stack_trace_user as UnwindFn),
        _ => None,
    }
}

/// Walks the calling thread's stack. Like kernel walkers, a walk that reaches the outermost
/// frame before filling `entries` is terminated by an all-ones entry.
fn save_stack_trace_user(entries: &mut [usize]) -> usize {
    if entries.is_empty() {
        return 0;
    }

    let mut count = 0;
    backtrace::trace(|frame| {
        // Thread entry frames report a null ip: the walk is over.
        let ip = frame.ip() as usize;
        if ip == 0 {
            return false;
        }
        entries[count] = ip;
        count += 1;
        count < entries.len()
    });
    if count < entries.len() {
        entries[count] = SENTINEL;
        count += 1;
    }
    count
}
