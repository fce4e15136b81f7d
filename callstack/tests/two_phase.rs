use std::{
    cell::{Cell, RefCell},
    mem,
    rc::Rc,
    sync::Arc,
    thread,
};

use stackctx_callstack::{
    decode, CallstackConfig, CallstackMode, Callstacks, Context, DecodedCallstack, MemoryRing,
    UnwindFn, UserNesting, WireLayout, MAX_ENTRIES, NESTING_LEVELS, SENTINEL,
};
use test_case::test_case;

fn five(buf: &mut [usize]) -> usize {
    buf[..5].copy_from_slice(&[0xa5, 0xa4, 0xa3, 0xa2, 0xa1]);
    5
}

fn five_terminated(buf: &mut [usize]) -> usize {
    buf[..6].copy_from_slice(&[0xa5, 0xa4, 0xa3, 0xa2, 0xa1, SENTINEL]);
    6
}

fn full(buf: &mut [usize]) -> usize {
    buf.iter_mut().enumerate().for_each(|(i, ip)| *ip = 0xf000 + i);
    buf.len()
}

/// Context with a single callstack field walking with `walk`, whatever the mode.
fn context(mode: CallstackMode, walk: UnwindFn, config: CallstackConfig) -> Context {
    let nesting = Arc::new(UserNesting::new(config.possible_cpus).unwrap());
    shared_context(mode, walk, config, nesting)
}

fn shared_context(
    mode: CallstackMode,
    walk: UnwindFn,
    config: CallstackConfig,
    nesting: Arc<UserNesting>,
) -> Context {
    let mut callstacks = Callstacks::new(config, move |_: &str| Some(walk), nesting);
    let mut ctx = Context::new();
    callstacks.register(&mut ctx, mode).unwrap();
    ctx
}

/// Runs both passes for one event and reads the field back.
fn event(ctx: &Context, cpu: usize, nesting: usize, layout: WireLayout) -> DecodedCallstack {
    // Event header of one byte, to exercise padding.
    let mut ring = unsafe { MemoryRing::new(cpu, nesting) }.with_offset(1);
    let size = ctx.get_size(1, &ring);
    ring.reserve(size);
    ctx.record(&mut ring);
    assert_eq!(ring.offset(), 1 + size, "size and record disagree");

    let (stack, end) = decode(ring.bytes(), 1, layout).unwrap();
    assert_eq!(end, ring.offset());
    stack
}

fn prefix(ctx: &Context, cpu: usize, nesting: usize) -> (usize, u32) {
    let mut ring = unsafe { MemoryRing::new(cpu, nesting) };
    let size = ctx.get_size(0, &ring);
    ctx.record(&mut ring);
    assert_eq!(ring.offset(), size);
    (size, u32::from_ne_bytes(ring.bytes()[..4].try_into().unwrap()))
}

fn config(packed: bool) -> CallstackConfig {
    CallstackConfig::new(4).with_user_callstack(true).with_packed(packed)
}

#[test_case(CallstackMode::Kernel, false)]
#[test_case(CallstackMode::Kernel, true)]
#[test_case(CallstackMode::User, false)]
#[test_case(CallstackMode::User, true)]
fn five_frames(mode: CallstackMode, packed: bool) {
    let config = config(packed);
    let ctx = context(mode, five, config);
    let stack = event(&ctx, 0, 1, config.layout());
    assert_eq!(stack.entries, vec![0xa5, 0xa4, 0xa3, 0xa2, 0xa1]);
    assert!(!stack.truncated);

    let (size, len) = prefix(&ctx, 0, 1);
    assert_eq!(len, 5);
    let expected = if packed { 4 + 5 * 8 } else { WireLayout::natural().sequence_size(0, 5) };
    if mem::size_of::<usize>() == 8 {
        assert_eq!(size, expected);
    }
}

#[test_case(CallstackMode::Kernel)]
#[test_case(CallstackMode::User)]
fn full_walk_is_marked_truncated(mode: CallstackMode) {
    let ctx = context(mode, full, config(false));
    let stack = event(&ctx, 1, 2, WireLayout::natural());
    assert!(stack.truncated);
    assert_eq!(stack.entries.len(), MAX_ENTRIES);
    assert_eq!(stack.entries[0], 0xf000);
    assert_eq!(prefix(&ctx, 1, 2).1, MAX_ENTRIES as u32 + 1);
}

#[test]
fn platform_terminator_is_stripped() {
    let plain = context(CallstackMode::Kernel, five, config(false));
    let terminated = context(CallstackMode::Kernel, five_terminated, config(false));
    assert_eq!(prefix(&plain, 0, 1), prefix(&terminated, 0, 1));
    assert_eq!(
        event(&plain, 0, 1, WireLayout::natural()),
        event(&terminated, 0, 1, WireLayout::natural())
    );
}

#[test]
fn nesting_overflow_is_empty() {
    let ctx = context(CallstackMode::Kernel, five, config(false));
    let (size, len) = prefix(&ctx, 0, NESTING_LEVELS + 1);
    assert_eq!(len, 0);
    assert_eq!(size, WireLayout::natural().sequence_size(0, 0));
    let stack = event(&ctx, 0, NESTING_LEVELS + 1, WireLayout::natural());
    assert_eq!(stack, DecodedCallstack::default());
}

thread_local! {
    static REENTRANT_WALKS: Cell<usize> = const { Cell::new(0) };
    /// Event fired from within the walk, returning the callstack length it recorded.
    static FIRED_BY_WALK: RefCell<Option<Box<dyn Fn() -> u32>>> = RefCell::new(None);
    static NESTED_LEN: Cell<Option<u32>> = const { Cell::new(None) };
}

fn reentrant(buf: &mut [usize]) -> usize {
    REENTRANT_WALKS.with(|walks| walks.set(walks.get() + 1));
    FIRED_BY_WALK.with(|hook| {
        if let Some(hook) = hook.borrow().as_ref() {
            NESTED_LEN.with(|len| len.set(Some(hook())));
        }
    });
    buf[..2].copy_from_slice(&[0xbeef, SENTINEL]);
    2
}

#[test]
fn user_walk_does_not_recurse() {
    let ctx = Rc::new(context(CallstackMode::User, reentrant, config(false)));
    let nested = ctx.clone();
    FIRED_BY_WALK.with(|hook| {
        *hook.borrow_mut() = Some(Box::new(move || prefix(&nested, 0, 2).1));
    });

    let (_, len) = prefix(&ctx, 0, 1);
    FIRED_BY_WALK.with(|hook| hook.borrow_mut().take());

    assert_eq!(len, 1);
    assert_eq!(NESTED_LEN.with(Cell::get), Some(0));
    assert_eq!(REENTRANT_WALKS.with(Cell::get), 1);

    // The guard is released once the walk is over.
    assert_eq!(prefix(&ctx, 0, 1).1, 1);
    assert_eq!(REENTRANT_WALKS.with(Cell::get), 2);
}

#[test]
fn guard_spans_registrars() {
    let nesting = Arc::new(UserNesting::new(4).unwrap());
    let outer = shared_context(CallstackMode::User, reentrant, config(false), nesting.clone());
    let inner = Rc::new(shared_context(CallstackMode::User, reentrant, config(false), nesting));
    FIRED_BY_WALK.with(|hook| {
        *hook.borrow_mut() = Some(Box::new(move || prefix(&inner, 0, 2).1));
    });

    let (_, len) = prefix(&outer, 0, 1);
    FIRED_BY_WALK.with(|hook| hook.borrow_mut().take());

    assert_eq!(len, 1);
    assert_eq!(NESTED_LEN.with(Cell::get), Some(0));
    assert_eq!(REENTRANT_WALKS.with(Cell::get), 1);
}

thread_local! {
    static THREAD_IP: Cell<usize> = const { Cell::new(0) };
}

fn thread_ip(buf: &mut [usize]) -> usize {
    let ip = THREAD_IP.with(Cell::get);
    buf[..3].iter_mut().for_each(|entry| *entry = ip);
    3
}

#[test]
fn cpus_do_not_interfere() {
    let cpus = 4;
    let ctx = Arc::new(context(CallstackMode::Kernel, thread_ip, CallstackConfig::new(cpus)));

    let workers: Vec<_> = (0..cpus)
        .map(|cpu| {
            let ctx = ctx.clone();
            // Each thread plays one CPU, so the per-CPU contract holds.
            thread::spawn(move || {
                for i in 0..500 {
                    let ip = (cpu << 16) | i;
                    THREAD_IP.with(|cell| cell.set(ip));
                    let nesting = i % NESTING_LEVELS + 1;
                    let stack = event(&ctx, cpu, nesting, WireLayout::natural());
                    assert_eq!(stack.entries, vec![ip; 3]);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn size_then_record_at_every_level() {
    let ctx = context(CallstackMode::Kernel, five, config(false));
    // Size all levels first as nested events would, then record innermost first.
    let rings: Vec<_> = (1..=NESTING_LEVELS)
        .map(|nesting| unsafe { MemoryRing::new(2, nesting) })
        .collect();
    let sizes: Vec<_> = rings.iter().map(|ring| ctx.get_size(0, ring)).collect();
    for (mut ring, size) in rings.into_iter().zip(sizes).rev() {
        ctx.record(&mut ring);
        assert_eq!(ring.offset(), size);
    }
}
