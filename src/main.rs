//! Stackctx records the callstack context of events and prints it back.
//!
//! Events are fired from a workload recursing to a chosen depth, written the way a ring
//! buffer writes them, then decoded and symbolized against the process's own mappings.

use std::{collections::HashSet, num::NonZeroUsize, process, sync::Arc, thread, time::Duration};

use anyhow::{Context as _, Result};
use clap::Parser;
use elf::SymResolver;
use size::Size;
use stackctx_callstack::{CallstackConfig, CallstackMode, Callstacks, Context, UserNesting};
use tokio::{select, signal::ctrl_c, time::interval};
use trace::Tracer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod elf;
mod platform;
mod range_map;
mod trace;
mod workload;

const COLOR_RED: &str = "\x1b[31m";
const COLOR_YLW: &str = "\x1b[33m";
const COLOR_BLU: &str = "\x1b[34m";
const COLOR_MGT: &str = "\x1b[35m";
const COLOR_RST: &str = "\x1b[0m";

/// `stackctx` captures the callstack of events and prints it back.
#[derive(Parser)]
struct Stackctx {
    /// Callstack contexts to add to events.
    #[clap(long, short, value_enum, default_value = "user")]
    mode: Vec<CallstackMode>,
    /// Number of CPUs to allocate callstack buffers for.
    #[clap(long, default_value_t = possible_cpus())]
    cpus: usize,
    /// Depth the workload recurses to before firing an event.
    #[clap(long, short, default_value = "8")]
    depth: usize,
    /// Milliseconds between two events.
    #[clap(long, default_value = "1000")]
    interval: u64,
    /// Stop after this many events.
    #[clap(long, short)]
    count: Option<u32>,
    /// Write fields without alignment padding.
    #[clap(long)]
    packed: bool,
    /// Allow userspace callstacks on platforms not known to support them.
    #[clap(long, env = "STACKCTX_FORCE_USER")]
    force_user: bool,
    /// Hide frames whose symbol contains this, or starts with it when prefixed with `^`.
    #[clap(long, default_value = "^backtrace::")]
    hide: Vec<String>,
    /// Print the declaration of the context fields and exit.
    #[clap(long)]
    metadata: bool,
}

fn possible_cpus() -> usize {
    thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let Stackctx {
        mode: modes,
        cpus,
        depth,
        interval: period,
        count,
        packed,
        force_user,
        hide,
        metadata,
    } = Stackctx::parse();

    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let mut config = CallstackConfig::new(cpus).with_packed(packed);
    if force_user {
        config = config.with_user_callstack(true);
    }

    info!("Registering callstack contexts");
    let nesting = UserNesting::new(config.possible_cpus).context("userspace walk guard")?;
    let mut callstacks = Callstacks::new(config, platform::lookup, Arc::new(nesting));
    let mut ctx = Context::new();
    for mode in modes {
        callstacks.register(&mut ctx, mode).with_context(|| format!("{mode} callstack"))?;
    }
    info!(
        "Allocated {} of callstack buffers",
        Size::from_bytes(config.buffer_footprint() * ctx.len())
    );

    let tracer = Tracer::new(ctx, &config);
    if metadata {
        for field in tracer.ctx().fields() {
            println!("{}", field.event_field);
        }
        return Ok(());
    }

    info!("Loading symbols");
    let symbols = SymResolver::new(process::id())?.with_symbol_filter(HashSet::from_iter(hide));

    run(tracer, &symbols, depth, Duration::from_millis(period), count).await;
    info!("Cleaning up...");

    Ok(())
}

async fn run(
    mut tracer: Tracer,
    symbols: &SymResolver,
    depth: usize,
    period: Duration,
    count: Option<u32>,
) {
    info!("Firing events, waiting for ^C");
    let mut tick = interval(period);
    let mut fired = 0u32;
    while count.map_or(true, |count| fired < count) {
        select! {
            _ = ctrl_c() => break,
            _ = tick.tick() => (),
        }

        // Ids wrap around on long runs.
        let id = fired;
        fired = fired.wrapping_add(1);
        let event = match workload::descend(depth, &mut || tracer.emit(id)) {
            Ok(event) => event,
            Err(e) => {
                error!("Failed to write event: {e:#}");
                continue;
            }
        };
        let stacks = match tracer.callstacks(&event) {
            Ok(stacks) => stacks,
            Err(e) => {
                error!("Failed to read event back: {e:#}");
                continue;
            }
        };

        println!("==> event {id} on CPU {}, {} bytes:", event.cpu, event.payload.len());
        for (name, stack) in stacks {
            println!("    {name}: {} frames", stack.entries.len());
            symbols.print_callstack(&stack);
        }
        println!();
    }
}
