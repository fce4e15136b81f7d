//! A minimal event writer driving context fields the way a ring buffer does: size the event,
//! reserve it, record it.

use std::mem;

use anyhow::{ensure, Context as _, Result};
use stackctx_callstack::{
    decode, CallstackConfig, Context, DecodedCallstack, MemoryRing, RingBufferCtx, WireLayout,
};

/// Event header: the event id.
const HEADER_LEN: usize = mem::size_of::<u32>();

pub struct Event {
    pub id: u32,
    pub cpu: usize,
    pub payload: Vec<u8>,
}

pub struct Tracer {
    ctx: Context,
    layout: WireLayout,
    cpus: usize,
    next_cpu: usize,
}

impl Tracer {
    pub fn new(ctx: Context, config: &CallstackConfig) -> Self {
        Self { ctx, layout: config.layout(), cpus: config.possible_cpus.max(1), next_cpu: 0 }
    }

    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    /// Writes event `id` and its context fields. Events are spread over CPU ids in turn.
    pub fn emit(&mut self, id: u32) -> Result<Event> {
        let cpu = self.next_cpu;
        self.next_cpu = (cpu + 1) % self.cpus;

        // Events are written one at a time from a single thread and never nest, CPU ids are
        // only labels: nothing else can touch the buffers of this (CPU, level).
        let mut ring = unsafe { MemoryRing::new(cpu, 1) };
        ring.write(&id.to_ne_bytes());

        let size = self.ctx.get_size(HEADER_LEN, &ring);
        ring.reserve(size);
        self.ctx.record(&mut ring);

        let written = ring.offset() - HEADER_LEN;
        ensure!(written == size, "event {id}: reserved {size} bytes, recorded {written}");
        Ok(Event { id, cpu, payload: ring.into_bytes() })
    }

    /// Reads the callstacks of `event` back, in field order.
    pub fn callstacks(&self, event: &Event) -> Result<Vec<(&'static str, DecodedCallstack)>> {
        let mut offset = HEADER_LEN;
        self.ctx
            .fields()
            .map(|field| -> Result<_> {
                let name = field.event_field.name;
                let (stack, end) = decode(&event.payload, offset, self.layout)
                    .with_context(|| format!("event {}: {name}", event.id))?;
                offset = end;
                Ok((name, stack))
            })
            .collect()
    }
}
