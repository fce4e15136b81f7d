//! Context fields attached to events, and the table holding them.

use alloc::{boxed::Box, vec::Vec};

use crate::{EventField, RingBufferCtx};

/// A field written in every event of the context it is attached to.
pub trait ContextField: Send + Sync {
    /// Bytes the field takes when written at `offset`, padding included.
    fn get_size(&self, offset: usize, ctx: &dyn RingBufferCtx) -> usize;

    /// Writes exactly the bytes announced by the preceding `get_size` of the same event.
    fn record(&self, ctx: &mut dyn RingBufferCtx);
}

/// An installed field: its declaration and its size/record callbacks. Dropping it tears the
/// field down.
pub struct CtxField {
    pub event_field: EventField,
    pub ops: Box<dyn ContextField>,
}

/// Ordered set of context fields, unique by name.
#[derive(Default)]
pub struct Context {
    fields: Vec<CtxField>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, name: &str) -> Option<&CtxField> {
        self.fields.iter().find(|field| field.event_field.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Appends `field`, unless a field with the same name is already there (it is then handed
    /// back).
    pub fn append(&mut self, field: CtxField) -> Result<(), CtxField> {
        if self.contains(field.event_field.name) {
            return Err(field);
        }
        self.fields.push(field);
        Ok(())
    }

    /// Removes and tears down the field called `name`.
    pub fn remove(&mut self, name: &str) -> bool {
        let len = self.fields.len();
        self.fields.retain(|field| field.event_field.name != name);
        self.fields.len() != len
    }

    pub fn fields(&self) -> impl Iterator<Item = &CtxField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Size of all the fields written one after the other from `offset`.
    pub fn get_size(&self, offset: usize, ctx: &dyn RingBufferCtx) -> usize {
        self.fields.iter().fold(0, |size, field| size + field.ops.get_size(offset + size, ctx))
    }

    pub fn record(&self, ctx: &mut dyn RingBufferCtx) {
        self.fields.iter().for_each(|field| field.ops.record(ctx));
    }
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.fields.iter().map(|field| field.event_field.name)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallstackMode, MemoryRing, WireLayout};

    /// A `u8` written as is.
    struct Byte(u8);

    impl ContextField for Byte {
        fn get_size(&self, _: usize, _: &dyn RingBufferCtx) -> usize {
            1
        }

        fn record(&self, ctx: &mut dyn RingBufferCtx) {
            ctx.write(&[self.0]);
        }
    }

    fn byte(mode: CallstackMode, value: u8) -> CtxField {
        CtxField {
            event_field: EventField::callstack(mode, WireLayout::packed()),
            ops: Box::new(Byte(value)),
        }
    }

    #[test]
    fn names_are_unique() {
        let mut ctx = Context::new();
        assert!(ctx.append(byte(CallstackMode::Kernel, 1)).is_ok());
        let dup = ctx.append(byte(CallstackMode::Kernel, 2)).unwrap_err();
        assert_eq!(dup.event_field.name, "callstack_kernel");
        assert_eq!(ctx.len(), 1);
        assert!(ctx.append(byte(CallstackMode::User, 3)).is_ok());
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn remove() {
        let mut ctx = Context::new();
        ctx.append(byte(CallstackMode::Kernel, 1)).ok().unwrap();
        assert!(!ctx.remove("callstack_user"));
        assert!(ctx.remove("callstack_kernel"));
        assert!(ctx.is_empty());
    }

    #[test]
    fn fields_are_written_in_order() {
        let mut ctx = Context::new();
        ctx.append(byte(CallstackMode::Kernel, 1)).ok().unwrap();
        ctx.append(byte(CallstackMode::User, 2)).ok().unwrap();

        let mut ring = unsafe { MemoryRing::new(0, 1) };
        assert_eq!(ctx.get_size(0, &ring), 2);
        ctx.record(&mut ring);
        assert_eq!(ring.bytes(), &[1, 2]);
    }
}
