//! Self-describing layout of the callstack field, for trace readers.

use core::{fmt, mem};

use crate::{CallstackMode, WireLayout};

/// Integer type description. Sizes and alignments are in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerType {
    pub size: u32,
    pub alignment: u32,
    pub signed: bool,
    pub reverse_byte_order: bool,
    pub base: u8,
}

impl IntegerType {
    const fn unsigned<T>(alignment: usize, base: u8) -> Self {
        Self {
            size: (mem::size_of::<T>() * 8) as u32,
            alignment: (alignment * 8) as u32,
            signed: false,
            reverse_byte_order: false,
            base,
        }
    }
}

impl fmt::Display for IntegerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let IntegerType { size, alignment, signed, reverse_byte_order, base } = self;
        write!(f, "integer {{ size = {size}; align = {alignment}; signed = {}; ", *signed as u8)?;
        if *reverse_byte_order {
            let order = if cfg!(target_endian = "little") { "be" } else { "le" };
            write!(f, "byte_order = {order}; ")?;
        }
        write!(f, "encoding = none; base = {base}; }}")
    }
}

/// Declaration of a sequence field: a length integer followed by that many elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventField {
    pub name: &'static str,
    pub length: IntegerType,
    pub elem: IntegerType,
}

impl EventField {
    /// Callstack sequence: a `u32` count of hexadecimal machine words.
    pub const fn callstack(mode: CallstackMode, layout: WireLayout) -> Self {
        Self {
            name: mode.ctx_name(),
            length: IntegerType::unsigned::<u32>(layout.len_align, 10),
            elem: IntegerType::unsigned::<usize>(layout.entry_align, 16),
        }
    }
}

impl fmt::Display for EventField {
    /// TSDL declaration of the field.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let EventField { name, length, elem } = self;
        writeln!(f, "{length} __{name}_length;")?;
        write!(f, "{elem} _{name}[ __{name}_length ];")
    }
}
