//! Reader side of the callstack field.

use alloc::vec::Vec;
use core::mem;

use thiserror::Error;

use crate::{align_pad, WireLayout, MAX_ENTRIES, SENTINEL};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("callstack needs {needed} bytes at offset {offset}, event is {len} bytes long")]
    Short { offset: usize, needed: usize, len: usize },
    #[error("callstack of {0} entries exceeds the maximum depth")]
    TooDeep(usize),
}

/// A callstack read back from an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedCallstack {
    /// Addresses, innermost frame first. The truncation marker is not included.
    pub entries: Vec<usize>,
    /// The walk filled the whole buffer: outer frames may be missing.
    pub truncated: bool,
}

/// Reads the callstack field written at `offset` of `event`, returning it along with the
/// offset right past it.
pub fn decode(
    event: &[u8],
    offset: usize,
    layout: WireLayout,
) -> Result<(DecodedCallstack, usize), DecodeError> {
    let mut pos = advance(offset, align_pad(offset, layout.len_align), event)?;
    let len = u32::from_ne_bytes(take::<4>(event, pos)?) as usize;
    pos += mem::size_of::<u32>();
    if len > MAX_ENTRIES + 1 {
        return Err(DecodeError::TooDeep(len));
    }
    pos = advance(pos, align_pad(pos, layout.entry_align), event)?;

    const WORD: usize = mem::size_of::<usize>();
    let needed = len * WORD;
    let bytes = pos
        .checked_add(needed)
        .and_then(|end| event.get(pos..end))
        .ok_or(DecodeError::Short { offset: pos, needed, len: event.len() })?;
    let mut entries: Vec<usize> = bytes
        .chunks_exact(WORD)
        .map(|word| {
            let mut raw = [0; WORD];
            raw.copy_from_slice(word);
            usize::from_ne_bytes(raw)
        })
        .collect();
    pos += needed;

    let truncated = len == MAX_ENTRIES + 1 && entries.last() == Some(&SENTINEL);
    if truncated {
        entries.pop();
    }
    Ok((DecodedCallstack { entries, truncated }, pos))
}

/// `offset + pad`, or `Short` if that is past the end of the address space.
fn advance(offset: usize, pad: usize, event: &[u8]) -> Result<usize, DecodeError> {
    offset.checked_add(pad).ok_or(DecodeError::Short { offset, needed: pad, len: event.len() })
}

fn take<const N: usize>(event: &[u8], offset: usize) -> Result<[u8; N], DecodeError> {
    let mut raw = [0; N];
    let bytes = offset
        .checked_add(N)
        .and_then(|end| event.get(offset..end))
        .ok_or(DecodeError::Short { offset, needed: N, len: event.len() })?;
    raw.copy_from_slice(bytes);
    Ok(raw)
}
