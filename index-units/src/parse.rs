//! Block-wise line position parser
//!
//! A block of raw bytes is scanned for the encoded `U+000A` terminator;
//! every hit emits the offset one past the terminator into a
//! `FastLinePositionArray`. Line lengths are measured in code points,
//! with tabs expanded to 8 column stops, and the measurement carries
//! across blocks so a line split over several blocks is counted whole.
//!
//! For the wide codecs only a prefix whose length is a multiple of the
//! code unit width is consumed; the caller keeps the remainder and feeds
//! it back in front of the next block, so a split code unit can never be
//! mistaken for (or hide) a terminator.

use memchr::memchr_iter;

use crate::encoding::{CodecParams, TextCodec};
use crate::linepos::{FastLinePositionArray, Result};

/// tab stop width used when measuring line lengths
pub const TAB_STOP: usize = 8;

/// Per-operation scratch state threaded through `parse_block` calls.
/// Nothing here is shared; the indexing data store owns the durable copy.
#[derive(Debug, Clone)]
pub struct IndexingState {
    /// codec lengths are measured under; fixed for the whole operation
    pub codec: TextCodec,
    /// the codec's unit width and encoded line feed
    pub params: CodecParams,
    /// absolute offset of the next byte to parse
    pub pos: u64,
    /// end offset of the last emitted line
    pub end: u64,
    /// greatest line length seen so far, in expanded code points
    pub max_length: usize,
    /// code points of the current unterminated line
    pub partial_chars: usize,
    /// surplus columns from tab expansion in the current unterminated line
    pub additional_spaces: usize,
    /// size of the file when the operation started
    pub file_size: u64,
}

impl IndexingState {
    pub fn new(codec: TextCodec, start: u64, max_length: usize, file_size: u64) -> Self {
        IndexingState {
            codec,
            params: codec.params(),
            pos: start,
            end: start,
            max_length,
            partial_chars: 0,
            additional_spaces: 0,
            file_size,
        }
    }

    fn advance_tab(&mut self) {
        let column = self.partial_chars + self.additional_spaces;
        self.partial_chars += 1;
        self.additional_spaces += TAB_STOP - 1 - column % TAB_STOP;
    }

    fn finish_line(&mut self, line_end: u64) {
        let length = self.partial_chars + self.additional_spaces;
        if length > self.max_length {
            self.max_length = length;
        }
        self.partial_chars = 0;
        self.additional_spaces = 0;
        self.end = line_end;
    }
}

/// Parse one block whose first byte sits at absolute `offset`.
///
/// Returns the line end offsets found in the block and the number of
/// trailing bytes left unconsumed (an incomplete code unit); the caller
/// must prepend those bytes to the next block.
pub fn parse_block(
    state: &mut IndexingState,
    block: &[u8],
    offset: u64,
) -> Result<(FastLinePositionArray, usize)> {
    debug_assert_eq!(state.pos, offset, "blocks must be parsed in file order");
    let (positions, consumed) = match state.params.unit_width {
        1 => (parse_narrow(state, block, offset)?, block.len()),
        width => parse_wide(state, block, offset, width)?,
    };
    state.pos = offset + consumed as u64;
    Ok((positions, block.len() - consumed))
}

fn parse_narrow(
    state: &mut IndexingState,
    block: &[u8],
    offset: u64,
) -> Result<FastLinePositionArray> {
    let utf8 = state.codec == TextCodec::Utf8;
    let mut positions = FastLinePositionArray::new();
    let mut start = 0usize;
    for newline in memchr_iter(b'\n', block) {
        measure_narrow(state, &block[start..newline], utf8);
        let line_end = offset + newline as u64 + 1;
        positions.append(line_end)?;
        state.finish_line(line_end);
        start = newline + 1;
    }
    measure_narrow(state, &block[start..], utf8);
    Ok(positions)
}

fn measure_narrow(state: &mut IndexingState, bytes: &[u8], utf8: bool) {
    for b in bytes {
        if *b == b'\t' {
            state.advance_tab();
        } else if !utf8 || *b & 0xc0 != 0x80 {
            // in UTF-8 continuation bytes do not open a code point, so a
            // sequence split across blocks is still counted exactly once
            state.partial_chars += 1;
        }
    }
}

fn parse_wide(
    state: &mut IndexingState,
    block: &[u8],
    offset: u64,
    width: usize,
) -> Result<(FastLinePositionArray, usize)> {
    let usable = block.len() - block.len() % width;
    let mut positions = FastLinePositionArray::new();
    let mut at = 0usize;
    while at < usable {
        let scalar = decode_unit(state.codec, &block[at..at + width]);
        at += width;
        if scalar == 0x0a {
            let line_end = offset + at as u64;
            positions.append(line_end)?;
            state.finish_line(line_end);
        } else if scalar == 0x09 {
            state.advance_tab();
        } else if !is_low_surrogate(state.codec, scalar) {
            // a surrogate pair is counted once, on its high half
            state.partial_chars += 1;
        }
    }
    Ok((positions, usable))
}

fn decode_unit(codec: TextCodec, unit: &[u8]) -> u32 {
    match codec {
        TextCodec::Utf16Le => u16::from_le_bytes([unit[0], unit[1]]) as u32,
        TextCodec::Utf16Be => u16::from_be_bytes([unit[0], unit[1]]) as u32,
        TextCodec::Utf32Le => u32::from_le_bytes([unit[0], unit[1], unit[2], unit[3]]),
        TextCodec::Utf32Be => u32::from_be_bytes([unit[0], unit[1], unit[2], unit[3]]),
        TextCodec::Utf8 | TextCodec::SingleByte(_) => unit[0] as u32,
    }
}

fn is_low_surrogate(codec: TextCodec, scalar: u32) -> bool {
    match codec {
        TextCodec::Utf16Le | TextCodec::Utf16Be => (0xdc00..=0xdfff).contains(&scalar),
        _ => false,
    }
}
