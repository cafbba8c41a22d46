//! Line position arrays
//!
//! A line position array maps a line number to the byte offset one past
//! that line's terminating newline. The array only ever grows by append
//! and offsets are monotonically non-decreasing, which allows a compact
//! chunked representation:
//!
//! ANCHOR (8 bytes, the first offset of the chunk)
//! DELTAS (up to 1024 * 4 bytes, offsets relative to the anchor)
//!
//! A chunk whose span does not fit a 32 bit delta falls back to plain
//! 64 bit offsets. Full chunks are sealed behind `Arc` so a snapshot
//! clone shares them by reference and only copies the open tail.

use std::collections::TryReserveError;
use std::sync::Arc;
use std::{error, fmt, result};

/// entries covered by one anchor; a power of two keeps lookup a shift/mask
pub const ANCHOR_INTERVAL: usize = 1024;

#[derive(Debug)]
pub enum Error {
    OutOfMemory,
}
impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Error {
        Error::OutOfMemory
    }
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "line position array allocation failed"),
        }
    }
}
impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Clone)]
enum Chunk {
    Delta { anchor: u64, deltas: Vec<u32> },
    Wide(Vec<u64>),
}

impl Chunk {
    fn new(anchor: u64) -> Self {
        Chunk::Delta {
            anchor,
            deltas: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Chunk::Delta { deltas, .. } => deltas.len(),
            Chunk::Wide(offsets) => offsets.len(),
        }
    }

    fn at(&self, i: usize) -> u64 {
        match self {
            Chunk::Delta { anchor, deltas } => anchor + deltas[i] as u64,
            Chunk::Wide(offsets) => offsets[i],
        }
    }

    fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len()).map(move |i| self.at(i))
    }

    fn push(&mut self, offset: u64) -> Result<()> {
        match self {
            Chunk::Delta { anchor, deltas } => {
                let delta = offset - *anchor;
                if delta > u32::max_value() as u64 {
                    // span exceeds a 32 bit delta, widen the whole chunk
                    let mut wide = Vec::new();
                    wide.try_reserve_exact(ANCHOR_INTERVAL)?;
                    wide.extend(deltas.iter().map(|d| *anchor + *d as u64));
                    wide.push(offset);
                    *self = Chunk::Wide(wide);
                } else {
                    if deltas.len() == deltas.capacity() {
                        deltas.try_reserve(1)?;
                    }
                    deltas.push(delta as u32);
                }
            }
            Chunk::Wide(offsets) => {
                if offsets.len() == offsets.capacity() {
                    offsets.try_reserve(1)?;
                }
                offsets.push(offset);
            }
        }
        Ok(())
    }
}

/// Append-only sequence of line end offsets with O(1) lookup.
///
/// Observable semantics are those of a flat ordered `Vec<u64>`; the
/// chunked delta encoding is an internal memory optimisation.
#[derive(Debug, Clone)]
pub struct LinePositionArray {
    sealed: Vec<Arc<Chunk>>,
    tail: Option<Chunk>,
    len: usize,
    last: u64,
}

impl LinePositionArray {
    pub fn new() -> Self {
        LinePositionArray {
            sealed: Vec::new(),
            tail: None,
            len: 0,
            last: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// offset of the last indexed line end, or 0 when nothing is indexed.
    /// This doubles as the total indexed byte size.
    pub fn last_or_zero(&self) -> u64 {
        self.last
    }

    /// end offset of line `i`; `None` past the end of the index
    pub fn at(&self, i: usize) -> Option<u64> {
        if i >= self.len {
            return None;
        }
        let chunk = i / ANCHOR_INTERVAL;
        let slot = i % ANCHOR_INTERVAL;
        if chunk < self.sealed.len() {
            Some(self.sealed[chunk].at(slot))
        } else {
            self.tail.as_ref().map(|t| t.at(slot))
        }
    }

    /// append a line end offset; offsets must arrive non-decreasing
    pub fn append(&mut self, offset: u64) -> Result<()> {
        debug_assert!(offset >= self.last, "line offsets must not regress");
        if self.tail.as_ref().map_or(false, |t| t.len() == ANCHOR_INTERVAL) {
            if self.sealed.len() == self.sealed.capacity() {
                self.sealed.try_reserve(1)?;
            }
            if let Some(full) = self.tail.take() {
                self.sealed.push(Arc::new(full));
            }
        }
        let tail = self.tail.get_or_insert_with(|| Chunk::new(offset));
        tail.push(offset)?;
        self.last = offset;
        self.len += 1;
        Ok(())
    }

    pub fn append_batch(&mut self, positions: &FastLinePositionArray) -> Result<()> {
        for offset in positions.iter() {
            self.append(offset)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.sealed.clear();
        self.tail = None;
        self.len = 0;
        self.last = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.sealed
            .iter()
            .flat_map(|chunk| chunk.iter())
            .chain(self.tail.iter().flat_map(|chunk| chunk.iter()))
    }
}

impl Default for LinePositionArray {
    fn default() -> Self {
        LinePositionArray::new()
    }
}

/// Short flat buffer of line end offsets produced by parsing one block,
/// built without locking and folded into a `LinePositionArray` later.
#[derive(Debug, Clone, Default)]
pub struct FastLinePositionArray(Vec<u64>);

impl FastLinePositionArray {
    pub fn new() -> Self {
        FastLinePositionArray(Vec::new())
    }

    pub fn append(&mut self, offset: u64) -> Result<()> {
        if self.0.len() == self.0.capacity() {
            self.0.try_reserve(1)?;
        }
        self.0.push(offset);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<u64> {
        self.0.last().cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().cloned()
    }
}
