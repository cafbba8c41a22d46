//! Shared indexing data
//!
//! The single aggregate shared between the indexing worker and the UI
//! reader: line index, max line length, prefix hash and encoding, all
//! behind one mutex. `add_all` is the sole mutator used while indexing,
//! so a reader always observes a block's offsets, hash contribution,
//! max-length and encoding together.

use log::debug;

use index_units::encoding::TextCodec;
use index_units::hash::{IndexedHash, Md5Digest};
use index_units::linepos::{FastLinePositionArray, LinePositionArray};

use crate::Result;
use std::sync::{Mutex, MutexGuard};

struct Inner {
    linepos: LinePositionArray,
    max_length: usize,
    hash: IndexedHash,
    guessed_encoding: Option<TextCodec>,
    forced_encoding: Option<TextCodec>,
}

pub struct IndexingData {
    inner: Mutex<Inner>,
}

/// Point-in-time copy for UI paging without repeated locking. The line
/// array clone shares its sealed chunks with the live index.
#[derive(Clone)]
pub struct IndexSnapshot {
    pub lines: LinePositionArray,
    pub max_length: usize,
    /// forced encoding when set, the guess otherwise
    pub encoding: Option<TextCodec>,
}

impl IndexingData {
    pub fn new() -> Self {
        IndexingData {
            inner: Mutex::new(Inner {
                linepos: LinePositionArray::new(),
                max_length: 0,
                hash: IndexedHash::new(),
                guessed_encoding: None,
                forced_encoding: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fold one parsed block into the index: append the line ends,
    /// extend the prefix hash with the block's bytes, raise the max
    /// length, and record the encoding guess.
    pub fn add_all(
        &self,
        block: &[u8],
        max_length: usize,
        positions: &FastLinePositionArray,
        encoding: Option<TextCodec>,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.linepos.append_batch(positions)?;
        inner.hash.extend(block);
        if max_length > inner.max_length {
            inner.max_length = max_length;
        }
        if encoding.is_some() {
            inner.guessed_encoding = encoding;
        }
        Ok(())
    }

    pub fn clear(&self) {
        debug!("clearing indexing data");
        let mut inner = self.lock();
        inner.linepos.clear();
        inner.max_length = 0;
        inner.hash.reset();
        inner.guessed_encoding = None;
        inner.forced_encoding = None;
    }

    /// total indexed byte size, i.e. the end offset of the last line
    pub fn get_size(&self) -> u64 {
        self.lock().linepos.last_or_zero()
    }

    pub fn get_nb_lines(&self) -> usize {
        self.lock().linepos.len()
    }

    /// greatest line length indexed so far, in expanded code points
    pub fn get_max_length(&self) -> usize {
        self.lock().max_length
    }

    /// end offset of line `line`, one past its terminator
    pub fn get_pos_for_line(&self, line: usize) -> Option<u64> {
        self.lock().linepos.at(line)
    }

    /// start offset of line `line`: the previous line's end, or zero
    pub fn get_line_start(&self, line: usize) -> Option<u64> {
        let inner = self.lock();
        if line >= inner.linepos.len() {
            return None;
        }
        if line == 0 {
            Some(0)
        } else {
            inner.linepos.at(line - 1)
        }
    }

    /// the stored fingerprint: (bytes hashed, digest over those bytes)
    pub fn get_hash(&self) -> (u64, Md5Digest) {
        let inner = self.lock();
        (inner.hash.size(), inner.hash.digest())
    }

    pub fn get_encoding_guess(&self) -> Option<TextCodec> {
        self.lock().guessed_encoding
    }

    pub fn get_forced_encoding(&self) -> Option<TextCodec> {
        self.lock().forced_encoding
    }

    /// Override the guess for presentation purposes; the index itself is
    /// untouched. `None` reverts to the guess.
    pub fn force_encoding(&self, encoding: Option<TextCodec>) {
        match encoding {
            Some(codec) => debug!("forcing encoding {}", codec.name()),
            None => debug!("reverting to guessed encoding"),
        }
        self.lock().forced_encoding = encoding;
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        let inner = self.lock();
        IndexSnapshot {
            lines: inner.linepos.clone(),
            max_length: inner.max_length,
            encoding: inner.forced_encoding.or(inner.guessed_encoding),
        }
    }
}

impl Default for IndexingData {
    fn default() -> Self {
        IndexingData::new()
    }
}
