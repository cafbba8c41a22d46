//! Indexed prefix hash
//!
//! A cheap identity fingerprint for change detection: the MD5 of the
//! first `HASH_PREFIX_SIZE` bytes of the file, paired with the number of
//! bytes actually hashed. The context is fed incrementally as blocks are
//! folded into the index, and finalized on demand by cloning, so the
//! running digest can be read at any point without losing the context.

use md5::{Digest, Md5};
use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// upper bound on how much of the file the fingerprint covers
pub const HASH_PREFIX_SIZE: u64 = 256 * 1024;

pub type Md5Digest = [u8; 16];

#[derive(Clone)]
pub struct IndexedHash {
    context: Md5,
    size: u64,
}

impl IndexedHash {
    pub fn new() -> Self {
        IndexedHash {
            context: Md5::new(),
            size: 0,
        }
    }

    /// number of bytes hashed so far, at most `HASH_PREFIX_SIZE`
    pub fn size(&self) -> u64 {
        self.size
    }

    /// feed the next block of file bytes, in file order; input past the
    /// prefix bound is ignored, truncating the crossing block
    pub fn extend(&mut self, block: &[u8]) {
        if self.size >= HASH_PREFIX_SIZE {
            return;
        }
        let room = (HASH_PREFIX_SIZE - self.size) as usize;
        let take = room.min(block.len());
        self.context.update(&block[..take]);
        self.size += take as u64;
    }

    pub fn digest(&self) -> Md5Digest {
        self.context.clone().finalize().into()
    }

    pub fn reset(&mut self) {
        self.context = Md5::new();
        self.size = 0;
    }
}

impl Default for IndexedHash {
    fn default() -> Self {
        IndexedHash::new()
    }
}

/// One-shot digest of the first `len` bytes of a file, for comparing a
/// stored fingerprint against the file as it is now. Returns the number
/// of bytes actually read; fewer than `len` means the file shrank.
pub fn hash_file_prefix<P: AsRef<Path>>(path: P, len: u64) -> io::Result<(u64, Md5Digest)> {
    let mut file = fs::File::open(path)?;
    let mut context = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    let mut remaining = len;
    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        let got = file.read(&mut buf[..want])?;
        if got == 0 {
            break;
        }
        context.update(&buf[..got]);
        remaining -= got as u64;
    }
    Ok((len - remaining, context.finalize().into()))
}
