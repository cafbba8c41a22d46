//! Index operations
//!
//! The three operations the worker can run over the attached file: a
//! full index, a partial index from the current end, and a non-mutating
//! change probe. The first two share `do_index`, a block loop that
//! reads the file in `IDX_BLOCK_SIZE` chunks, parses each chunk, folds
//! it into the indexing data and polls the interrupt flag between
//! blocks. The store's mutex is never held across file I/O.

use log::{debug, warn};

use index_units::encoding::{self, TextCodec};
use index_units::hash;
use index_units::linepos::FastLinePositionArray;
use index_units::parse::{parse_block, IndexingState};

use crate::data::IndexingData;
use crate::Result;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// how much of the file is read per iteration of the block loop
pub const IDX_BLOCK_SIZE: usize = 5 * 1024 * 1024;

/// Terminal status of an indexing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingStatus {
    Successful,
    NoMemory,
    Interrupted,
}

/// What a change probe (or an aborted partial index) found out about
/// the monitored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoredFileStatus {
    DataAdded,
    Truncated,
    Unchanged,
}

/// Outcome of any operation; the worker picks the finish event by arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Indexed(LoadingStatus),
    Checked(MonitoredFileStatus),
}

/// Re-index the whole file from scratch.
pub struct FullIndex {
    pub forced_encoding: Option<TextCodec>,
}

/// Index whatever was appended since the last indexing pass.
pub struct PartialIndex;

/// Compare size and prefix fingerprint against the stored index.
pub struct CheckFileChanges;

/// The worker's dispatchable operation.
pub enum IndexOperation {
    Full(FullIndex),
    Partial(PartialIndex),
    Check(CheckFileChanges),
}

impl IndexOperation {
    pub fn run<F: FnMut(u8)>(
        &self,
        path: &Path,
        data: &IndexingData,
        interrupt: &AtomicBool,
        progress: &mut F,
    ) -> Result<OperationResult> {
        match self {
            IndexOperation::Full(op) => op.start(path, data, interrupt, progress),
            IndexOperation::Partial(op) => op.start(path, data, interrupt, progress),
            IndexOperation::Check(op) => op.start(path, data),
        }
    }

    pub fn is_check(&self) -> bool {
        match self {
            IndexOperation::Check(_) => true,
            _ => false,
        }
    }
}

impl FullIndex {
    pub fn start<F: FnMut(u8)>(
        &self,
        path: &Path,
        data: &IndexingData,
        interrupt: &AtomicBool,
        progress: &mut F,
    ) -> Result<OperationResult> {
        debug!("full index of {}", path.display());
        data.clear();
        if self.forced_encoding.is_some() {
            data.force_encoding(self.forced_encoding);
        }
        let completed = do_index(path, data, interrupt, 0, self.forced_encoding, progress)?;
        Ok(OperationResult::Indexed(if completed {
            LoadingStatus::Successful
        } else {
            LoadingStatus::Interrupted
        }))
    }
}

impl PartialIndex {
    pub fn start<F: FnMut(u8)>(
        &self,
        path: &Path,
        data: &IndexingData,
        interrupt: &AtomicBool,
        progress: &mut F,
    ) -> Result<OperationResult> {
        let indexed_size = data.get_size();
        let file_size = fs::metadata(path)?.len();
        if file_size < indexed_size {
            warn!(
                "{} shrank below the indexed size ({} < {})",
                path.display(),
                file_size,
                indexed_size
            );
            return Ok(OperationResult::Checked(MonitoredFileStatus::Truncated));
        }
        if file_size == indexed_size {
            return Ok(OperationResult::Checked(MonitoredFileStatus::Unchanged));
        }
        debug!(
            "partial index of {} from {}",
            path.display(),
            indexed_size
        );
        let codec = data.get_forced_encoding().or(data.get_encoding_guess());
        let completed = do_index(path, data, interrupt, indexed_size, codec, progress)?;
        Ok(OperationResult::Indexed(if completed {
            LoadingStatus::Successful
        } else {
            LoadingStatus::Interrupted
        }))
    }
}

impl CheckFileChanges {
    pub fn start(&self, path: &Path, data: &IndexingData) -> Result<OperationResult> {
        let indexed_size = data.get_size();
        let (hashed_size, stored_digest) = data.get_hash();
        let file_size = fs::metadata(path)?.len();
        if file_size < indexed_size {
            return Ok(OperationResult::Checked(MonitoredFileStatus::Truncated));
        }
        if hashed_size > 0 {
            let (read, digest) = hash::hash_file_prefix(path, hashed_size)?;
            if read != hashed_size || digest != stored_digest {
                debug!("prefix fingerprint of {} changed", path.display());
                return Ok(OperationResult::Checked(MonitoredFileStatus::Truncated));
            }
        }
        Ok(OperationResult::Checked(if file_size > indexed_size {
            MonitoredFileStatus::DataAdded
        } else {
            MonitoredFileStatus::Unchanged
        }))
    }
}

/// Block loop shared by the indexing operations. Returns `Ok(true)` on
/// completion and `Ok(false)` when the interrupt flag cut it short, in
/// which case the data folded so far stays in the store.
///
/// When `codec` is `None` the first block read doubles as the input of
/// the encoding detector; the guess then holds for the whole operation.
fn do_index<F: FnMut(u8)>(
    path: &Path,
    data: &IndexingData,
    interrupt: &AtomicBool,
    initial_position: u64,
    codec: Option<TextCodec>,
    progress: &mut F,
) -> Result<bool> {
    let mut file = fs::File::open(path)?;
    let file_size = file.metadata()?.len();
    if initial_position > 0 {
        file.seek(SeekFrom::Start(initial_position))?;
    }

    let mut buf: Vec<u8> = Vec::new();
    buf.try_reserve_exact(IDX_BLOCK_SIZE)?;
    buf.resize(IDX_BLOCK_SIZE, 0);

    let mut fill = file.read(&mut buf)?;
    let codec = match codec {
        Some(codec) => codec,
        None => {
            let codec = encoding::guess(&buf[..fill]);
            debug!("guessed encoding {} for {}", codec.name(), path.display());
            codec
        }
    };
    let mut state = IndexingState::new(codec, initial_position, data.get_max_length(), file_size);

    let mut base = initial_position;
    let mut last_percent = None;
    while fill > 0 {
        if interrupt.load(Ordering::Relaxed) {
            debug!("indexing of {} interrupted at {}", path.display(), base);
            return Ok(false);
        }
        let (positions, trailing) = parse_block(&mut state, &buf[..fill], base)?;
        let consumed = fill - trailing;
        data.add_all(&buf[..consumed], state.max_length, &positions, Some(codec))?;
        // an incomplete code unit moves to the front of the next block
        buf.copy_within(consumed..fill, 0);
        base += consumed as u64;
        fill = trailing;

        let percent = if file_size == 0 {
            100
        } else {
            (base.min(file_size) * 100 / file_size) as u8
        };
        if last_percent != Some(percent) {
            progress(percent);
            last_percent = Some(percent);
        }

        let read = file.read(&mut buf[fill..])?;
        if read == 0 {
            break;
        }
        fill += read;
    }
    // records the guess even when the file was empty
    data.add_all(&[], state.max_length, &FastLinePositionArray::new(), Some(codec))?;
    if last_percent != Some(100) {
        progress(100);
    }
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        file.sync_all().unwrap();
        path
    }

    fn full_index(path: &std::path::Path, data: &IndexingData) -> OperationResult {
        let interrupt = AtomicBool::new(false);
        FullIndex {
            forced_encoding: None,
        }
        .start(path, data, &interrupt, &mut |_| {})
        .unwrap()
    }

    fn partial_index(path: &std::path::Path, data: &IndexingData) -> OperationResult {
        let interrupt = AtomicBool::new(false);
        PartialIndex
            .start(path, data, &interrupt, &mut |_| {})
            .unwrap()
    }

    fn offsets(data: &IndexingData) -> Vec<u64> {
        (0..data.get_nb_lines())
            .map(|line| data.get_pos_for_line(line).unwrap())
            .collect()
    }

    #[test]
    fn full_index_three_lines() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "plain.log", b"a\nbb\nccc\n");
        let data = IndexingData::new();
        let result = full_index(&path, &data);
        assert_eq!(
            result,
            OperationResult::Indexed(LoadingStatus::Successful)
        );
        assert_eq!(offsets(&data), vec![2, 5, 9]);
        assert_eq!(data.get_size(), 9);
        assert_eq!(data.get_max_length(), 3);
        assert_eq!(data.get_encoding_guess(), Some(TextCodec::Utf8));
    }

    #[test]
    fn full_index_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "empty.log", b"");
        let data = IndexingData::new();
        full_index(&path, &data);
        assert_eq!(data.get_nb_lines(), 0);
        assert_eq!(data.get_size(), 0);
        assert_eq!(data.get_encoding_guess(), Some(TextCodec::Utf8));
    }

    #[test]
    fn unterminated_tail_is_not_counted() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "tail.log", b"x\ny");
        let data = IndexingData::new();
        full_index(&path, &data);
        assert_eq!(offsets(&data), vec![2]);
        assert_eq!(data.get_nb_lines(), 1);
        assert_eq!(data.get_max_length(), 1);
    }

    #[test]
    fn partial_index_appends() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "grow.log", b"hello\n");
        let data = IndexingData::new();
        full_index(&path, &data);
        assert_eq!(offsets(&data), vec![6]);

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"world\n").unwrap();
        file.sync_all().unwrap();

        let result = partial_index(&path, &data);
        assert_eq!(
            result,
            OperationResult::Indexed(LoadingStatus::Successful)
        );
        assert_eq!(offsets(&data), vec![6, 12]);
        assert_eq!(data.get_size(), 12);
    }

    #[test]
    fn partial_index_on_unchanged_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "same.log", b"hello\n");
        let data = IndexingData::new();
        full_index(&path, &data);
        assert_eq!(
            partial_index(&path, &data),
            OperationResult::Checked(MonitoredFileStatus::Unchanged)
        );
    }

    #[test]
    fn partial_index_detects_truncation() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "shrink.log", b"abcdef\n");
        let data = IndexingData::new();
        full_index(&path, &data);
        write_file(&dir, "shrink.log", b"abc\n");
        assert_eq!(
            partial_index(&path, &data),
            OperationResult::Checked(MonitoredFileStatus::Truncated)
        );
    }

    #[test]
    fn partial_equals_full_reindex() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "equiv.log", b"first line\nsecond\n");
        let incremental = IndexingData::new();
        full_index(&path, &incremental);

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"a much longer third line\nfourth\n").unwrap();
        file.sync_all().unwrap();
        partial_index(&path, &incremental);

        let reference = IndexingData::new();
        full_index(&path, &reference);

        assert_eq!(offsets(&incremental), offsets(&reference));
        assert_eq!(incremental.get_size(), reference.get_size());
        assert_eq!(incremental.get_max_length(), reference.get_max_length());
        assert_eq!(incremental.get_hash(), reference.get_hash());
    }

    #[test]
    fn check_unchanged_after_full_index() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "watch.log", b"some content\nmore\n");
        let data = IndexingData::new();
        full_index(&path, &data);
        assert_eq!(
            CheckFileChanges.start(&path, &data).unwrap(),
            OperationResult::Checked(MonitoredFileStatus::Unchanged)
        );
    }

    #[test]
    fn check_sees_appended_data() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "watch.log", b"some content\n");
        let data = IndexingData::new();
        full_index(&path, &data);

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"fresh\n").unwrap();
        file.sync_all().unwrap();
        assert_eq!(
            CheckFileChanges.start(&path, &data).unwrap(),
            OperationResult::Checked(MonitoredFileStatus::DataAdded)
        );
        // the probe must not touch the index
        assert_eq!(data.get_size(), 13);
    }

    #[test]
    fn check_detects_shrink() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "watch.log", b"abcdef\n");
        let data = IndexingData::new();
        full_index(&path, &data);
        write_file(&dir, "watch.log", b"abc\n");
        assert_eq!(
            CheckFileChanges.start(&path, &data).unwrap(),
            OperationResult::Checked(MonitoredFileStatus::Truncated)
        );
    }

    #[test]
    fn check_detects_same_size_rewrite() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "watch.log", b"abcdef\n");
        let data = IndexingData::new();
        full_index(&path, &data);
        write_file(&dir, "watch.log", b"ABCDEF\n");
        assert_eq!(
            CheckFileChanges.start(&path, &data).unwrap(),
            OperationResult::Checked(MonitoredFileStatus::Truncated)
        );
    }

    #[test]
    fn interrupt_cuts_the_operation_short() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "stop.log", b"a\nb\nc\n");
        let data = IndexingData::new();
        let interrupt = AtomicBool::new(true);
        let result = FullIndex {
            forced_encoding: None,
        }
        .start(&path, &data, &interrupt, &mut |_| {})
        .unwrap();
        assert_eq!(
            result,
            OperationResult::Indexed(LoadingStatus::Interrupted)
        );
        assert_eq!(data.get_nb_lines(), 0);
    }

    #[test]
    fn forced_encoding_bypasses_the_detector() {
        let dir = TempDir::new().unwrap();
        // the detector would call this UTF-8 and find two lines
        let path = write_file(&dir, "forced.log", b"hello\nworld\n");
        let data = IndexingData::new();
        let interrupt = AtomicBool::new(false);
        let result = FullIndex {
            forced_encoding: Some(TextCodec::Utf16Le),
        }
        .start(&path, &data, &interrupt, &mut |_| {})
        .unwrap();
        assert_eq!(
            result,
            OperationResult::Indexed(LoadingStatus::Successful)
        );
        assert_eq!(data.get_forced_encoding(), Some(TextCodec::Utf16Le));
        assert_eq!(data.get_nb_lines(), 0);
    }

    #[test]
    fn progress_is_deduplicated_and_reaches_completion() {
        let dir = TempDir::new().unwrap();
        let line = b"0123456789012345678901234567890123456789012345678\n";
        let mut content = Vec::new();
        while content.len() < IDX_BLOCK_SIZE + IDX_BLOCK_SIZE / 4 {
            content.extend_from_slice(line);
        }
        let path = write_file(&dir, "big.log", &content);
        let data = IndexingData::new();
        let interrupt = AtomicBool::new(false);
        let mut percents = Vec::new();
        FullIndex {
            forced_encoding: None,
        }
        .start(&path, &data, &interrupt, &mut |p| percents.push(p))
        .unwrap();
        assert_eq!(percents.last(), Some(&100));
        let mut sorted = percents.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(percents, sorted, "percents must be increasing and distinct");
        assert_eq!(data.get_nb_lines(), content.len() / line.len());
        assert_eq!(data.get_size(), content.len() as u64);
    }
}
