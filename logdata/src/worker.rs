//! Background indexing worker
//!
//! One worker owns one background thread and runs at most one operation
//! at a time. Commands queue on a channel and are executed strictly in
//! order; every operation terminates in exactly one finish event on the
//! event channel, preceded by progress events that fire only when the
//! integer percentage changes. Cancellation is cooperative: the
//! interrupt flag is polled by the running operation between blocks.
//!
//! Nothing ever crosses the thread boundary as an error; failures are
//! logged and mapped to a terminal status.

use log::{debug, warn};

use index_units::encoding::TextCodec;

use crate::data::IndexingData;
use crate::ops::{
    CheckFileChanges, FullIndex, IndexOperation, LoadingStatus, MonitoredFileStatus,
    OperationResult, PartialIndex,
};
use crate::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{mpsc, Arc};
use std::thread;

/// Notifications delivered to the owner, in per-worker FIFO order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    IndexingProgressed(u8),
    IndexingFinished(LoadingStatus),
    CheckFileChangesFinished(MonitoredFileStatus),
}

enum Command {
    AttachFile(PathBuf),
    IndexAll(Option<TextCodec>),
    IndexAdditionalLines,
    CheckFileChanges,
}

/// Façade over the indexing thread. Dropping the worker interrupts any
/// running operation and joins the thread; the indexing data it was
/// given outlives it.
pub struct LogDataWorker {
    commands: Option<Sender<Command>>,
    interrupt: Arc<AtomicBool>,
    data: Arc<IndexingData>,
    handle: Option<thread::JoinHandle<()>>,
}

impl LogDataWorker {
    /// Spawn the worker thread. The receiver carries every event the
    /// worker emits, in emission order.
    pub fn new(data: Arc<IndexingData>) -> (Self, Receiver<Event>) {
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let interrupt = Arc::new(AtomicBool::new(false));
        let handle = {
            let data = data.clone();
            let interrupt = interrupt.clone();
            thread::spawn(move || worker_loop(command_rx, event_tx, data, interrupt))
        };
        let worker = LogDataWorker {
            commands: Some(command_tx),
            interrupt,
            data,
            handle: Some(handle),
        };
        (worker, event_rx)
    }

    pub fn indexing_data(&self) -> &Arc<IndexingData> {
        &self.data
    }

    /// Rebind the worker to a new file. Takes effect once the running
    /// operation (if any) has finished.
    pub fn attach_file<P: Into<PathBuf>>(&self, path: P) {
        self.send(Command::AttachFile(path.into()));
    }

    /// Start a full index, optionally under a user-forced encoding.
    pub fn index_all(&self, forced_encoding: Option<TextCodec>) {
        self.send(Command::IndexAll(forced_encoding));
    }

    /// Index the bytes appended since the last indexing pass.
    pub fn index_additional_lines(&self) {
        self.send(Command::IndexAdditionalLines);
    }

    /// Probe the file for growth or truncation without touching the index.
    pub fn check_file_changes(&self) {
        self.send(Command::CheckFileChanges);
    }

    /// Ask the running operation to stop at the next block boundary.
    /// Idempotent and non-blocking. A running change probe is not
    /// interruptible: it reads at most the hashed prefix and has no
    /// status that could report a cancelled probe.
    pub fn interrupt(&self) {
        debug!("indexing interrupt requested");
        self.interrupt.store(true, Ordering::Relaxed);
    }

    fn send(&self, command: Command) {
        if let Some(ref commands) = self.commands {
            if commands.send(command).is_err() {
                warn!("indexing worker is gone, command dropped");
            }
        }
    }
}

impl Drop for LogDataWorker {
    fn drop(&mut self) {
        self.interrupt.store(true, Ordering::Relaxed);
        // closing the channel ends the worker loop
        drop(self.commands.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("indexing worker thread panicked");
            }
        }
    }
}

fn worker_loop(
    commands: Receiver<Command>,
    events: Sender<Event>,
    data: Arc<IndexingData>,
    interrupt: Arc<AtomicBool>,
) {
    let mut attached: Option<PathBuf> = None;
    while let Ok(command) = commands.recv() {
        let operation = match command {
            Command::AttachFile(path) => {
                debug!("attaching {}", path.display());
                attached = Some(path);
                continue;
            }
            Command::IndexAll(forced_encoding) => {
                IndexOperation::Full(FullIndex { forced_encoding })
            }
            Command::IndexAdditionalLines => IndexOperation::Partial(PartialIndex),
            Command::CheckFileChanges => IndexOperation::Check(CheckFileChanges),
        };
        let outcome = run_operation(&operation, attached.as_deref(), &data, &interrupt, &events);
        let event = match outcome {
            OperationResult::Indexed(status) => Event::IndexingFinished(status),
            OperationResult::Checked(status) => Event::CheckFileChangesFinished(status),
        };
        if events.send(event).is_err() {
            // nobody is listening anymore; keep draining commands so the
            // owner's Drop can still join us cleanly
            debug!("event receiver dropped");
        }
    }
}

fn run_operation(
    operation: &IndexOperation,
    attached: Option<&std::path::Path>,
    data: &IndexingData,
    interrupt: &AtomicBool,
    events: &Sender<Event>,
) -> OperationResult {
    let path = match attached {
        Some(path) => path,
        None => {
            warn!("no file attached, operation skipped");
            return if operation.is_check() {
                OperationResult::Checked(MonitoredFileStatus::Truncated)
            } else {
                OperationResult::Indexed(LoadingStatus::Interrupted)
            };
        }
    };
    // a pending interrupt only ever targets the previous operation
    interrupt.store(false, Ordering::Relaxed);
    let mut progress = |percent: u8| {
        let _ = events.send(Event::IndexingProgressed(percent));
    };
    match operation.run(path, data, interrupt, &mut progress) {
        Ok(result) => result,
        Err(Error::OutOfMemory) => {
            warn!("indexing of {} ran out of memory", path.display());
            if operation.is_check() {
                OperationResult::Checked(MonitoredFileStatus::Truncated)
            } else {
                OperationResult::Indexed(LoadingStatus::NoMemory)
            }
        }
        Err(Error::IoError(err)) => {
            warn!("indexing of {} failed: {}", path.display(), err);
            if operation.is_check() {
                OperationResult::Checked(MonitoredFileStatus::Truncated)
            } else {
                OperationResult::Indexed(LoadingStatus::Interrupted)
            }
        }
    }
}
