pub mod data;
pub mod ops;
pub mod worker;

use index_units::linepos;
use std::{error, fmt, io, result};

pub use crate::data::{IndexSnapshot, IndexingData};
pub use crate::ops::{
    CheckFileChanges, FullIndex, IndexOperation, LoadingStatus, MonitoredFileStatus,
    OperationResult, PartialIndex,
};
pub use crate::worker::{Event, LogDataWorker};

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    OutOfMemory,
}
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e)
    }
}
impl From<linepos::Error> for Error {
    fn from(e: linepos::Error) -> Self {
        match e {
            linepos::Error::OutOfMemory => Error::OutOfMemory,
        }
    }
}
impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::OutOfMemory
    }
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IoError(_) => write!(f, "I/O Error"),
            Error::OutOfMemory => write!(f, "indexing allocation failed"),
        }
    }
}
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IoError(ref err) => Some(err),
            Error::OutOfMemory => None,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
