use std::io;
use thiserror::Error;

use crate::flash::FlashError;

/// Every failure the restore path can produce.
///
/// `Empty`, `Offset` and record-level `Corrupt` values are absorbed by the
/// area scanner; everything else reaching [`crate::restore`] aborts the mount.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("flash hardware error: {0}")]
    Hardware(#[from] FlashError),
    #[error("file system corrupt: {0}")]
    Corrupt(String),
    #[error("erased flash")]
    Empty,
    #[error("read past end of area")]
    Offset,
    #[error("object pool exhausted")]
    NoMem,
    #[error("not found")]
    NotFound,
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error("no area has room for the record")]
    Full,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        FsError::Corrupt(msg.into())
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, FsError::Corrupt(_))
    }
}

pub type Result<T, E = FsError> = std::result::Result<T, E>;
