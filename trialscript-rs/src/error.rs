//! Crate-level error type used by the binary.

use std::io;
use std::path::PathBuf;

use crate::loop_item::LoopError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no loop named {0}")]
    NoSuchLoop(String),
    #[error("experiment defines no loop items")]
    NoLoop,
    #[error(transparent)]
    Loop(#[from] LoopError),
}

pub type Result<T> = std::result::Result<T, Error>;
