use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to build or drive a process pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline has no commands")]
    Empty,

    #[error("failed to start '{program}'")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("pipeline I/O error")]
    Io(#[from] io::Error),
}

/// Failure of a tail session before any output was produced
#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to list rotated logs in {dir}")]
    Rotated {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Failure of the log store client
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("log store unavailable: {0}")]
    Unavailable(String),

    #[error("log store rejected query: {0}")]
    Query(String),

    #[error("failed to write query results")]
    Write(#[from] io::Error),
}
