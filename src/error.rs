use std::path::PathBuf;

use thiserror::Error;

use crate::fragment::FragmentId;

/// Errors raised by the infrastructure around the label propagation engine.
///
/// The propagation itself is infallible. Everything that feeds it (graph files,
/// configuration, the message transport, the worker threads) reports through
/// this enum.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WCCError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Graph file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Graph format error at line {line}: {message}")]
    GraphFormat { line: usize, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("Message encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("Unknown partitioner: {name}")]
    UnknownPartitioner { name: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Worker of fragment {fid} panicked")]
    WorkerPanicked { fid: FragmentId },

    #[error("Channel closed: {message}")]
    ChannelClosed { message: String },

    #[error("Fragment {fid} received a message for vertex {gid} it does not own")]
    UnknownVertex { fid: FragmentId, gid: u64 },

    #[error("No convergence within {limit} supersteps")]
    SuperstepLimit { limit: u64 },
}

pub type Result<T> = std::result::Result<T, WCCError>;
