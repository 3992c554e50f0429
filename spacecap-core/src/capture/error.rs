use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type CaptureResult<T> = Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("muxer binary {binary:?} is not available: {detail}")]
    MuxerUnavailable { binary: String, detail: String },
    #[error("{stage} capture job {outcome}")]
    JobFailed { stage: String, outcome: String },
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

impl CaptureError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| CaptureError::Io { source, path }
    }
}
