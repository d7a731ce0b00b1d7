use std::io;

use thiserror::Error;

use crate::ResponseKind;

/// Errors surfaced to a child program while talking to its host.
#[derive(Debug, Error)]
pub enum ChildError {
    #[error("failed to read from stdin: {0}")]
    Read(#[source] io::Error),
    #[error("failed to write to stdout: {0}")]
    Write(#[source] io::Error),
    #[error("JSON codec failure: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("host closed the stream mid-callback")]
    EndOfStream,
    #[error("callback failed on the host: {0}")]
    Remote(String),
    #[error("callback reply arrived with unexpected type {0:?}")]
    BadResponseType(ResponseKind),
}
