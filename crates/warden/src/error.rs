use std::{io, path::PathBuf, process::ExitStatus};

use thiserror::Error;

use warden_child::ResponseKind;

/// Errors that may occur while auditing, compiling or supervising a guest
/// program.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("failed to stat `{path}`: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read `{path}`: {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: syn::Error,
    },
    #[error("imports of disallowed packages: {0}")]
    DisallowedImports(String),
    #[error("build failed: {0}")]
    Build(String),
    #[error("toolchain exited with {status}")]
    ToolchainExit { status: ExitStatus },
    #[error("toolchain `{toolchain}` could not be run: {source}")]
    Toolchain {
        toolchain: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write transient source `{path}`: {source}")]
    WriteSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("child binary `{binary}` could not be spawned: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("child stdin unavailable")]
    StdinUnavailable,
    #[error("child stdout unavailable")]
    StdoutUnavailable,
    #[error("child stderr unavailable")]
    StderrUnavailable,
    #[error("stream to child broke: {0}")]
    Stream(#[source] io::Error),
    #[error("end of stream from child")]
    EndOfStream,
    #[error("malformed frame from child: {source}")]
    Malformed {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode value for child: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("no such service: {0}")]
    NoSuchService(String),
    #[error("unexpected response type {0:?}")]
    BadResponseType(ResponseKind),
    #[error("service failed: {0}")]
    ServiceFailure(String),
}

impl WardenError {
    /// Classifies an error response received over the wire.
    ///
    /// The dispatch convention on both ends reports a lookup miss as
    /// `No such service: <name>`; everything else is a service failure.
    pub(crate) fn from_remote(message: String) -> Self {
        match message.strip_prefix("No such service: ") {
            Some(name) => WardenError::NoSuchService(name.to_string()),
            None => WardenError::ServiceFailure(message),
        }
    }
}
