//! Error kinds surfaced by the sync client

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("path too long: {len} bytes (max {max})")]
    PathTooLong { len: usize, max: usize },

    /// Host-side filesystem failure, with the path that caused it.
    #[error("'{path}': {source}")]
    Local {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Short read/write or other failure on the transport stream.
    #[error("stream error: {0}")]
    Stream(#[from] std::io::Error),

    /// The peer sent a frame we did not expect here.
    #[error("protocol error: expected {expected}, got {got}")]
    Protocol {
        expected: &'static str,
        got: String,
    },

    /// A declared length field exceeds its protocol bound.
    #[error("{what} length {len} exceeds limit {max}")]
    Oversize {
        what: &'static str,
        len: u32,
        max: u32,
    },

    /// The peer answered a transfer with FAIL; the message is verbatim.
    #[error("failed to copy '{from}' to '{to}': {msg}")]
    CopyFailed {
        from: String,
        to: String,
        msg: String,
    },

    #[error("'{path}' has unsupported mode 0o{mode:o}")]
    UnsupportedMode { path: String, mode: u32 },

    #[error("target '{0}' is not a directory")]
    NotADirectory(String),

    #[error("remote object '{0}' does not exist")]
    RemoteNotFound(String),

    #[error("empty path")]
    EmptyPath,
}

impl SyncError {
    pub(crate) fn local(path: &str, source: std::io::Error) -> Self {
        SyncError::Local {
            path: path.to_string(),
            source,
        }
    }

    pub(crate) fn unexpected(expected: &'static str, got: u32) -> Self {
        SyncError::Protocol {
            expected,
            got: crate::protocol::tag_name(got),
        }
    }
}
