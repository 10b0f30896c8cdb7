use thiserror::Error;

use crate::board::ApiReturn;

/// Driver-level error taxonomy.
///
/// Configuration problems are reported at configure time and never clamped
/// away; a buffer-completion timeout is fatal to the running acquisition and
/// is surfaced as-is so the caller can decide whether to re-issue the
/// measurement.
#[derive(Debug, Error)]
pub enum DaqError {
    #[error("configuration rejected: {0}")]
    ConfigurationRejected(String),

    #[error("acquisition timed out waiting for buffer {buffer_index} after {timeout_ms} ms")]
    AcquisitionTimeout { buffer_index: usize, timeout_ms: u64 },

    #[error("board api error: {0}")]
    Board(ApiReturn),

    #[error("acquisition cancelled")]
    Cancelled,

    #[error("scpi transport: {0}")]
    Scpi(String),

    #[error("config file: {0}")]
    ConfigFile(#[from] confique::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ApiReturn> for DaqError {
    fn from(ret: ApiReturn) -> Self {
        DaqError::Board(ret)
    }
}
