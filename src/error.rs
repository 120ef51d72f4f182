use thiserror::Error;

use crate::storage::StorageError;
use crate::transport::TransportError;

/// Error surfaced by the client façade and the read cache.
///
/// Connectivity failures usually never get here: reads fall back to the
/// cache and writes are queued. What remains is local storage failure
/// (always fatal to the call) and transport failures that are not
/// recoverable locally.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ClientError {
    /// Whether local persistence failed.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
