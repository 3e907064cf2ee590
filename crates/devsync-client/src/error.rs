//! Client error taxonomy.

use crate::transport::TransportError;
use devsync_proto::MessageError;

/// Errors surfaced to users of the client engine.
///
/// Correlation timeouts are not errors; they come back as an absent
/// response (`Ok(None)`) so the caller decides whether to retry.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Malformed message on the wire or during encoding
    #[error("protocol error: {0}")]
    Protocol(#[from] MessageError),
    /// Non-transient transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Operation requires a managed session
    #[error("session is not managed")]
    NotManaged,
    /// The session runtime has shut down
    #[error("session is shut down")]
    ShutDown,
}
