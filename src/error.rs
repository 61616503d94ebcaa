use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the media flow engine.
///
/// The variants follow the errno vocabulary of the wire protocol work this
/// engine interoperates with: protocol violations map to `EPROTO`, a failed
/// fingerprint check to `EAUTH`, the RTP liveness timeout to `ETIMEDOUT`,
/// and a send attempted before the flow is ready to `EINTR`.
#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid argument")]
    ErrInvalidArgument,
    #[error("protocol violation")]
    ErrProtocolViolation,
    #[error("remote fingerprint verification failed")]
    ErrAuthFailure,
    #[error("rtp timeout")]
    ErrTimeout,
    #[error("ice transport not connected")]
    ErrNotConnected,
    #[error("media-stream is not ready")]
    ErrNotReady,
    #[error("not supported")]
    ErrNotSupported,
    #[error("destination unreachable")]
    ErrUnreachable,
    #[error("duplicate packet")]
    ErrDuplicate,
    #[error("invalid sdp state for this operation")]
    ErrInvalidSdpState,
    #[error("no common crypto")]
    ErrNoCommonCrypto,
    #[error("flow is terminated")]
    ErrTerminated,
    #[error("internal error")]
    ErrInternal,

    #[error("{0}")]
    Shared(#[from] shared::error::Error),
    #[error("{0}")]
    Other(String),
}
