/// Errors the SDK surfaces to its caller.
///
/// Per the propagation policy: only initialization failures are returned
/// from an API call. Everything a background task encounters after that
/// (a dropped connection, a watch formatter that panicked, a value over the
/// size cap) is recorded and reported to the monitor on its own stream,
/// never propagated back into the caller's control flow.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("outrig is already initialized")]
    AlreadyInitialized,

    #[error("no configured connect address was reachable")]
    ConnectAddrsExhausted,

    #[error("monitor rejected this SDK version: {0}")]
    HandshakeIncompatible(String),

    #[error("handshake protocol error: {0}")]
    HandshakeProtocol(#[from] outrig_wire::Error),

    #[error("a watch named {0:?} is already registered")]
    RegistrationDuplicateName(String),

    #[error("{0:?} is not a valid watch name")]
    RegistrationInvalidName(String),

    #[error("platform does not support this capture path")]
    Unsupported,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
