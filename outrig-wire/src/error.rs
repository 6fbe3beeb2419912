/// Errors that can arise while decoding or validating wire-format data.
///
/// This crate has no transport of its own, so these are the subset of
/// `outrig_sdk::Error` that make sense to produce purely from bytes on the
/// wire: malformed JSON, a version string that won't parse, or a packet
/// whose shape doesn't match its declared kind.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed packet: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid version string: {0:?}")]
    InvalidVersion(String),

    #[error("unrecognized packet kind: {0:?}")]
    UnknownPacketKind(String),
}
