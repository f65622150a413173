use thiserror::Error;

/// Errors reported by a [`Tracker`](super::Tracker) implementation.
///
/// Tracker failures are never fatal to a transfer; the announce loop logs
/// them and tries again on the next interval.
#[derive(Debug, Clone, Error)]
pub enum TrackerError {
    #[error("tracker unreachable: {0}")]
    Unreachable(String),

    #[error("tracker rejected announce: {0}")]
    Rejected(String),
}
