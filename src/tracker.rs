//! Tracker collaborator interface.
//!
//! The engine does not speak any tracker protocol itself. A [`Tracker`]
//! turns announces into peer endpoints and a re-announce interval; the
//! torrent drives the announce loop.

mod announce;
mod error;
mod fixed;

pub use announce::{AnnounceRequest, AnnounceResponse, Tracker, TrackerEvent};
pub use error::TrackerError;
pub use fixed::StaticTracker;

#[cfg(test)]
mod tests;
