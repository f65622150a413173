//! Transfer statistics.
//!
//! [`TransferMonitor`] holds purely additive byte counters shared by the
//! disk engine and the peer sessions. [`RateWindow`] measures a sliding
//! transfer rate for one session and feeds the choker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::constants::RATE_CALC_WINDOW;

/// Byte counters for one transfer.
#[derive(Debug, Default)]
pub struct TransferMonitor {
    sent: AtomicU64,
    received: AtomicU64,
    read: AtomicU64,
    written: AtomicU64,
}

/// A point-in-time copy of a [`TransferMonitor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSnapshot {
    /// Block payload bytes uploaded to peers.
    pub sent: u64,
    /// Block payload bytes downloaded from peers.
    pub received: u64,
    /// Bytes read from disk.
    pub read: u64,
    /// Bytes written to disk.
    pub written: u64,
}

impl TransferMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sent(&self, bytes: u64) {
        self.sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_received(&self, bytes: u64) {
        self.received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_read(&self, bytes: u64) {
        self.read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_written(&self, bytes: u64) {
        self.written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            read: self.read.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
        }
    }
}

/// Sliding-window transfer rate.
#[derive(Debug, Clone)]
pub struct RateWindow {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
    in_window: u64,
    total: u64,
}

impl RateWindow {
    pub fn new() -> Self {
        Self::with_window(RATE_CALC_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            in_window: 0,
            total: 0,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    fn record_at(&mut self, now: Instant, bytes: u64) {
        self.samples.push_back((now, bytes));
        self.in_window += bytes;
        self.total += bytes;
        self.expire(now);
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&(at, bytes)) = self.samples.front() {
            if now.duration_since(at) <= self.window {
                break;
            }
            self.samples.pop_front();
            self.in_window -= bytes;
        }
    }

    /// Bytes per second over the window.
    pub fn rate(&mut self) -> f64 {
        self.expire(Instant::now());
        self.in_window as f64 / self.window.as_secs_f64()
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new()
    }
}
