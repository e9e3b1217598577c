//! Splitting outbound lines into transport-sized chunks and reassembling
//! inbound notification fragments into complete responses.
//!
//! The dongle firmware streams responses as a run of notify fragments with no
//! end-of-message marker, so the only reliable framing signal is an idle gap:
//! once no new fragment has arrived for [`Reassembler`]'s idle timeout, the
//! accumulated buffer is one complete response.

use bytes::Bytes;
use std::time::{Duration, Instant};
use tracing::debug;

/// Split a line into ordered chunks of at most `frame_size` bytes.
///
/// A `\n` terminator is appended to the line before splitting; byte order is
/// preserved across chunks. `frame_size` must be at least 1.
#[must_use]
pub fn chunk(line: &str, frame_size: usize) -> Vec<Bytes> {
    assert!(frame_size >= 1, "frame size must be at least 1");

    let mut data = line.as_bytes().to_vec();
    data.push(b'\n');

    data.chunks(frame_size)
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Accumulates inbound fragments into one response using idle-gap framing.
///
/// Duplicate protection: some platforms deliver the same notification twice
/// in quick succession. An exact byte-for-byte duplicate of the previous
/// fragment arriving within the duplicate window is dropped.
#[derive(Debug)]
pub struct Reassembler {
    buffer: Vec<u8>,
    last_fragment: Vec<u8>,
    last_accepted: Option<Instant>,
    idle_timeout: Duration,
    duplicate_window: Duration,
}

impl Reassembler {
    /// Create a reassembler with the given idle timeout and duplicate window
    #[must_use]
    pub const fn new(idle_timeout: Duration, duplicate_window: Duration) -> Self {
        Self {
            buffer: Vec::new(),
            last_fragment: Vec::new(),
            last_accepted: None,
            idle_timeout,
            duplicate_window,
        }
    }

    /// Append a fragment to the buffer, resetting the idle deadline.
    ///
    /// Returns `false` when the fragment was suppressed as a duplicate.
    pub fn accept(&mut self, fragment: &[u8], now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if fragment == self.last_fragment.as_slice()
                && now.duration_since(last) < self.duplicate_window
            {
                debug!("duplicate fragment ignored ({} bytes)", fragment.len());
                return false;
            }
        }

        self.buffer.extend_from_slice(fragment);
        self.last_fragment = fragment.to_vec();
        self.last_accepted = Some(now);
        true
    }

    /// When the idle deadline should fire, or `None` if nothing is buffered
    #[must_use]
    pub fn idle_deadline(&self) -> Option<Instant> {
        if self.buffer.is_empty() {
            None
        } else {
            self.last_accepted.map(|t| t + self.idle_timeout)
        }
    }

    /// Deliver the buffered response if the idle gap has elapsed.
    ///
    /// Non-UTF-8 bytes are replaced rather than dropped; the firmware only
    /// ever emits ASCII but a corrupted fragment must not wedge the channel.
    pub fn take_if_idle(&mut self, now: Instant) -> Option<String> {
        let deadline = self.idle_deadline()?;
        if now < deadline {
            return None;
        }
        let completed = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        debug!("response finalized ({} bytes)", completed.len());
        Some(completed)
    }

    /// Whether any fragment is waiting for its idle gap
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Drop buffered bytes but keep duplicate-tracking state.
    ///
    /// Used when a new request supersedes a pending one: the stale partial
    /// response is discarded, yet a duplicated fragment straddling the
    /// boundary must still be recognized.
    pub fn discard_partial(&mut self) {
        self.buffer.clear();
    }

    /// Drop the buffer and duplicate-tracking state
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_fragment.clear();
        self.last_accepted = None;
    }
}
