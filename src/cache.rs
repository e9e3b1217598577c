//! Credential warm cache.
//!
//! Keeps the last successfully authenticated PIN and the raw payload it
//! unlocked, so repeated credential reads can render instantly while a live
//! refresh reconciles with the device in the background. The cache lives for
//! the lifetime of one link session and is never persisted.

use std::sync::Mutex;

#[derive(Debug, Default)]
struct Slot {
    pin: Option<String>,
    payload: Option<String>,
}

/// Process-lifetime cache of the last authenticated credential payload.
///
/// Invariant: `pin` and `payload` are set together or cleared together,
/// never one without the other. Updates are atomic pair replacements, which
/// makes concurrent reads safe.
#[derive(Debug, Default)]
pub struct CredentialCache {
    slot: Mutex<Slot>,
}

impl CredentialCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached pair
    pub fn store(&self, pin: &str, payload: &str) {
        let mut slot = self.slot.lock().unwrap();
        slot.pin = Some(pin.to_string());
        slot.payload = Some(payload.to_string());
    }

    /// The cached payload, if it was unlocked by this exact PIN
    #[must_use]
    pub fn lookup(&self, pin: &str) -> Option<String> {
        let slot = self.slot.lock().unwrap();
        match (&slot.pin, &slot.payload) {
            (Some(cached_pin), Some(payload)) if cached_pin == pin => Some(payload.clone()),
            _ => None,
        }
    }

    /// Whether a pair is cached at all
    #[must_use]
    pub fn is_warm(&self) -> bool {
        let slot = self.slot.lock().unwrap();
        slot.pin.is_some() && slot.payload.is_some()
    }

    /// Drop both fields
    pub fn clear(&self) {
        let mut slot = self.slot.lock().unwrap();
        slot.pin = None;
        slot.payload = None;
    }
}

/// Whether a PIN has the exact shape the device accepts: four ASCII digits
#[must_use]
pub fn is_valid_pin(pin: &str) -> bool {
    pin.len() == 4 && pin.chars().all(|c| c.is_ascii_digit())
}
