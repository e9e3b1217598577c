use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Connection lifecycle state of a link session
///
/// Exactly one state is active at a time. `Ready` is the only state in which
/// commands may be sent. Transitions are driven solely by transport callbacks
/// and explicit API calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No connection and no attempt in progress
    Disconnected,
    /// A transport-level connect is in flight
    Connecting,
    /// Connected, waiting for service discovery to complete
    ServiceDiscovery,
    /// Connected, UART service present, notifications enabled
    Ready,
    /// Waiting out a backoff interval before the next reconnect attempt
    Reconnecting {
        /// 1-based attempt number about to run
        attempt: u32,
        /// Backoff delay before that attempt, in milliseconds
        next_delay_ms: u64,
    },
}

impl LinkState {
    /// Whether commands may be sent in this state
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether a `connect` call is valid from this state
    #[must_use]
    pub const fn can_connect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Reconnecting { .. })
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::ServiceDiscovery => write!(f, "Discovering services"),
            Self::Ready => write!(f, "Ready"),
            Self::Reconnecting {
                attempt,
                next_delay_ms,
            } => write!(f, "Reconnecting (attempt {attempt} in {next_delay_ms}ms)"),
        }
    }
}

/// Information about a discovered dongle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Advertised device name
    pub name: String,
    /// Device MAC address, when the platform exposes one
    pub mac_address: Option<String>,
    /// Signal strength (RSSI)
    pub rssi: i16,
}

impl DeviceInfo {
    /// Create new device info
    #[must_use]
    pub const fn new(name: String, rssi: i16) -> Self {
        Self {
            name,
            mac_address: None,
            rssi,
        }
    }
}

/// Auto-reconnect policy
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Whether disconnects schedule reconnect attempts
    pub enabled: bool,
    /// Maximum number of attempts before giving up
    pub max_attempts: u32,
    /// Backoff for the first attempt
    pub initial_delay: Duration,
    /// Upper bound on the doubled backoff
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Backoff delay for a 1-based attempt number: doubles from
    /// `initial_delay`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(31);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
        }
    }
}

/// Tunable parameters of a link session
///
/// The defaults match the behaviour of the dongle firmware and were arrived
/// at empirically: discovering services immediately after connect fails on
/// some peers, and back-to-back chunk writes can overrun the transport's
/// internal write queue.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Delay between the transport-level connect and service discovery
    pub settle_delay: Duration,
    /// Idle gap that terminates an inbound response
    pub idle_timeout: Duration,
    /// Window inside which an identical fragment is dropped as a duplicate
    pub duplicate_window: Duration,
    /// Pause between consecutive outbound chunks of one line
    pub chunk_pacing: Duration,
    /// Pause between the steps of a multi-step authenticated exchange
    pub step_gap: Duration,
    /// Frame size used before (and if) negotiation succeeds
    pub default_frame_size: usize,
    /// Frame size requested during negotiation
    pub requested_frame_size: usize,
    /// Scan duration when searching for dongles
    pub scan_timeout: Duration,
    /// Auto-reconnect behaviour
    pub reconnect: ReconnectPolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(600),
            idle_timeout: Duration::from_millis(1500),
            duplicate_window: Duration::from_millis(50),
            chunk_pacing: Duration::from_millis(10),
            step_gap: Duration::from_millis(10),
            default_frame_size: crate::DEFAULT_FRAME_SIZE,
            requested_frame_size: crate::MAX_FRAME_REQUEST,
            scan_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// One captured input event, in strict chronological order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacroEvent {
    /// A key press (the dongle's KEY command performs press+release)
    KeyPress {
        /// Abstracted key identifier, e.g. `enter`, `a`, `f1`
        name: String,
    },
    /// Pointer move; the recorder is agnostic to absolute vs. delta coordinates
    MouseMove {
        /// Horizontal coordinate or delta
        x: i32,
        /// Vertical coordinate or delta
        y: i32,
    },
    /// Pointer button transition
    MouseButton {
        /// Button name, e.g. `LEFT`
        name: String,
        /// True for press, false for release
        is_down: bool,
    },
    /// Vertical scroll
    MouseScroll {
        /// Scroll amount, sign gives direction
        amount: i32,
    },
    /// Horizontal scroll
    MouseHScroll {
        /// Scroll amount, sign gives direction
        amount: i32,
    },
    /// Explicit wait covering a silent period during recording
    Delay {
        /// Gap length in milliseconds
        ms: u64,
    },
}

impl MacroEvent {
    /// Serialize the event to its `{{TOKEN:ARGS}}` line
    #[must_use]
    pub fn to_line(&self) -> String {
        match self {
            Self::KeyPress { name } => format!("{{{{KEY:{name}}}}}"),
            Self::MouseMove { x, y } => format!("{{{{MOUSE:MOVE:{x},{y}}}}}"),
            Self::MouseButton { name, is_down } => {
                let action = if *is_down { "DOWN" } else { "UP" };
                format!("{{{{MOUSE:{action}:{name}}}}}")
            }
            Self::MouseScroll { amount } => format!("{{{{MOUSE:SCROLL:{amount}}}}}"),
            Self::MouseHScroll { amount } => format!("{{{{MOUSE:HSCROLL:{amount}}}}}"),
            Self::Delay { ms } => format!("{{{{DELAY:{ms}}}}}"),
        }
    }
}

/// Outcome of statically checking a macro text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True iff `errors` is empty; warnings never block playback
    pub is_valid: bool,
    /// Conditions that block playback (overridable by explicit confirmation)
    pub errors: Vec<String>,
    /// Advisory findings
    pub warnings: Vec<String>,
    /// Estimated playback duration before speed scaling, in milliseconds
    pub estimated_duration_ms: u64,
    /// Number of recognized commands
    pub command_count: usize,
    /// Whether any single delay exceeds ten seconds
    pub has_long_delays: bool,
}

/// One stored credential record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEntry {
    /// System or account name; must not contain commas
    pub name: String,
    /// Stored password
    pub password: String,
}

impl CredentialEntry {
    /// Create a new entry
    ///
    /// # Errors
    ///
    /// Returns [`crate::DongleError::InvalidParameters`] if the name is empty
    /// or contains a comma, which would corrupt the CSV wire encoding.
    pub fn new(name: &str, password: &str) -> crate::Result<Self> {
        if name.is_empty() {
            return Err(crate::DongleError::InvalidParameters(
                "credential name must not be empty".to_string(),
            ));
        }
        if name.contains(',') {
            return Err(crate::DongleError::InvalidParameters(
                "credential name must not contain commas".to_string(),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            password: password.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_state_predicates() {
        assert!(LinkState::Ready.is_ready());
        assert!(!LinkState::Connecting.is_ready());

        assert!(LinkState::Disconnected.can_connect());
        assert!(LinkState::Reconnecting {
            attempt: 2,
            next_delay_ms: 2000
        }
        .can_connect());
        assert!(!LinkState::Ready.can_connect());
        assert!(!LinkState::ServiceDiscovery.can_connect());
    }

    #[test]
    fn test_backoff_sequence() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=5)
            .map(|n| policy.delay_for_attempt(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);

        // The cap holds past the configured maximum attempt count too.
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(16));
    }

    #[test]
    fn test_macro_event_lines() {
        assert_eq!(
            MacroEvent::KeyPress {
                name: "enter".to_string()
            }
            .to_line(),
            "{{KEY:enter}}"
        );
        assert_eq!(
            MacroEvent::MouseMove { x: 10, y: -3 }.to_line(),
            "{{MOUSE:MOVE:10,-3}}"
        );
        assert_eq!(
            MacroEvent::MouseButton {
                name: "LEFT".to_string(),
                is_down: true
            }
            .to_line(),
            "{{MOUSE:DOWN:LEFT}}"
        );
        assert_eq!(MacroEvent::Delay { ms: 250 }.to_line(), "{{DELAY:250}}");
    }

    #[test]
    fn test_credential_entry_validation() {
        assert!(CredentialEntry::new("github", "hunter2").is_ok());
        assert!(CredentialEntry::new("", "x").is_err());
        assert!(CredentialEntry::new("a,b", "x").is_err());
    }

    #[test]
    fn test_link_config_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.settle_delay, Duration::from_millis(600));
        assert_eq!(config.idle_timeout, Duration::from_millis(1500));
        assert_eq!(config.duplicate_window, Duration::from_millis(50));
        assert_eq!(config.default_frame_size, 20);
        assert_eq!(config.requested_frame_size, 247);
        assert_eq!(config.reconnect.max_attempts, 5);
    }
}
