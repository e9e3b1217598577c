use thiserror::Error;

/// Errors that can occur when working with a PWDongle link
#[derive(Error, Debug)]
pub enum DongleError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Dongle not found during scanning
    #[error("PWDongle device not found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// Device disconnected unexpectedly
    #[error("Device disconnected")]
    Disconnected,

    /// The link is not in the `Ready` state
    #[error("Link not ready: {reason}")]
    NotReady {
        /// Reason why the link cannot carry commands
        reason: String,
    },

    /// The required UART service was not present after discovery
    #[error("UART service not found on peer")]
    ServiceMissing,

    /// A pending response was superseded by a later request
    #[error("Request superseded by a later request on the same channel")]
    Superseded,

    /// An OK-gated exchange step was refused by the device
    #[error("Device refused gated step: {0}")]
    GateRefused(String),

    /// PIN is not exactly four ASCII digits
    #[error("Invalid PIN: must be exactly 4 digits")]
    InvalidPin,

    /// Invalid call arguments
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Macro text failed validation
    #[error("Macro validation failed: {0}")]
    Validation(String),

    /// Macro playback aborted by a failed command
    #[error("Playback error: {0}")]
    Playback(String),

    /// The session actor is gone
    #[error("Link session closed")]
    SessionClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for PWDongle operations
pub type Result<T> = std::result::Result<T, DongleError>;

impl DongleError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::ConnectionFailed(_)
                | Self::Disconnected
                | Self::DeviceNotFound
                | Self::ServiceMissing
        )
    }

    /// Check if this error is recoverable by retrying the call
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotReady { .. } | Self::Superseded | Self::InvalidParameters(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let connection_error = DongleError::ConnectionFailed("test".to_string());
        assert!(connection_error.is_connection_error());
        assert!(!connection_error.is_recoverable());

        let not_ready = DongleError::NotReady {
            reason: "disconnected".to_string(),
        };
        assert!(!not_ready.is_connection_error());
        assert!(not_ready.is_recoverable());

        let superseded = DongleError::Superseded;
        assert!(!superseded.is_connection_error());
        assert!(superseded.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = DongleError::GateRefused("ERROR: wrong PIN".to_string());
        let error_string = format!("{error}");
        assert!(error_string.contains("refused gated step"));
        assert!(error_string.contains("wrong PIN"));

        let error = DongleError::NotReady {
            reason: "link is Connecting".to_string(),
        };
        assert!(format!("{error}").contains("Connecting"));
    }
}
