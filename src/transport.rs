//! Transport adapter seam.
//!
//! The link session is transport-agnostic: anything that can exchange opaque
//! byte frames with a connected peer and surface connect/disconnect and
//! notification events can carry the protocol. [`crate::BleTransport`] is the
//! production implementation; tests drive the session through a mock.

use crate::{error::Result, types::DeviceInfo};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Write acknowledgement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Transport-level acknowledged write
    Acknowledged,
    /// Fire-and-forget write for real-time control streams
    Unacknowledged,
}

/// What service discovery found on the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceProfile {
    /// Whether the UART service the protocol requires is present
    pub has_uart: bool,
}

/// Asynchronous events delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport-level connection is established
    Connected,
    /// The connection dropped; `reason` is a human-readable description
    Disconnected {
        /// Why the transport reports the link went down
        reason: String,
    },
    /// One inbound notification fragment
    Notification(Vec<u8>),
}

/// Capability contract the link session consumes.
///
/// Implementations must deliver events for one connection in order; the
/// session serializes all processing onto a single task.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Scan for dongles for the given duration
    async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceInfo>>;

    /// Start connecting to a device by identity (name or address).
    /// Completion is signalled by [`TransportEvent::Connected`].
    async fn connect(&self, id: &str) -> Result<()>;

    /// Tear the connection down
    async fn disconnect(&self) -> Result<()>;

    /// Discover services on the connected peer
    async fn discover_services(&self) -> Result<ServiceProfile>;

    /// Request a larger frame size; returns the granted size
    async fn negotiate_frame_size(&self, requested: usize) -> Result<usize>;

    /// Enable inbound notifications
    async fn subscribe_notifications(&self) -> Result<()>;

    /// Write one frame of at most the current frame size
    async fn write(&self, bytes: &[u8], mode: WriteMode) -> Result<()>;

    /// Take the event receiver. Yields `None` after the first call; the
    /// session is the sole consumer.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;
}

#[async_trait]
impl<T: Transport> Transport for std::sync::Arc<T> {
    async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceInfo>> {
        (**self).scan(timeout).await
    }

    async fn connect(&self, id: &str) -> Result<()> {
        (**self).connect(id).await
    }

    async fn disconnect(&self) -> Result<()> {
        (**self).disconnect().await
    }

    async fn discover_services(&self) -> Result<ServiceProfile> {
        (**self).discover_services().await
    }

    async fn negotiate_frame_size(&self, requested: usize) -> Result<usize> {
        (**self).negotiate_frame_size(requested).await
    }

    async fn subscribe_notifications(&self) -> Result<()> {
        (**self).subscribe_notifications().await
    }

    async fn write(&self, bytes: &[u8], mode: WriteMode) -> Result<()> {
        (**self).write(bytes, mode).await
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        (**self).take_events()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport for session tests: scripted service profiles,
    //! captured writes, and a handle for injecting events.

    use super::{ServiceProfile, Transport, TransportEvent, WriteMode};
    use crate::{error::Result, types::DeviceInfo, DongleError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// One captured outbound frame
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct WrittenFrame {
        pub bytes: Vec<u8>,
        pub mode: WriteMode,
    }

    pub struct MockTransport {
        events_tx: mpsc::UnboundedSender<TransportEvent>,
        events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
        pub writes: Mutex<Vec<WrittenFrame>>,
        pub connects: Mutex<Vec<String>>,
        pub profile: Mutex<ServiceProfile>,
        pub granted_frame_size: Mutex<Option<usize>>,
        pub auto_connect_event: bool,
        pub fail_connects: Mutex<bool>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            Self {
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                writes: Mutex::new(Vec::new()),
                connects: Mutex::new(Vec::new()),
                profile: Mutex::new(ServiceProfile { has_uart: true }),
                granted_frame_size: Mutex::new(Some(247)),
                auto_connect_event: true,
                fail_connects: Mutex::new(false),
            }
        }

        pub fn push(&self, event: TransportEvent) {
            self.events_tx.send(event).expect("session event loop gone");
        }

        pub fn written_lines(&self) -> Vec<String> {
            // Reconstruct the newline-terminated lines from captured frames.
            let raw: Vec<u8> = self
                .writes
                .lock()
                .unwrap()
                .iter()
                .flat_map(|f| f.bytes.clone())
                .collect();
            String::from_utf8_lossy(&raw)
                .split_terminator('\n')
                .map(str::to_string)
                .collect()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn scan(&self, _timeout: Duration) -> Result<Vec<DeviceInfo>> {
            Ok(vec![DeviceInfo::new("PWDongle".to_string(), -40)])
        }

        async fn connect(&self, id: &str) -> Result<()> {
            self.connects.lock().unwrap().push(id.to_string());
            if *self.fail_connects.lock().unwrap() {
                return Err(DongleError::ConnectionFailed("peer unreachable".to_string()));
            }
            if self.auto_connect_event {
                self.push(TransportEvent::Connected);
            }
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn discover_services(&self) -> Result<ServiceProfile> {
            Ok(*self.profile.lock().unwrap())
        }

        async fn negotiate_frame_size(&self, _requested: usize) -> Result<usize> {
            self.granted_frame_size
                .lock()
                .unwrap()
                .ok_or_else(|| DongleError::Protocol("frame negotiation refused".to_string()))
        }

        async fn subscribe_notifications(&self) -> Result<()> {
            Ok(())
        }

        async fn write(&self, bytes: &[u8], mode: WriteMode) -> Result<()> {
            self.writes.lock().unwrap().push(WrittenFrame {
                bytes: bytes.to_vec(),
                mode,
            });
            Ok(())
        }

        fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
            self.events_rx.lock().unwrap().take()
        }
    }
}
