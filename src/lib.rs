#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # pwlink
//!
//! A Rust library for driving PWDongle keyboard/mouse injector dongles over
//! Bluetooth Low Energy.
//!
//! The dongle speaks a newline-terminated text protocol over the Nordic UART
//! Service (NUS). The transport delivers variable-size notification fragments
//! with no end-of-message marker, so this crate provides the two pieces that
//! make the link usable in practice:
//!
//! - A **link session** that turns the unreliable, MTU-limited notify/write
//!   transport into a reliable line-oriented request/response channel, with
//!   chunk reassembly, duplicate suppression, idle-gap framing, auto-reconnect
//!   with exponential backoff and a warm credential cache.
//! - A **macro engine** that records live key/mouse events into the dongle's
//!   `{{TOKEN:ARGS}}` text format, validates macro text before playback and
//!   plays it back with scaled delays, progress reporting and cooperative
//!   cancellation.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pwlink::{BleTransport, LinkConfig, LinkSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = BleTransport::new().await?;
//!     let (session, mut status) = LinkSession::spawn(transport, LinkConfig::default());
//!
//!     tokio::spawn(async move {
//!         while let Some(msg) = status.recv().await {
//!             println!("status: {msg}");
//!         }
//!     });
//!
//!     session.connect("PWDongle").await?;
//!     session.wait_ready().await?;
//!
//!     // Press a key and type some text
//!     session.send("KEY:enter").await?;
//!     session.send("TYPE:hello from rust").await?;
//!
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy transport implementation
pub mod ble;
/// Credential warm cache
pub mod cache;
/// Outbound chunking and inbound idle-gap reassembly
pub mod chunker;
/// Error types and handling
pub mod error;
/// Macro recording, validation and playback
pub mod macros;
/// Wire command vocabulary and response parsing
pub mod protocol;
/// Link session state machine and command channel
pub mod session;
/// Transport adapter seam
pub mod transport;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use ble::BleTransport;
pub use error::{DongleError, Result};
pub use macros::{
    MacroPlayer, MacroRecorder, MacroValidator, PlaybackProgress, PlaybackSink, PlaybackSummary,
};
pub use session::{LinkSession, SessionHandle, WarmFetch};
pub use transport::{Transport, TransportEvent, WriteMode};
pub use types::{
    CredentialEntry, DeviceInfo, LinkConfig, LinkState, MacroEvent, ReconnectPolicy,
    ValidationResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Nordic UART Service UUID used by the dongle firmware
pub const NUS_SERVICE_UUID: &str = "6E400001-B5A3-F393-E0A9-E50E24DCCA9E";

/// NUS RX characteristic UUID (app-to-dongle writes)
pub const NUS_RX_CHAR_UUID: &str = "6E400002-B5A3-F393-E0A9-E50E24DCCA9E";

/// NUS TX characteristic UUID (dongle-to-app notifications)
pub const NUS_TX_CHAR_UUID: &str = "6E400003-B5A3-F393-E0A9-E50E24DCCA9E";

/// Conservative frame size every BLE peer supports before negotiation
pub const DEFAULT_FRAME_SIZE: usize = 20;

/// Largest frame size worth requesting during negotiation
pub const MAX_FRAME_REQUEST: usize = 247;
