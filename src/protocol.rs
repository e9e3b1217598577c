//! Wire command vocabulary and response parsing.
//!
//! Every command is a newline-terminated text line; the terminator is added
//! by the chunker, not here. Multi-step authenticated exchanges (RETRIEVEPW,
//! CHANGELOGIN, PWUPDATE) are strictly sequential and stateful on the device
//! side: each step must return its `OK` gate before the next is sent.

use crate::types::CredentialEntry;
use std::fmt;

/// A command the dongle understands, in typed form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start device-side recording into the named file
    Record(String),
    /// Stop device-side recording
    StopRecord,
    /// Single key press+release
    Key(String),
    /// Absolute pointer move
    MouseMove(i32, i32),
    /// Relative pointer move
    MouseMoveRel(i32, i32),
    /// Press a pointer button
    MouseDown(String),
    /// Release a pointer button
    MouseUp(String),
    /// Vertical scroll
    MouseScroll(i32),
    /// Horizontal scroll
    MouseHScroll(i32),
    /// Move the pointer to its known origin
    MouseReset,
    /// Type literal text
    Type(String),
    /// Request the device macro file listing
    List,
    /// Play a device-stored macro
    Play(String),
    /// Retrieve the content of a device-stored macro
    View(String),
    /// First step of the credential read exchange
    RetrievePw,
    /// First step of the PIN change exchange
    ChangeLogin,
    /// First step of the credential overwrite exchange
    PwUpdate,
}

impl Command {
    /// The exact wire string for this command (without the terminator)
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Record(name) => format!("RECORD:{name}"),
            Self::StopRecord => "STOPRECORD".to_string(),
            Self::Key(name) => format!("KEY:{name}"),
            Self::MouseMove(x, y) => format!("MOUSE:MOVE:{x},{y}"),
            Self::MouseMoveRel(dx, dy) => format!("MOUSE:MOVE_REL:{dx},{dy}"),
            Self::MouseDown(button) => format!("MOUSE:DOWN:{button}"),
            Self::MouseUp(button) => format!("MOUSE:UP:{button}"),
            Self::MouseScroll(n) => format!("MOUSE:SCROLL:{n}"),
            Self::MouseHScroll(n) => format!("MOUSE:HSCROLL:{n}"),
            Self::MouseReset => "MOUSE:RESET".to_string(),
            Self::Type(text) => format!("TYPE:{text}"),
            Self::List => "LIST".to_string(),
            Self::Play(name) => format!("PLAY:{name}"),
            Self::View(name) => format!("VIEW:{name}"),
            Self::RetrievePw => "RETRIEVEPW".to_string(),
            Self::ChangeLogin => "CHANGELOGIN".to_string(),
            Self::PwUpdate => "PWUPDATE".to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Whether a response passes the OK gate of a multi-step exchange.
///
/// The firmware is loose about response decoration, so this is a
/// case-insensitive substring check rather than a prefix match.
#[must_use]
pub fn is_ok(response: &str) -> bool {
    response.to_ascii_lowercase().contains("ok")
}

/// Parse a `LIST` response into filenames.
///
/// The device answers with numbered lines (`N. name`); bare names get a
/// `.txt` suffix here as a display convention, the wire itself carries none.
#[must_use]
pub fn parse_file_listing(response: &str) -> Vec<String> {
    let mut files = Vec::new();
    for line in response.lines() {
        let trimmed = line.trim();
        let Some((number, rest)) = trimmed.split_once('.') else {
            continue;
        };
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let name = rest.trim();
        if name.is_empty() {
            continue;
        }
        if name.ends_with(".txt") {
            files.push(name.to_string());
        } else {
            files.push(format!("{name}.txt"));
        }
    }
    files
}

/// Parse the credential payload of a successful RETRIEVEPW exchange.
///
/// Lines that are not a `name,password` pair (status decoration, error
/// tokens) are skipped.
#[must_use]
pub fn parse_credential_csv(payload: &str) -> Vec<CredentialEntry> {
    payload
        .lines()
        .filter_map(|line| {
            let (name, password) = line.trim().split_once(',')?;
            CredentialEntry::new(name.trim(), password).ok()
        })
        .collect()
}

/// Encode credential entries as the PWUPDATE payload step.
///
/// An empty set is encoded as a single space: the device requires a
/// non-empty payload to parse successfully.
#[must_use]
pub fn encode_credential_csv(entries: &[CredentialEntry]) -> String {
    if entries.is_empty() {
        return " ".to_string();
    }
    entries
        .iter()
        .map(|e| format!("{},{}", e.name, e.password))
        .collect::<Vec<_>>()
        .join("\n")
}
