//! Macro recording, validation and playback.
//!
//! Macros are plain text, one command per line, in the dongle's
//! `{{TOKEN:ARGS}}` bracket format. The validator additionally recognizes
//! DuckyScript-style keyword lines and an advanced scripting dialect, so
//! files authored for other injector tools can be sanity-checked before
//! playback.

mod player;
mod recorder;
mod validator;

pub use player::{MacroPlayer, PlaybackProgress, PlaybackSink, PlaybackSummary};
pub use recorder::MacroRecorder;
pub use validator::{classify, Dialect, MacroValidator};

/// Extract the first `{{TOKEN:ARGS}}` unit from a line.
///
/// The token must be one or more ASCII uppercase letters; a line without a
/// well-formed token yields `None` and is played back as literal text.
pub(crate) fn parse_token(line: &str) -> Option<(&str, &str)> {
    let start = line.find("{{")?;
    let rest = &line[start + 2..];
    let inner = &rest[..rest.find("}}")?];
    let (token, args) = inner.split_once(':').unwrap_or((inner, ""));
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    Some((token, args))
}

#[cfg(test)]
mod tests {
    use super::parse_token;

    #[test]
    fn test_parse_token() {
        assert_eq!(parse_token("{{DELAY:100}}"), Some(("DELAY", "100")));
        assert_eq!(parse_token("{{MOUSE:RESET}}"), Some(("MOUSE", "RESET")));
        assert_eq!(parse_token("{{MOUSE:MOVE:10,20}}"), Some(("MOUSE", "MOVE:10,20")));
        assert_eq!(parse_token("{{STOPRECORD}}"), Some(("STOPRECORD", "")));
        // Lowercase tokens and bare text are literal lines, not commands.
        assert_eq!(parse_token("{{delay:100}}"), None);
        assert_eq!(parse_token("hello world"), None);
        assert_eq!(parse_token("{{DELAY:100"), None);
    }
}
