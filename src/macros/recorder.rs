//! Live event capture into macro text.

use crate::types::MacroEvent;
use std::time::{Duration, Instant};
use tracing::debug;

/// Gaps shorter than this are not worth an explicit wait token: firmware
/// processing already adds 50-100 ms per command.
const DELAY_THRESHOLD: Duration = Duration::from_millis(200);

/// Delay placed after the bootstrap pointer reset
const BOOTSTRAP_DELAY_MS: u64 = 100;

#[derive(Debug)]
struct Recording {
    name: String,
    started: Instant,
    last_event: Instant,
    events: Vec<MacroEvent>,
}

/// Records a live stream of key/mouse events into macro lines.
///
/// Silent periods are collapsed: a gap of at least 200 ms before an event
/// emits one explicit `{{DELAY:gap}}` token instead of flooding the stream
/// with per-event timestamps. Key events are recorded on key-down only,
/// since the dongle's key command performs press+release itself.
///
/// The recorder does not interpret mouse coordinates; callers decide whether
/// they feed absolute positions or deltas.
#[derive(Debug, Default)]
pub struct MacroRecorder {
    recording: Option<Recording>,
}

impl MacroRecorder {
    /// Create an idle recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new recording, discarding any recording in progress
    pub fn start(&mut self, name: &str) {
        self.start_at(name, Instant::now());
    }

    /// [`Self::start`] with an explicit clock reading
    pub fn start_at(&mut self, name: &str, now: Instant) {
        debug!("recording started: {name}");
        self.recording = Some(Recording {
            name: name.to_string(),
            started: now,
            last_event: now,
            events: Vec::new(),
        });
    }

    /// Whether a recording is in progress
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Events captured so far, in chronological order
    #[must_use]
    pub fn events(&self) -> &[MacroEvent] {
        self.recording.as_ref().map_or(&[], |r| &r.events)
    }

    /// Record a key press
    pub fn record_key(&mut self, name: &str) {
        self.record_key_at(name, Instant::now());
    }

    /// [`Self::record_key`] with an explicit clock reading
    pub fn record_key_at(&mut self, name: &str, now: Instant) {
        self.push_at(
            MacroEvent::KeyPress {
                name: name.to_string(),
            },
            now,
        );
    }

    /// Record a pointer move (absolute or delta, per the caller's convention)
    pub fn record_mouse_move(&mut self, x: i32, y: i32) {
        self.record_mouse_move_at(x, y, Instant::now());
    }

    /// [`Self::record_mouse_move`] with an explicit clock reading
    pub fn record_mouse_move_at(&mut self, x: i32, y: i32, now: Instant) {
        self.push_at(MacroEvent::MouseMove { x, y }, now);
    }

    /// Record a pointer button transition
    pub fn record_mouse_button(&mut self, name: &str, is_down: bool) {
        self.record_mouse_button_at(name, is_down, Instant::now());
    }

    /// [`Self::record_mouse_button`] with an explicit clock reading
    pub fn record_mouse_button_at(&mut self, name: &str, is_down: bool, now: Instant) {
        self.push_at(
            MacroEvent::MouseButton {
                name: name.to_string(),
                is_down,
            },
            now,
        );
    }

    /// Record a vertical scroll
    pub fn record_mouse_scroll(&mut self, amount: i32) {
        self.record_mouse_scroll_at(amount, Instant::now());
    }

    /// [`Self::record_mouse_scroll`] with an explicit clock reading
    pub fn record_mouse_scroll_at(&mut self, amount: i32, now: Instant) {
        self.push_at(MacroEvent::MouseScroll { amount }, now);
    }

    /// Record a horizontal scroll
    pub fn record_mouse_hscroll(&mut self, amount: i32) {
        self.record_mouse_hscroll_at(amount, Instant::now());
    }

    /// [`Self::record_mouse_hscroll`] with an explicit clock reading
    pub fn record_mouse_hscroll_at(&mut self, amount: i32, now: Instant) {
        self.push_at(MacroEvent::MouseHScroll { amount }, now);
    }

    /// Stop recording and render the macro lines.
    ///
    /// Returns an empty vector if no recording was in progress. The output
    /// opens with a comment header and the bootstrap pair
    /// `{{MOUSE:RESET}}` / `{{DELAY:100}}` so playback always starts from a
    /// known pointer state.
    pub fn stop(&mut self) -> Vec<String> {
        self.stop_at(Instant::now())
    }

    /// [`Self::stop`] with an explicit clock reading
    pub fn stop_at(&mut self, now: Instant) -> Vec<String> {
        let Some(recording) = self.recording.take() else {
            return Vec::new();
        };
        let duration = now.duration_since(recording.started);
        debug!(
            "recording stopped: {} ({} events, {}ms)",
            recording.name,
            recording.events.len(),
            duration.as_millis()
        );

        // The bootstrap pair moves the pointer to its origin before any
        // recorded event replays.
        let mut lines = vec![
            format!("// Recorded macro: {}", recording.name),
            format!("// Duration: {}ms", duration.as_millis()),
            format!("// Events: {}", recording.events.len()),
            String::new(),
            "{{MOUSE:RESET}}".to_string(),
            format!("{{{{DELAY:{BOOTSTRAP_DELAY_MS}}}}}"),
            String::new(),
        ];

        for event in &recording.events {
            lines.push(event.to_line());
        }
        lines
    }

    /// Stop recording and render the macro as one newline-joined text
    pub fn stop_to_text(&mut self) -> String {
        self.stop().join("\n")
    }

    fn push_at(&mut self, event: MacroEvent, now: Instant) {
        let Some(recording) = self.recording.as_mut() else {
            return;
        };
        let gap = now.duration_since(recording.last_event);
        if gap >= DELAY_THRESHOLD {
            recording.events.push(MacroEvent::Delay {
                ms: u64::try_from(gap.as_millis()).unwrap_or(u64::MAX),
            });
        }
        recording.events.push(event);
        recording.last_event = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn test_delay_coalescing() {
        let base = Instant::now();
        let mut recorder = MacroRecorder::new();
        recorder.start_at("demo", base);

        recorder.record_key_at("a", at(base, 0));
        recorder.record_key_at("b", at(base, 50));
        recorder.record_key_at("c", at(base, 300));

        // The 50ms gap is swallowed; the 250ms gap becomes one Delay token.
        assert_eq!(
            recorder.events(),
            &[
                MacroEvent::KeyPress { name: "a".to_string() },
                MacroEvent::KeyPress { name: "b".to_string() },
                MacroEvent::Delay { ms: 250 },
                MacroEvent::KeyPress { name: "c".to_string() },
            ]
        );
    }

    #[test]
    fn test_stop_renders_header_and_bootstrap() {
        let base = Instant::now();
        let mut recorder = MacroRecorder::new();
        recorder.start_at("login", base);
        recorder.record_key_at("enter", at(base, 10));
        let lines = recorder.stop_at(at(base, 500));

        assert_eq!(lines[0], "// Recorded macro: login");
        assert_eq!(lines[1], "// Duration: 500ms");
        assert_eq!(lines[2], "// Events: 1");
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], "{{MOUSE:RESET}}");
        assert_eq!(lines[5], "{{DELAY:100}}");
        assert_eq!(lines[6], "");
        assert_eq!(lines[7], "{{KEY:enter}}");
        assert_eq!(lines.len(), 8);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_key_up_is_not_a_recorder_concern() {
        // Only presses are recorded; mouse buttons carry both transitions.
        let base = Instant::now();
        let mut recorder = MacroRecorder::new();
        recorder.start_at("drag", base);
        recorder.record_mouse_button_at("LEFT", true, at(base, 10));
        recorder.record_mouse_move_at(5, 5, at(base, 20));
        recorder.record_mouse_button_at("LEFT", false, at(base, 30));

        let lines = recorder.stop_at(at(base, 100));
        assert_eq!(
            &lines[7..],
            &[
                "{{MOUSE:DOWN:LEFT}}".to_string(),
                "{{MOUSE:MOVE:5,5}}".to_string(),
                "{{MOUSE:UP:LEFT}}".to_string(),
            ]
        );
    }

    #[test]
    fn test_events_while_idle_are_dropped() {
        let mut recorder = MacroRecorder::new();
        recorder.record_key("a");
        assert!(recorder.events().is_empty());
        assert!(recorder.stop().is_empty());
    }

    #[test]
    fn test_start_discards_previous_recording() {
        let base = Instant::now();
        let mut recorder = MacroRecorder::new();
        recorder.start_at("first", base);
        recorder.record_key_at("x", at(base, 10));
        recorder.start_at("second", at(base, 20));
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_scroll_events() {
        let base = Instant::now();
        let mut recorder = MacroRecorder::new();
        recorder.start_at("scroll", base);
        recorder.record_mouse_scroll_at(-3, at(base, 10));
        recorder.record_mouse_hscroll_at(2, at(base, 20));
        let lines = recorder.stop_at(at(base, 50));
        assert_eq!(
            &lines[7..],
            &[
                "{{MOUSE:SCROLL:-3}}".to_string(),
                "{{MOUSE:HSCROLL:2}}".to_string(),
            ]
        );
    }
}
