//! Sequential macro playback against the command channel.

use super::{parse_token, validator::MacroValidator};
use crate::{
    error::{DongleError, Result},
    session::SessionHandle,
};
use async_trait::async_trait;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pause after each side-effecting command; back-to-back sends with no gap
/// are sometimes dropped by the firmware.
const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// A `DELAY` token with an unparseable argument falls back to this
const DEFAULT_DELAY_MS: u64 = 100;

/// Where played-back commands land.
///
/// [`SessionHandle`] implements this by forwarding to the dongle; tests
/// substitute an in-memory sink.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Press a key
    async fn key(&self, args: &str) -> Result<()>;

    /// Execute a pointer command (`MOVE:x,y`, `DOWN:LEFT`, `RESET`, ...)
    async fn mouse(&self, args: &str) -> Result<()>;

    /// Type literal text
    async fn type_text(&self, text: &str) -> Result<()>;
}

#[async_trait]
impl PlaybackSink for SessionHandle {
    async fn key(&self, args: &str) -> Result<()> {
        self.send(&format!("KEY:{args}")).await
    }

    async fn mouse(&self, args: &str) -> Result<()> {
        self.send(&format!("MOUSE:{args}")).await
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.send(&format!("TYPE:{text}")).await
    }
}

/// Progress report emitted after each played line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackProgress {
    /// 1-based index of the line just played
    pub current: usize,
    /// Total playable lines in the macro
    pub total: usize,
    /// Wall-clock time since playback started, in milliseconds
    pub elapsed_ms: u64,
    /// Estimated total duration after speed scaling, in milliseconds
    pub estimated_total_ms: u64,
}

/// Terminal outcome of one playback run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSummary {
    /// Commands executed before the run ended
    pub commands: usize,
    /// Total wall-clock playback time
    pub elapsed: Duration,
    /// Whether the run ended through [`MacroPlayer::stop`]
    pub cancelled: bool,
}

/// Plays macro text one line at a time.
///
/// Cancellation is cooperative: [`Self::stop`] raises a flag that the run
/// loop checks at each token boundary, never mid-token. A disconnect during
/// playback does not stop the player by itself; callers watching link state
/// decide whether to stop.
pub struct MacroPlayer<S: PlaybackSink> {
    sink: S,
    speed: f32,
    stop_flag: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    status: Option<mpsc::UnboundedSender<String>>,
    progress: Option<mpsc::UnboundedSender<PlaybackProgress>>,
}

impl<S: PlaybackSink> MacroPlayer<S> {
    /// Create a player over the given sink at normal speed
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            speed: 1.0,
            stop_flag: Arc::new(AtomicBool::new(false)),
            playing: Arc::new(AtomicBool::new(false)),
            status: None,
            progress: None,
        }
    }

    /// Set the speed multiplier; delays divide by it. Values at or below
    /// zero are treated as normal speed.
    #[must_use]
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = if speed > 0.0 { speed } else { 1.0 };
        self
    }

    /// Attach a human-readable status sink
    #[must_use]
    pub fn with_status(mut self, status: mpsc::UnboundedSender<String>) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a per-line progress sink
    #[must_use]
    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<PlaybackProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Whether a playback run is in progress
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Request cancellation at the next token boundary.
    ///
    /// Idempotent; calling while not playing is a no-op.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Play macro text to the end, to cancellation, or to the first sink
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::Playback`] when a command's sink call fails;
    /// the failure is also reported as a terminal status.
    pub async fn play(&self, content: &str) -> Result<PlaybackSummary> {
        self.stop_flag.store(false, Ordering::SeqCst);
        self.playing.store(true, Ordering::SeqCst);
        let result = self.run(content).await;
        self.playing.store(false, Ordering::SeqCst);
        result
    }

    async fn run(&self, content: &str) -> Result<PlaybackSummary> {
        let lines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("//") && !l.starts_with('#'))
            .collect();
        let total = lines.len();
        let start = Instant::now();
        let estimated_total_ms = self.scale_ms(MacroValidator::estimate_duration(content));

        let mut commands = 0usize;
        let mut cancelled = false;
        for (index, line) in lines.iter().enumerate() {
            if self.stop_flag.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            if let Err(e) = self.play_line(line).await {
                let message = format!("Playback error: {e}");
                warn!("{message}");
                self.notify(&message);
                return Err(DongleError::Playback(e.to_string()));
            }
            commands += 1;
            if let Some(progress) = &self.progress {
                let _ = progress.send(PlaybackProgress {
                    current: index + 1,
                    total,
                    elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                    estimated_total_ms,
                });
            }
        }

        let elapsed = start.elapsed();
        if cancelled {
            self.notify(&format!("Stopped: {commands} cmds in {}s", elapsed.as_secs()));
        } else {
            self.notify(&format!("Complete: {commands} cmds in {}s", elapsed.as_secs()));
        }
        Ok(PlaybackSummary {
            commands,
            elapsed,
            cancelled,
        })
    }

    async fn play_line(&self, line: &str) -> Result<()> {
        let Some((token, args)) = parse_token(line) else {
            // Lines without a recognized token are typed verbatim.
            self.sink.type_text(line).await?;
            tokio::time::sleep(SETTLE_DELAY).await;
            return Ok(());
        };

        match token {
            "DELAY" => {
                let raw = args.parse::<u64>().unwrap_or(DEFAULT_DELAY_MS);
                let scaled = self.scale_ms(raw);
                tokio::time::sleep(Duration::from_millis(scaled)).await;
                self.notify(&format!("Wait {scaled}ms"));
            }
            "KEY" => {
                self.sink.key(args).await?;
                tokio::time::sleep(SETTLE_DELAY).await;
                self.notify(&format!("Key: {args}"));
            }
            "MOUSE" => {
                self.sink.mouse(args).await?;
                tokio::time::sleep(SETTLE_DELAY).await;
                self.notify(&format!("Mouse: {args}"));
            }
            "TYPE" | "TEXT" => {
                self.sink.type_text(args).await?;
                tokio::time::sleep(SETTLE_DELAY).await;
                self.notify(&format!("Type: {args}"));
            }
            "GAMEPAD" => self.notify("Gamepad (no support)"),
            "AUDIO" => self.notify("Audio (no support)"),
            other => debug!("unknown token skipped: {other}"),
        }
        Ok(())
    }

    fn scale_ms(&self, ms: u64) -> u64 {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled = (ms as f64 / f64::from(self.speed)).floor() as u64;
        scaled
    }

    fn notify(&self, message: &str) {
        if let Some(status) = &self.status {
            let _ = status.send(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(String, String)>>,
        fail_on: Option<String>,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlaybackSink for Arc<RecordingSink> {
        async fn key(&self, args: &str) -> Result<()> {
            if self.fail_on.as_deref() == Some("key") {
                return Err(DongleError::Disconnected);
            }
            self.calls
                .lock()
                .unwrap()
                .push(("key".to_string(), args.to_string()));
            Ok(())
        }

        async fn mouse(&self, args: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(("mouse".to_string(), args.to_string()));
            Ok(())
        }

        async fn type_text(&self, text: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(("type".to_string(), text.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let sink = Arc::new(RecordingSink::default());
        let player = MacroPlayer::new(Arc::clone(&sink));

        let start = Instant::now();
        let summary = player
            .play("{{MOUSE:RESET}}\n{{DELAY:100}}\n{{KEY:a}}\n{{TYPE:hi}}")
            .await
            .unwrap();

        assert_eq!(summary.commands, 4);
        assert!(!summary.cancelled);
        assert_eq!(
            sink.calls(),
            vec![
                ("mouse".to_string(), "RESET".to_string()),
                ("key".to_string(), "a".to_string()),
                ("type".to_string(), "hi".to_string()),
            ]
        );
        // One 100ms delay token plus three 50ms settles.
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_comments_and_blanks_skipped() {
        let sink = Arc::new(RecordingSink::default());
        let player = MacroPlayer::new(Arc::clone(&sink));

        let summary = player
            .play("// Recorded macro: x\n# note\n\n{{KEY:enter}}")
            .await
            .unwrap();

        assert_eq!(summary.commands, 1);
        assert_eq!(sink.calls(), vec![("key".to_string(), "enter".to_string())]);
    }

    #[tokio::test]
    async fn test_unmatched_line_is_typed_verbatim() {
        let sink = Arc::new(RecordingSink::default());
        let player = MacroPlayer::new(Arc::clone(&sink));

        player.play("hello world").await.unwrap();
        assert_eq!(
            sink.calls(),
            vec![("type".to_string(), "hello world".to_string())]
        );
    }

    #[tokio::test]
    async fn test_delay_scales_with_speed() {
        let sink = Arc::new(RecordingSink::default());
        let player = MacroPlayer::new(Arc::clone(&sink)).with_speed(4.0);

        let start = Instant::now();
        player.play("{{DELAY:400}}").await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_gamepad_and_audio_are_status_only() {
        let sink = Arc::new(RecordingSink::default());
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let player = MacroPlayer::new(Arc::clone(&sink)).with_status(status_tx);

        player.play("{{GAMEPAD:A}}\n{{AUDIO:beep}}").await.unwrap();

        assert!(sink.calls().is_empty());
        let mut statuses = Vec::new();
        while let Ok(msg) = status_rx.try_recv() {
            statuses.push(msg);
        }
        assert!(statuses.contains(&"Gamepad (no support)".to_string()));
        assert!(statuses.contains(&"Audio (no support)".to_string()));
    }

    #[tokio::test]
    async fn test_progress_reports_each_line() {
        let sink = Arc::new(RecordingSink::default());
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let player = MacroPlayer::new(Arc::clone(&sink)).with_progress(progress_tx);

        player.play("{{KEY:a}}\n{{KEY:b}}").await.unwrap();

        let first = progress_rx.try_recv().unwrap();
        let second = progress_rx.try_recv().unwrap();
        assert_eq!((first.current, first.total), (1, 2));
        assert_eq!((second.current, second.total), (2, 2));
        // Estimate comes from static analysis; key settles are pacing only.
        assert_eq!(first.estimated_total_ms, 0);
    }

    #[tokio::test]
    async fn test_stop_cancels_at_token_boundary() {
        let sink = Arc::new(RecordingSink::default());
        let player = Arc::new(MacroPlayer::new(Arc::clone(&sink)));

        let runner = Arc::clone(&player);
        let run = tokio::spawn(async move {
            runner
                .play("{{DELAY:200}}\n{{KEY:a}}\n{{KEY:b}}\n{{KEY:c}}")
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        player.stop();
        // Idempotent and harmless to repeat.
        player.stop();

        let summary = run.await.unwrap().unwrap();
        assert!(summary.cancelled);
        // The in-flight DELAY completes; nothing after the boundary runs.
        assert_eq!(summary.commands, 1);
        assert!(sink.calls().is_empty());
        assert!(!player.is_playing());
    }

    #[tokio::test]
    async fn test_sink_failure_ends_playback() {
        let sink = Arc::new(RecordingSink {
            calls: Mutex::new(Vec::new()),
            fail_on: Some("key".to_string()),
        });
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let player = MacroPlayer::new(Arc::clone(&sink)).with_status(status_tx);

        let err = player
            .play("{{MOUSE:RESET}}\n{{KEY:a}}\n{{MOUSE:RESET}}")
            .await
            .unwrap_err();
        assert!(matches!(err, DongleError::Playback(_)));
        // The mouse command before the failure ran; the one after did not.
        assert_eq!(sink.calls().len(), 1);

        let mut statuses = Vec::new();
        while let Ok(msg) = status_rx.try_recv() {
            statuses.push(msg);
        }
        assert!(statuses.iter().any(|m| m.starts_with("Playback error:")));
    }
}
