use pwlink::{
    macros::MacroValidator, BleTransport, LinkConfig, LinkSession, MacroPlayer, Result,
};
use tracing::{error, info, warn};

const MACRO_TEXT: &str = "\
// Open a terminal and greet
{{MOUSE:RESET}}
{{DELAY:100}}
{{KEY:gui}}
{{DELAY:500}}
{{TYPE:terminal}}
{{KEY:enter}}
{{DELAY:1000}}
{{TYPE:echo hello from pwlink}}
{{KEY:enter}}
";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("PWDongle Macro Playback Example");

    // Static checks first: errors block playback, warnings are advisory
    let report = MacroValidator::validate(MACRO_TEXT);
    for warning in &report.warnings {
        warn!("{warning}");
    }
    if !report.is_valid {
        for e in &report.errors {
            error!("{e}");
        }
        error!("Macro failed validation, not playing");
        return Ok(());
    }
    info!(
        "Macro OK: {} commands, about {}",
        report.command_count,
        MacroValidator::format_duration(report.estimated_duration_ms)
    );

    let transport = BleTransport::new().await?;
    let (session, mut status) = LinkSession::spawn(transport, LinkConfig::default());
    tokio::spawn(async move {
        while let Some(msg) = status.recv().await {
            info!("link: {msg}");
        }
    });

    session.connect("PWDongle").await?;
    session.wait_ready().await?;

    // Play through the session with progress reporting
    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<pwlink::PlaybackProgress>();
    tokio::spawn(async move {
        while let Some(p) = progress_rx.recv().await {
            info!(
                "playing line {}/{} ({}ms of ~{}ms)",
                p.current, p.total, p.elapsed_ms, p.estimated_total_ms
            );
        }
    });

    let player = MacroPlayer::new(session.handle()).with_progress(progress_tx);
    let summary = player.play(MACRO_TEXT).await?;
    info!(
        "Playback finished: {} commands in {:.1}s",
        summary.commands,
        summary.elapsed.as_secs_f64()
    );

    session.disconnect().await?;
    Ok(())
}
