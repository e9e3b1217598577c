use pwlink::{BleTransport, LinkConfig, LinkSession, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("PWDongle Basic Control Example");
    info!("Searching for dongles...");

    let transport = BleTransport::new().await?;
    let (session, mut status) = LinkSession::spawn(transport, LinkConfig::default());

    // Surface link status messages as they arrive
    tokio::spawn(async move {
        while let Some(msg) = status.recv().await {
            info!("status: {msg}");
        }
    });

    let devices = session.scan().await?;
    let Some(device) = devices.first() else {
        error!("No dongle found, is it powered and advertising?");
        return Ok(());
    };
    info!("Found: {} (rssi {})", device.name, device.rssi);

    session.connect(&device.name).await?;
    session.wait_ready().await?;
    info!("Link ready");

    // Press a key and type a line of text
    session.send("KEY:enter").await?;
    session.send("TYPE:hello from pwlink").await?;

    // Stream a few relative pointer moves over the low-latency path
    for _ in 0..10 {
        session.send_low_latency("MOUSE:MOVE_REL:10,0");
        sleep(Duration::from_millis(20)).await;
    }

    sleep(Duration::from_secs(1)).await;
    session.disconnect().await?;
    info!("Done");
    Ok(())
}
