//! Example: Connect to a panel and print state changes as they happen.

use arrowhead_lan_bridge::{ArrowheadPanel, PanelConfig, PanelType};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = PanelConfig::builder()
        .panel_type(PanelType::Eci)
        .host("192.168.0.50")
        .user_code("1 123")
        .build();

    println!("Connecting to panel...");
    let mut panel = ArrowheadPanel::start(config).await?;

    let snapshot = panel.snapshot().await;
    println!(
        "Connected ({} / firmware {})",
        snapshot
            .protocol_mode
            .map(|m| m.to_string())
            .unwrap_or_else(|| "unknown mode".into()),
        snapshot.firmware_version.as_deref().unwrap_or("unknown")
    );

    println!("\n--- Zones ({}) ---", snapshot.zones.len());
    for zone in snapshot.zones.values() {
        println!(
            "  Zone {:3}: {:20} open={} bypass={} sealed={}",
            zone.id,
            zone.name,
            zone.is_open(),
            zone.is_bypassed(),
            zone.is_sealed(),
        );
    }

    println!("\n--- Areas ({}) ---", snapshot.areas.len());
    for area in snapshot.areas.values() {
        println!(
            "  Area {:2}: armed={} mode={:?} alarm={}",
            area.id, area.armed, area.mode, area.alarm
        );
    }

    let mut events = panel.subscribe();
    println!("\nListening for events (ctrl-c to quit)...");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => println!("Event: {:?}", event),
                Err(e) => {
                    eprintln!("Event stream error: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    panel.stop().await?;
    Ok(())
}
