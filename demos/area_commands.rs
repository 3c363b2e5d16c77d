//! Example: Arm, disarm, and bypass against a live panel.

use std::time::Duration;

use arrowhead_lan_bridge::{ArmMode, ArmScope, ArrowheadPanel, PanelConfig, PanelType};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = PanelConfig::builder()
        .panel_type(PanelType::Eci)
        .host("192.168.0.50")
        .user_code("1 123")
        .build();

    let mut panel = ArrowheadPanel::start(config).await?;
    println!("Connected; dialect: {:?}", panel.protocol_mode().await);

    // Bypass a zone, then put it back
    panel.bypass_zone(5).await?;
    println!("Zone 5 bypassed");
    panel.unbypass_zone(5).await?;
    println!("Zone 5 restored");

    // Stay-arm area 1 if the session speaks MODE 4, else the whole panel
    match panel.arm(ArmScope::Area(1), ArmMode::Stay).await {
        Ok(()) => println!("Area 1 armed (stay)"),
        Err(e) => {
            println!("Per-area arm unavailable ({}), arming whole panel", e);
            panel.arm(ArmScope::AllAreas, ArmMode::Stay).await?;
        }
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    panel.disarm(ArmScope::AllAreas, "1 123").await?;
    println!("Disarmed");

    // Pulse output 1 for 5 seconds
    panel.trigger_output(1, 5).await?;
    println!("Output 1 pulsed");

    panel.stop().await?;
    Ok(())
}
