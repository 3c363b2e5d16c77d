// MIT License - Copyright (c) 2026 Peter Wright

use std::fmt;

use crate::config::{ArmMode, UserCode, compare_version};

/// Protocol dialect negotiated for the session.
///
/// MODE 1 is the legacy dialect every panel speaks. MODE 4 is the
/// home-automation dialect on ECi firmware 10.3.50 and later; it adds
/// per-area arm commands, keypad alarms, arming-user tracking, and
/// entry/exit delay countdown messages. The dialect is fixed once per
/// session, right after authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    Mode1,
    Mode4,
}

impl ProtocolMode {
    pub fn is_enhanced(&self) -> bool {
        matches!(self, Self::Mode4)
    }
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mode1 => write!(f, "MODE 1"),
            Self::Mode4 => write!(f, "MODE 4"),
        }
    }
}

/// Minimum ECi firmware version for the MODE 4 dialect.
pub const MODE4_MIN_FIRMWARE: &str = "10.3.50";

/// Whether a firmware version string is at or above the MODE 4 threshold.
pub fn firmware_supports_mode4(version: &str) -> bool {
    compare_version(version, MODE4_MIN_FIRMWARE) >= 0
}

/// Extract the dotted numeric version from a firmware banner,
/// e.g. `ECi F/W Ver. 10.3.52` → `10.3.52`.
pub fn extract_version_number(banner: &str) -> Option<&str> {
    banner
        .split_whitespace()
        .find(|tok| {
            tok.contains('.') && tok.chars().all(|c| c.is_ascii_digit() || c == '.')
        })
        .filter(|tok| tok.chars().any(|c| c.is_ascii_digit()))
}

/// Keypad emergency alarm kinds (MODE 4 only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypadAlarmKind {
    Panic,
    Fire,
    Medical,
}

impl KeypadAlarmKind {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Panic => "Panic",
            Self::Fire => "Fire",
            Self::Medical => "Medical",
        }
    }
}

/// Commands that can be sent to the panel.
///
/// Wire literals are panel-defined and must be preserved bit-for-bit;
/// they come from the Arrowhead automation-port command set. Commands
/// marked MODE 4 are only valid once the enhanced dialect has been
/// negotiated — the dispatcher rejects them otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `ARMAWAY` — arm every area in away mode.
    ArmAway,
    /// `ARMSTAY` — arm every area in stay mode.
    ArmStay,
    /// `ARMAREA <n>` — away-arm a single area. MODE 4.
    ArmArea { area: u32 },
    /// `STAYAREA <n>` — stay-arm a single area. MODE 4.
    StayArea { area: u32 },
    /// `DISARM <user> <pin>` — disarm every area.
    Disarm { code: UserCode },
    /// `DISARMAREA <n> <user> <pin>` — disarm a single area. MODE 4.
    DisarmArea { area: u32, code: UserCode },
    /// `BYPASS <zone:03>` — exclude a zone from arming checks.
    Bypass { zone: u32 },
    /// `UNBYPASS <zone:03>` — re-include a bypassed zone.
    Unbypass { zone: u32 },
    /// `OUTPUTON <n>` or `OUTPUTON <n> <secs>` — latch or pulse an output.
    OutputOn { output: u32, duration_secs: Option<u32> },
    /// `OUTPUTOFF <n>` — turn an output off.
    OutputOff { output: u32 },
    /// `KPANICALARM` / `KFIREALARM` / `KMEDICALALARM`. MODE 4.
    KeypadAlarm { kind: KeypadAlarmKind },
    /// `STATUS` — request a full status dump (answered by status lines).
    Status,
    /// `VERSION` — query the firmware version banner.
    Version,
    /// `MODE 4` — capability probe for the enhanced dialect.
    ModeProbe,
    /// `P4076E1?` — program-location query for active areas.
    QueryActiveAreas,
    /// `P4075E<n>?` — program-location query for zones assigned to an area.
    QueryZonesInArea { area: u32 },
    /// Raw command string (escape hatch for unlisted commands).
    Raw { text: String, expect_response: bool },
}

impl Command {
    /// Convert the command to its wire string representation.
    pub fn to_wire_string(&self) -> String {
        match self {
            Command::ArmAway => "ARMAWAY".to_string(),
            Command::ArmStay => "ARMSTAY".to_string(),
            Command::ArmArea { area } => format!("ARMAREA {}", area),
            Command::StayArea { area } => format!("STAYAREA {}", area),
            Command::Disarm { code } => format!("DISARM {}", code.wire()),
            Command::DisarmArea { area, code } => {
                format!("DISARMAREA {} {}", area, code.wire())
            }
            Command::Bypass { zone } => format!("BYPASS {:03}", zone),
            Command::Unbypass { zone } => format!("UNBYPASS {:03}", zone),
            Command::OutputOn {
                output,
                duration_secs,
            } => match duration_secs {
                Some(secs) => format!("OUTPUTON {} {}", output, secs),
                None => format!("OUTPUTON {}", output),
            },
            Command::OutputOff { output } => format!("OUTPUTOFF {}", output),
            Command::KeypadAlarm { kind } => match kind {
                KeypadAlarmKind::Panic => "KPANICALARM".to_string(),
                KeypadAlarmKind::Fire => "KFIREALARM".to_string(),
                KeypadAlarmKind::Medical => "KMEDICALALARM".to_string(),
            },
            Command::Status => "STATUS".to_string(),
            Command::Version => "VERSION".to_string(),
            Command::ModeProbe => "MODE 4".to_string(),
            Command::QueryActiveAreas => "P4076E1?".to_string(),
            Command::QueryZonesInArea { area } => format!("P4075E{}?", area),
            Command::Raw { text, .. } => text.clone(),
        }
    }

    /// Whether the command waits for an acknowledgement line.
    ///
    /// Output control, STATUS, and keypad alarms are fire-and-forget: the
    /// panel answers them (if at all) with ordinary status lines.
    pub fn expects_response(&self) -> bool {
        match self {
            Command::ArmAway
            | Command::ArmStay
            | Command::ArmArea { .. }
            | Command::StayArea { .. }
            | Command::Disarm { .. }
            | Command::DisarmArea { .. }
            | Command::Bypass { .. }
            | Command::Unbypass { .. }
            | Command::Version
            | Command::ModeProbe
            | Command::QueryActiveAreas
            | Command::QueryZonesInArea { .. } => true,
            Command::OutputOn { .. }
            | Command::OutputOff { .. }
            | Command::KeypadAlarm { .. }
            | Command::Status => false,
            Command::Raw {
                expect_response, ..
            } => *expect_response,
        }
    }

    /// Whether the command only exists in the MODE 4 dialect.
    pub fn requires_enhanced(&self) -> bool {
        matches!(
            self,
            Command::ArmArea { .. }
                | Command::StayArea { .. }
                | Command::DisarmArea { .. }
                | Command::KeypadAlarm { .. }
        )
    }

    /// Create an area arm command from an ArmMode.
    pub fn arm_area(area: u32, mode: ArmMode) -> Self {
        match mode {
            ArmMode::Away => Command::ArmArea { area },
            ArmMode::Stay => Command::StayArea { area },
        }
    }

    /// Create a whole-panel arm command from an ArmMode.
    pub fn arm_all(mode: ArmMode) -> Self {
        match mode {
            ArmMode::Away => Command::ArmAway,
            ArmMode::Stay => Command::ArmStay,
        }
    }
}
