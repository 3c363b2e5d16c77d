// MIT License - Copyright (c) 2026 Peter Wright

//! Classification of the panel's newline-delimited status lines.
//!
//! The panel interleaves unsolicited status lines (`ZO001`, `A1`, `MF`, ...)
//! with command acknowledgements (`OK ArmAway`, `ERROR ...`) and
//! program-location replies (`P4076E1=1,2`) on the same stream, with no
//! message ids. [`parse_line`] classifies a single line; it never fails —
//! anything unknown comes back as [`Message::Unrecognized`], and a malformed
//! numeric field inside an otherwise-recognized line discards just that line.

use crate::config::ArmMode;
use crate::protocol::{KeypadAlarmKind, ProtocolMode};

/// System-level status transitions (the two-to-three letter lines).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    ReadyToArm(bool),
    MainsFail(bool),
    BatteryFail(bool),
    TamperAlarm(bool),
    LineFail(bool),
    DialerFail(bool),
    FuseFail(bool),
    DialerActive(bool),
    // RF-capable panels (ESX) only
    ReceiverFail(bool),
    RfBatteryLow(bool),
    SensorWatchAlarm(bool),
}

/// A classified line from the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ZoneOpen(u32),
    ZoneClose(u32),
    ZoneAlarm(u32),
    ZoneAlarmRestore(u32),
    ZoneTrouble(u32),
    ZoneTroubleRestore(u32),
    ZoneBypass(u32),
    ZoneBypassRestore(u32),
    ZoneSuperviseFail(u32),
    ZoneSuperviseRestore(u32),
    AreaArmed {
        area: u32,
        mode: ArmMode,
        user: Option<u32>,
    },
    AreaDisarmed {
        area: u32,
    },
    OutputOn(u32),
    OutputOff(u32),
    System(SystemEvent),
    /// MODE 4: entry-delay countdown for a zone (`ED005,20`)
    EntryDelay {
        zone: u32,
        seconds: u32,
    },
    /// MODE 4: exit-delay countdown for an area (`XD1,30`)
    ExitDelay {
        area: u32,
        seconds: u32,
    },
    /// MODE 4: keypad emergency alarm (`KPA`/`KFA`/`KMA`)
    KeypadAlarm(KeypadAlarmKind),
    /// `OK ArmAway` / `OK ArmStay`, optionally with a trailing area id
    ArmAck {
        mode: ArmMode,
        area: Option<u32>,
    },
    /// `OK Disarm`, optionally with a trailing area id
    DisarmAck {
        area: Option<u32>,
    },
    /// `OK Bypass 005` / `OK Unbypass 005`
    BypassAck {
        zone: u32,
        bypassed: bool,
    },
    /// `OK Version "ECi F/W Ver. 10.3.52"`
    VersionReply(String),
    /// Program-location reply, e.g. `P4076E1=1,2`
    ProgramReply {
        location: String,
        value: String,
    },
    /// Any other `OK ...` acknowledgement
    Ok(String),
    /// Any `ERROR ...` rejection
    Error(String),
    Unrecognized,
}

impl Message {
    /// Whether this line answers the most recently sent command (as opposed
    /// to being unsolicited status traffic).
    pub fn is_command_reply(&self) -> bool {
        matches!(
            self,
            Message::ArmAck { .. }
                | Message::DisarmAck { .. }
                | Message::BypassAck { .. }
                | Message::VersionReply(_)
                | Message::ProgramReply { .. }
                | Message::Ok(_)
                | Message::Error(_)
        )
    }
}

/// Classify a single line from the panel.
///
/// `mode` gates the MODE 4 message shapes; `supports_rf` gates the ESX RF
/// supervision codes.
pub fn parse_line(line: &str, mode: ProtocolMode, supports_rf: bool) -> Message {
    let line = line.trim();
    // The wire protocol is ASCII; anything else is noise, and rejecting it
    // up front lets the parsers below index bytes safely.
    if line.is_empty() || !line.is_ascii() {
        return Message::Unrecognized;
    }

    if let Some(rest) = line.strip_prefix("OK") {
        return parse_ok(rest.trim_start());
    }
    if let Some(rest) = line.strip_prefix("ERROR") {
        return Message::Error(rest.trim().to_string());
    }

    if let Some(msg) = parse_system(line, supports_rf) {
        return msg;
    }

    if mode.is_enhanced() {
        if let Some(msg) = parse_enhanced(line) {
            return msg;
        }
    }

    if let Some(msg) = parse_coded(line, supports_rf) {
        return msg;
    }

    if let Some(msg) = parse_area(line, mode) {
        return msg;
    }

    if let Some(msg) = parse_program_reply(line) {
        return msg;
    }

    Message::Unrecognized
}

/// The fixed system status codes. RF codes only exist on ESX hardware.
fn parse_system(line: &str, supports_rf: bool) -> Option<Message> {
    let event = match line {
        "RO" => SystemEvent::ReadyToArm(true),
        "NR" => SystemEvent::ReadyToArm(false),
        "MF" => SystemEvent::MainsFail(true),
        "MR" => SystemEvent::MainsFail(false),
        "BF" => SystemEvent::BatteryFail(true),
        "BR" => SystemEvent::BatteryFail(false),
        "TA" => SystemEvent::TamperAlarm(true),
        "TR" => SystemEvent::TamperAlarm(false),
        "LF" => SystemEvent::LineFail(true),
        "LR" => SystemEvent::LineFail(false),
        "DF" => SystemEvent::DialerFail(true),
        "DR" => SystemEvent::DialerFail(false),
        "FF" => SystemEvent::FuseFail(true),
        "FR" => SystemEvent::FuseFail(false),
        "CAL" => SystemEvent::DialerActive(true),
        "CLF" => SystemEvent::DialerActive(false),
        "RIF" if supports_rf => SystemEvent::ReceiverFail(true),
        "RIR" if supports_rf => SystemEvent::ReceiverFail(false),
        "ZBL" if supports_rf => SystemEvent::RfBatteryLow(true),
        "ZBR" if supports_rf => SystemEvent::RfBatteryLow(false),
        "ZIA" if supports_rf => SystemEvent::SensorWatchAlarm(true),
        "ZIR" if supports_rf => SystemEvent::SensorWatchAlarm(false),
        _ => return None,
    };
    Some(Message::System(event))
}

/// Zone and output lines: a 2-4 letter code followed by 1-3 digits.
fn parse_coded(line: &str, supports_rf: bool) -> Option<Message> {
    let split = line.find(|c: char| c.is_ascii_digit())?;
    let (code, digits) = line.split_at(split);
    if !(1..=4).contains(&code.len()) || !(1..=3).contains(&digits.len()) {
        return None;
    }
    if !code.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }
    let n: u32 = digits.parse().ok()?;

    let msg = match code {
        "ZO" => Message::ZoneOpen(n),
        "ZC" => Message::ZoneClose(n),
        "ZA" => Message::ZoneAlarm(n),
        "ZR" => Message::ZoneAlarmRestore(n),
        "ZT" => Message::ZoneTrouble(n),
        "ZTR" => Message::ZoneTroubleRestore(n),
        "ZBY" => Message::ZoneBypass(n),
        "ZBYR" => Message::ZoneBypassRestore(n),
        "ZSA" if supports_rf => Message::ZoneSuperviseFail(n),
        "ZSR" if supports_rf => Message::ZoneSuperviseRestore(n),
        "OO" => Message::OutputOn(n),
        "OR" => Message::OutputOff(n),
        _ => return None,
    };
    Some(msg)
}

/// Area arm state lines: `A<n>` armed away, `D<n>` disarmed, and on MODE 4
/// `S<n>` armed stay plus an optional `,U<user>` arming-user suffix.
fn parse_area(line: &str, mode: ProtocolMode) -> Option<Message> {
    let (prefix, rest) = line.split_at(1);
    let (num_part, user) = match rest.split_once(',') {
        Some((num, suffix)) => {
            // The arming-user suffix only exists in the MODE 4 dialect.
            if !mode.is_enhanced() {
                return None;
            }
            let user: u32 = suffix.strip_prefix('U')?.parse().ok()?;
            (num, Some(user))
        }
        None => (rest, None),
    };
    if num_part.is_empty() || !num_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let area: u32 = num_part.parse().ok()?;

    match prefix {
        "A" => Some(Message::AreaArmed {
            area,
            mode: ArmMode::Away,
            user,
        }),
        "S" if mode.is_enhanced() => Some(Message::AreaArmed {
            area,
            mode: ArmMode::Stay,
            user,
        }),
        "D" => Some(Message::AreaDisarmed { area }),
        _ => None,
    }
}

/// MODE 4 extras: delay countdowns and keypad alarms.
fn parse_enhanced(line: &str) -> Option<Message> {
    match line {
        "KPA" => return Some(Message::KeypadAlarm(KeypadAlarmKind::Panic)),
        "KFA" => return Some(Message::KeypadAlarm(KeypadAlarmKind::Fire)),
        "KMA" => return Some(Message::KeypadAlarm(KeypadAlarmKind::Medical)),
        _ => {}
    }

    if let Some(rest) = line.strip_prefix("ED") {
        let (zone, seconds) = parse_id_seconds(rest)?;
        return Some(Message::EntryDelay { zone, seconds });
    }
    if let Some(rest) = line.strip_prefix("XD") {
        let (area, seconds) = parse_id_seconds(rest)?;
        return Some(Message::ExitDelay { area, seconds });
    }
    None
}

fn parse_id_seconds(rest: &str) -> Option<(u32, u32)> {
    let (id, secs) = rest.split_once(',')?;
    Some((id.parse().ok()?, secs.parse().ok()?))
}

/// `P<loc>=<value>` program-location replies.
fn parse_program_reply(line: &str) -> Option<Message> {
    if !line.starts_with('P') {
        return None;
    }
    let (location, value) = line.split_once('=')?;
    if location.len() < 2 {
        return None;
    }
    Some(Message::ProgramReply {
        location: location.to_string(),
        value: value.trim().to_string(),
    })
}

/// `OK ...` acknowledgements.
fn parse_ok(rest: &str) -> Message {
    if let Some(tail) = rest.strip_prefix("ArmAway") {
        return Message::ArmAck {
            mode: ArmMode::Away,
            area: parse_trailing_id(tail),
        };
    }
    if let Some(tail) = rest.strip_prefix("ArmStay") {
        return Message::ArmAck {
            mode: ArmMode::Stay,
            area: parse_trailing_id(tail),
        };
    }
    if let Some(tail) = rest.strip_prefix("Disarm") {
        return Message::DisarmAck {
            area: parse_trailing_id(tail),
        };
    }
    if let Some(tail) = rest.strip_prefix("Bypass") {
        return match parse_trailing_id(tail) {
            Some(zone) => Message::BypassAck {
                zone,
                bypassed: true,
            },
            None => Message::Unrecognized,
        };
    }
    if let Some(tail) = rest.strip_prefix("Unbypass") {
        return match parse_trailing_id(tail) {
            Some(zone) => Message::BypassAck {
                zone,
                bypassed: false,
            },
            None => Message::Unrecognized,
        };
    }
    if let Some(tail) = rest.strip_prefix("Version") {
        let banner = tail.trim().trim_matches('"').to_string();
        return Message::VersionReply(banner);
    }
    Message::Ok(rest.to_string())
}

/// Parse an optional trailing numeric id (`" 2"` → `Some(2)`, `""` → `None`).
fn parse_trailing_id(tail: &str) -> Option<u32> {
    let tail = tail.trim();
    if tail.is_empty() {
        return None;
    }
    tail.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p1(line: &str) -> Message {
        parse_line(line, ProtocolMode::Mode1, true)
    }

    fn p4(line: &str) -> Message {
        parse_line(line, ProtocolMode::Mode4, false)
    }

    #[test]
    fn test_zone_lines() {
        assert_eq!(p1("ZO001"), Message::ZoneOpen(1));
        assert_eq!(p1("ZC002"), Message::ZoneClose(2));
        assert_eq!(p1("ZA016"), Message::ZoneAlarm(16));
        assert_eq!(p1("ZR016"), Message::ZoneAlarmRestore(16));
        assert_eq!(p1("ZT3"), Message::ZoneTrouble(3));
        assert_eq!(p1("ZTR3"), Message::ZoneTroubleRestore(3));
        assert_eq!(p1("ZBY005"), Message::ZoneBypass(5));
        assert_eq!(p1("ZBYR005"), Message::ZoneBypassRestore(5));
        assert_eq!(p1("ZSA012"), Message::ZoneSuperviseFail(12));
        assert_eq!(p1("ZSR012"), Message::ZoneSuperviseRestore(12));
    }

    #[test]
    fn test_rf_codes_gated_off_without_rf() {
        assert_eq!(parse_line("ZSA012", ProtocolMode::Mode1, false), Message::Unrecognized);
        assert_eq!(parse_line("ZBL", ProtocolMode::Mode1, false), Message::Unrecognized);
    }

    #[test]
    fn test_output_lines() {
        assert_eq!(p1("OO1"), Message::OutputOn(1));
        assert_eq!(p1("OR2"), Message::OutputOff(2));
        assert_eq!(p1("OO16"), Message::OutputOn(16));
    }

    #[test]
    fn test_area_lines() {
        assert_eq!(
            p1("A1"),
            Message::AreaArmed {
                area: 1,
                mode: ArmMode::Away,
                user: None
            }
        );
        assert_eq!(p1("D2"), Message::AreaDisarmed { area: 2 });
        // Stay-armed lines only exist in MODE 4
        assert_eq!(p1("S1"), Message::Unrecognized);
        assert_eq!(
            p4("S1"),
            Message::AreaArmed {
                area: 1,
                mode: ArmMode::Stay,
                user: None
            }
        );
    }

    #[test]
    fn test_area_arming_user_suffix() {
        assert_eq!(
            p4("A2,U5"),
            Message::AreaArmed {
                area: 2,
                mode: ArmMode::Away,
                user: Some(5)
            }
        );
        // Suffix is a MODE 4 shape
        assert_eq!(p1("A2,U5"), Message::Unrecognized);
    }

    #[test]
    fn test_system_lines() {
        assert_eq!(p1("RO"), Message::System(SystemEvent::ReadyToArm(true)));
        assert_eq!(p1("NR"), Message::System(SystemEvent::ReadyToArm(false)));
        assert_eq!(p1("MF"), Message::System(SystemEvent::MainsFail(true)));
        assert_eq!(p1("MR"), Message::System(SystemEvent::MainsFail(false)));
        assert_eq!(p1("BF"), Message::System(SystemEvent::BatteryFail(true)));
        assert_eq!(p1("TA"), Message::System(SystemEvent::TamperAlarm(true)));
        assert_eq!(p1("LF"), Message::System(SystemEvent::LineFail(true)));
        assert_eq!(p1("DF"), Message::System(SystemEvent::DialerFail(true)));
        assert_eq!(p1("FF"), Message::System(SystemEvent::FuseFail(true)));
        assert_eq!(p1("CAL"), Message::System(SystemEvent::DialerActive(true)));
        assert_eq!(p1("CLF"), Message::System(SystemEvent::DialerActive(false)));
        assert_eq!(p1("RIF"), Message::System(SystemEvent::ReceiverFail(true)));
        assert_eq!(p1("ZBL"), Message::System(SystemEvent::RfBatteryLow(true)));
        assert_eq!(p1("ZIA"), Message::System(SystemEvent::SensorWatchAlarm(true)));
    }

    #[test]
    fn test_command_acks() {
        assert_eq!(
            p1("OK ArmAway"),
            Message::ArmAck {
                mode: ArmMode::Away,
                area: None
            }
        );
        assert_eq!(
            p4("OK ArmAway 2"),
            Message::ArmAck {
                mode: ArmMode::Away,
                area: Some(2)
            }
        );
        assert_eq!(
            p1("OK ArmStay"),
            Message::ArmAck {
                mode: ArmMode::Stay,
                area: None
            }
        );
        assert_eq!(p1("OK Disarm"), Message::DisarmAck { area: None });
        assert_eq!(
            p1("OK Bypass 005"),
            Message::BypassAck {
                zone: 5,
                bypassed: true
            }
        );
        assert_eq!(
            p1("OK Unbypass 005"),
            Message::BypassAck {
                zone: 5,
                bypassed: false
            }
        );
        assert_eq!(p1("OK"), Message::Ok(String::new()));
        assert_eq!(p1("ERROR no such command"), Message::Error("no such command".into()));
    }

    #[test]
    fn test_version_reply() {
        assert_eq!(
            p1("OK Version \"ECi F/W Ver. 10.3.52\""),
            Message::VersionReply("ECi F/W Ver. 10.3.52".into())
        );
    }

    #[test]
    fn test_program_replies() {
        assert_eq!(
            p1("P4076E1=1,2"),
            Message::ProgramReply {
                location: "P4076E1".into(),
                value: "1,2".into()
            }
        );
        assert_eq!(
            p1("P4075E2=0"),
            Message::ProgramReply {
                location: "P4075E2".into(),
                value: "0".into()
            }
        );
    }

    #[test]
    fn test_enhanced_shapes_gated_by_mode() {
        assert_eq!(p4("ED005,20"), Message::EntryDelay { zone: 5, seconds: 20 });
        assert_eq!(p4("XD1,30"), Message::ExitDelay { area: 1, seconds: 30 });
        assert_eq!(p4("KPA"), Message::KeypadAlarm(KeypadAlarmKind::Panic));
        assert_eq!(p4("KFA"), Message::KeypadAlarm(KeypadAlarmKind::Fire));
        assert_eq!(p4("KMA"), Message::KeypadAlarm(KeypadAlarmKind::Medical));

        // The same lines in a legacy session are noise
        assert_eq!(p1("ED005,20"), Message::Unrecognized);
        assert_eq!(p1("XD1,30"), Message::Unrecognized);
        assert_eq!(p1("KPA"), Message::Unrecognized);
    }

    #[test]
    fn test_unrecognized_never_panics() {
        for line in [
            "",
            "   ",
            "INVALID123",
            "Z",
            "ZO",
            "ZOabc",
            "ZO1234",
            "ZX001",
            "A",
            "Ax",
            "OK Bypass xx",
            "ED005,",
            "EDxx,20",
            "login:",
            "Welcome to Arrowhead Alarm Panel",
            "\u{1b}[2Jgarbage",
            "Aé1",
            "ZONÉ",
        ] {
            let msg = p4(line);
            assert_eq!(msg, Message::Unrecognized, "line {:?}", line);
        }
    }

    #[test]
    fn test_command_reply_classification() {
        assert!(p1("OK ArmAway").is_command_reply());
        assert!(p1("ERROR bad").is_command_reply());
        assert!(p1("P4076E1=1").is_command_reply());
        assert!(p1("OK Version \"x 1.0\"").is_command_reply());
        assert!(!p1("ZO001").is_command_reply());
        assert!(!p1("RO").is_command_reply());
        assert!(!p1("A1").is_command_reply());
    }
}
