// MIT License - Copyright (c) 2026 Peter Wright

//! Zone/area topology detection.
//!
//! ECi panels expose their configuration through program locations:
//! `P4076E1?` answers with the active area list and `P4075E<n>?` with the
//! zones assigned to area n. Detection runs these queries once per session
//! through the command engine, then [`resolve`] merges the result with any
//! manual configuration — manual always wins for the dimension it covers.
//! When neither manual configuration nor detection yields anything, the
//! session falls back to a single area covering zones 1-16 and flags the
//! fallback so callers can surface a warning.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::config::{MAX_AREA_ID, PanelConfig, PanelType};
use crate::error::{ArrowheadError, Result};
use crate::message::Message;
use crate::protocol::Command;
use crate::transport::command::CommandEngine;

/// Conservative zone range used when nothing else is known.
pub const DEFAULT_ZONE_COUNT: u32 = 16;

/// Where the resolved topology came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologySource {
    /// Both dimensions probed from the panel
    Detected,
    /// Both dimensions supplied by the caller
    Manual,
    /// One dimension manual, the other detected
    Mixed,
    /// At least one dimension fell back to the conservative default
    Default,
}

/// A zone expander inferred from the detected zone ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expander {
    pub name: String,
    pub range: (u32, u32),
    pub zone_count: usize,
}

/// The resolved zone/area layout for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub zones: BTreeSet<u32>,
    pub areas: BTreeSet<u32>,
    pub zones_by_area: BTreeMap<u32, BTreeSet<u32>>,
    pub expanders: Vec<Expander>,
    pub source: TopologySource,
    /// True when a dimension used the conservative default
    pub fallback: bool,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            zones: BTreeSet::new(),
            areas: BTreeSet::new(),
            zones_by_area: BTreeMap::new(),
            expanders: Vec::new(),
            source: TopologySource::Default,
            fallback: false,
        }
    }
}

impl Topology {
    /// The area a zone is assigned to, if any.
    pub fn area_of_zone(&self, zone: u32) -> Option<u32> {
        self.zones_by_area
            .iter()
            .find(|(_, zones)| zones.contains(&zone))
            .map(|(area, _)| *area)
    }
}

/// Raw query results before manual overrides are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDetection {
    pub areas: BTreeSet<u32>,
    pub zones_by_area: BTreeMap<u32, BTreeSet<u32>>,
}

impl RawDetection {
    pub fn zones(&self) -> BTreeSet<u32> {
        self.zones_by_area.values().flatten().copied().collect()
    }

    fn is_empty(&self) -> bool {
        self.areas.is_empty() && self.zones().is_empty()
    }
}

/// Run the program-location query sequence through the command engine.
///
/// Each query is bounded by the engine's command timeout. A failed or
/// malformed area query aborts detection; a failed per-area zone query only
/// skips that area.
pub(crate) async fn run_detection(engine: &CommandEngine) -> Result<RawDetection> {
    let reply = engine.send(&Command::QueryActiveAreas).await?;
    let areas = match reply {
        Some(Message::ProgramReply { location, value }) if location == "P4076E1" => {
            let parsed = parse_id_csv(&value);
            if parsed.is_empty() {
                // "0" means no areas programmed; area 1 always exists
                BTreeSet::from([1])
            } else {
                parsed.into_iter().filter(|a| *a <= MAX_AREA_ID).collect()
            }
        }
        other => {
            return Err(ArrowheadError::Detection {
                reason: format!("unexpected active-areas reply: {:?}", other),
            });
        }
    };
    debug!("Detected active areas: {:?}", areas);

    let mut detection = RawDetection {
        areas: areas.clone(),
        zones_by_area: BTreeMap::new(),
    };

    for area in areas {
        match engine.send(&Command::QueryZonesInArea { area }).await {
            Ok(Some(Message::ProgramReply { location, value }))
                if location == format!("P4075E{}", area) =>
            {
                let zones = parse_id_csv(&value);
                debug!("Area {} zones: {:?}", area, zones);
                detection.zones_by_area.insert(area, zones);
            }
            Ok(other) => {
                warn!("Unexpected zones-in-area reply for area {}: {:?}", area, other);
            }
            Err(e) => {
                warn!("Zones-in-area query failed for area {}: {}", area, e);
            }
        }
    }

    Ok(detection)
}

/// Merge detection output with manual configuration.
///
/// Resolution policy: a manual specification always wins for its dimension;
/// detection fills in whatever was left unspecified; a dimension with
/// neither falls back to the conservative default and sets the fallback
/// flag.
pub fn resolve(detected: Option<RawDetection>, config: &PanelConfig) -> Topology {
    let detected = detected.filter(|d| !d.is_empty());

    let manual_zones: Option<BTreeSet<u32>> = config.manual_zones.as_ref().map(|sel| {
        sel.ids()
            .into_iter()
            .filter(|z| *z <= config.panel_type.max_zones())
            .collect()
    });
    let manual_areas: Option<BTreeSet<u32>> = config.manual_areas.as_ref().map(|list| {
        list.iter()
            .copied()
            .filter(|a| (1..=MAX_AREA_ID).contains(a))
            .collect()
    });

    let detected_zones = detected.as_ref().map(|d| d.zones()).filter(|z| !z.is_empty());
    let detected_areas = detected
        .as_ref()
        .map(|d| d.areas.clone())
        .filter(|a| !a.is_empty());

    let mut fallback = false;

    let (zones, zones_manual) = match (manual_zones, detected_zones) {
        (Some(m), _) if !m.is_empty() => (m, true),
        (_, Some(d)) => (d, false),
        _ => {
            fallback = true;
            ((1..=DEFAULT_ZONE_COUNT).collect(), false)
        }
    };

    let (areas, areas_manual) = match (manual_areas, detected_areas) {
        (Some(m), _) if !m.is_empty() => (m, true),
        (_, Some(d)) => (d, false),
        _ => {
            fallback = true;
            (BTreeSet::from([1]), false)
        }
    };

    // The detected per-area assignment is only authoritative when both
    // dimensions came from detection; any manual override redistributes.
    let zones_by_area = match &detected {
        Some(d) if !zones_manual && !areas_manual && !d.zones_by_area.is_empty() => d
            .zones_by_area
            .iter()
            .filter(|(area, _)| areas.contains(area))
            .map(|(area, z)| (*area, z.clone()))
            .collect(),
        _ => distribute_zones(&zones, &areas),
    };

    let source = if fallback {
        TopologySource::Default
    } else {
        match (zones_manual, areas_manual) {
            (true, true) => TopologySource::Manual,
            (false, false) => TopologySource::Detected,
            _ => TopologySource::Mixed,
        }
    };

    let expanders = detect_expanders(&zones, config.panel_type);

    Topology {
        zones,
        areas,
        zones_by_area,
        expanders,
        source,
        fallback,
    }
}

/// Split a zone set across areas in contiguous runs, the last area taking
/// the remainder.
fn distribute_zones(zones: &BTreeSet<u32>, areas: &BTreeSet<u32>) -> BTreeMap<u32, BTreeSet<u32>> {
    let mut result = BTreeMap::new();
    if areas.is_empty() {
        return result;
    }
    let zone_list: Vec<u32> = zones.iter().copied().collect();
    let area_list: Vec<u32> = areas.iter().copied().collect();
    let per_area = zone_list.len() / area_list.len();

    for (i, area) in area_list.iter().enumerate() {
        let start = i * per_area;
        let end = if i == area_list.len() - 1 {
            zone_list.len()
        } else {
            (i + 1) * per_area
        };
        result.insert(*area, zone_list[start..end].iter().copied().collect());
    }
    result
}

/// Name the expander blocks that the zone set spans.
fn detect_expanders(zones: &BTreeSet<u32>, panel_type: PanelType) -> Vec<Expander> {
    let mut expanders = Vec::new();
    for (name, (start, end)) in panel_type.expander_ranges() {
        if *name == "main_panel" {
            continue;
        }
        let count = zones.iter().filter(|z| (*start..=*end).contains(z)).count();
        if count > 0 {
            expanders.push(Expander {
                name: (*name).to_string(),
                range: (*start, *end),
                zone_count: count,
            });
        }
    }
    expanders
}

/// Parse a `1,2,3`-style id list; `0` (and anything non-numeric) yields
/// nothing.
fn parse_id_csv(value: &str) -> BTreeSet<u32> {
    value
        .split(',')
        .filter_map(|tok| tok.trim().parse::<u32>().ok())
        .filter(|id| *id != 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PanelConfig, PanelType, ZoneSelection};

    fn eci_config() -> PanelConfig {
        PanelConfig::builder().panel_type(PanelType::Eci).build()
    }

    fn detection(areas: &[u32], zones_by_area: &[(u32, &[u32])]) -> RawDetection {
        RawDetection {
            areas: areas.iter().copied().collect(),
            zones_by_area: zones_by_area
                .iter()
                .map(|(a, z)| (*a, z.iter().copied().collect()))
                .collect(),
        }
    }

    #[test]
    fn test_parse_id_csv() {
        assert_eq!(parse_id_csv("1,2,3"), BTreeSet::from([1, 2, 3]));
        assert_eq!(parse_id_csv("0"), BTreeSet::new());
        assert_eq!(parse_id_csv(" 4 , 5 "), BTreeSet::from([4, 5]));
        assert_eq!(parse_id_csv("1,x,3"), BTreeSet::from([1, 3]));
        assert_eq!(parse_id_csv(""), BTreeSet::new());
    }

    #[test]
    fn test_resolve_pure_detection() {
        let d = detection(&[1, 2], &[(1, &[1, 2, 3]), (2, &[17, 18])]);
        let topo = resolve(Some(d), &eci_config());

        assert_eq!(topo.source, TopologySource::Detected);
        assert!(!topo.fallback);
        assert_eq!(topo.zones, BTreeSet::from([1, 2, 3, 17, 18]));
        assert_eq!(topo.areas, BTreeSet::from([1, 2]));
        assert_eq!(topo.area_of_zone(17), Some(2));
        assert_eq!(topo.area_of_zone(99), None);
    }

    #[test]
    fn test_manual_zones_win_over_detection() {
        let config = PanelConfig::builder()
            .panel_type(PanelType::Eci)
            .manual_zones(ZoneSelection::Range(1, 8))
            .build();
        let d = detection(&[1, 2], &[(1, &[1, 2, 3]), (2, &[17, 18])]);
        let topo = resolve(Some(d), &config);

        assert_eq!(topo.zones, (1..=8).collect::<BTreeSet<u32>>());
        // Areas still come from detection
        assert_eq!(topo.areas, BTreeSet::from([1, 2]));
        assert_eq!(topo.source, TopologySource::Mixed);
        assert!(!topo.fallback);
    }

    #[test]
    fn test_manual_areas_win_over_detection() {
        let config = PanelConfig::builder()
            .panel_type(PanelType::Eci)
            .manual_areas(vec![1])
            .build();
        let d = detection(&[1, 2], &[(1, &[1, 2]), (2, &[3, 4])]);
        let topo = resolve(Some(d), &config);

        assert_eq!(topo.areas, BTreeSet::from([1]));
        assert_eq!(topo.zones, BTreeSet::from([1, 2, 3, 4]));
        // Manual override redistributes: all zones land in area 1
        assert_eq!(topo.area_of_zone(4), Some(1));
    }

    #[test]
    fn test_fully_manual() {
        let config = PanelConfig::builder()
            .panel_type(PanelType::Eci)
            .manual_zones(ZoneSelection::List(vec![1, 2, 3, 4]))
            .manual_areas(vec![1, 2])
            .build();
        let topo = resolve(None, &config);

        assert_eq!(topo.source, TopologySource::Manual);
        assert!(!topo.fallback);
        assert_eq!(topo.zones_by_area[&1], BTreeSet::from([1, 2]));
        assert_eq!(topo.zones_by_area[&2], BTreeSet::from([3, 4]));
    }

    #[test]
    fn test_fallback_when_nothing_known() {
        let topo = resolve(None, &eci_config());

        assert!(topo.fallback);
        assert_eq!(topo.source, TopologySource::Default);
        assert_eq!(topo.zones, (1..=DEFAULT_ZONE_COUNT).collect::<BTreeSet<u32>>());
        assert_eq!(topo.areas, BTreeSet::from([1]));
        assert_eq!(topo.zones_by_area[&1].len(), DEFAULT_ZONE_COUNT as usize);
    }

    #[test]
    fn test_empty_detection_is_fallback() {
        let topo = resolve(Some(RawDetection::default()), &eci_config());
        assert!(topo.fallback);
        assert_eq!(topo.zones, (1..=DEFAULT_ZONE_COUNT).collect::<BTreeSet<u32>>());
    }

    #[test]
    fn test_distribute_remainder_to_last_area() {
        let zones: BTreeSet<u32> = (1..=10).collect();
        let areas = BTreeSet::from([1, 2, 3]);
        let dist = distribute_zones(&zones, &areas);
        assert_eq!(dist[&1], BTreeSet::from([1, 2, 3]));
        assert_eq!(dist[&2], BTreeSet::from([4, 5, 6]));
        assert_eq!(dist[&3], BTreeSet::from([7, 8, 9, 10]));
    }

    #[test]
    fn test_expander_detection() {
        let zones: BTreeSet<u32> = [1, 2, 17, 33, 34].into_iter().collect();
        let expanders = detect_expanders(&zones, PanelType::Eci);
        assert_eq!(expanders.len(), 2);
        assert_eq!(expanders[0].name, "zone_expander_1");
        assert_eq!(expanders[0].zone_count, 1);
        assert_eq!(expanders[1].name, "zone_expander_2");
        assert_eq!(expanders[1].zone_count, 2);
    }

    #[test]
    fn test_manual_zones_clamped_to_panel_limit() {
        let config = PanelConfig::builder()
            .panel_type(PanelType::Esx)
            .manual_zone_range(1, 64)
            .build();
        let topo = resolve(None, &config);
        assert_eq!(*topo.zones.iter().max().unwrap(), 32);
    }
}
