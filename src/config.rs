// MIT License - Copyright (c) 2026 Peter Wright

use std::collections::HashMap;

use crate::error::{ArrowheadError, Result};

/// Panel family.
///
/// Replaces the per-panel config dictionaries of the original integration.
/// The two families speak the same line protocol but differ in device limits,
/// RF supervision support, and whether zone topology must be probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelType {
    /// ESX Elite-SX: 32 zones, 16 outputs, RF supervision, fixed topology
    Esx,
    /// ECi Series: up to 248 zones, 32 outputs, program-location topology detection
    Eci,
}

impl PanelType {
    /// Maximum zone id the panel family can address.
    pub fn max_zones(&self) -> u32 {
        match self {
            Self::Esx => 32,
            Self::Eci => 248,
        }
    }

    /// Maximum output id the panel family can address.
    pub fn max_outputs(&self) -> u32 {
        match self {
            Self::Esx => 16,
            Self::Eci => 32,
        }
    }

    /// Whether the panel reports RF zone supervision (ZSA/ZSR, RIF/RIR...).
    pub fn supports_rf(&self) -> bool {
        matches!(self, Self::Esx)
    }

    /// Whether zone/area topology can be queried from program locations.
    pub fn supports_detection(&self) -> bool {
        matches!(self, Self::Eci)
    }

    /// Silence window after which a STATUS liveness poll is sent.
    pub fn default_liveness_window_ms(&self) -> u64 {
        match self {
            Self::Esx => 45_000,
            Self::Eci => 60_000,
        }
    }

    /// How long to wait for the login banner before assuming direct mode.
    pub fn default_auth_timeout_ms(&self) -> u64 {
        match self {
            Self::Esx => 5_000,
            Self::Eci => 3_000,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Esx => "ESX Elite-SX",
            Self::Eci => "ECi Series",
        }
    }

    /// Zone ranges covered by the main panel and each zone expander.
    ///
    /// Zones 1-16 live on the main board; expanders add 16-zone blocks
    /// (the last ECi block is truncated at the 248-zone limit).
    pub fn expander_ranges(&self) -> &'static [(&'static str, (u32, u32))] {
        match self {
            Self::Esx => &[("main_panel", (1, 16)), ("expander_1", (17, 32))],
            Self::Eci => &[
                ("main_panel", (1, 16)),
                ("zone_expander_1", (17, 32)),
                ("zone_expander_2", (33, 48)),
                ("zone_expander_3", (49, 64)),
                ("zone_expander_4", (65, 80)),
                ("zone_expander_5", (81, 96)),
                ("zone_expander_6", (97, 112)),
                ("zone_expander_7", (113, 128)),
                ("zone_expander_8", (129, 144)),
                ("zone_expander_9", (145, 160)),
                ("zone_expander_10", (161, 176)),
                ("zone_expander_11", (177, 192)),
                ("zone_expander_12", (193, 208)),
                ("zone_expander_13", (209, 224)),
                ("zone_expander_14", (225, 240)),
                ("zone_expander_15", (241, 248)),
            ],
        }
    }
}

/// Highest zone id any panel in the family can address.
pub const MAX_ZONE_ID: u32 = 248;

/// Highest area id the protocol can address.
pub const MAX_AREA_ID: u32 = 32;

/// Highest output id the protocol can address.
pub const MAX_OUTPUT_ID: u32 = 32;

/// Arm mode for arming commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmMode {
    /// Full/away arm
    Away,
    /// Partial/stay/home arm
    Stay,
}

/// A user number plus PIN, as required by disarm commands.
///
/// The wire format is `<user> <pin>`; a bare PIN with no user number is
/// interpreted as user 1, matching the panel keypads' default user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCode {
    pub user: u32,
    pub pin: String,
}

impl UserCode {
    /// Parse a user code string: `"5 4321"` → user 5, pin 4321; `"4321"` →
    /// user 1, pin 4321.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let first = parts.next().ok_or_else(|| ArrowheadError::InvalidUserCode {
            reason: "empty user code".to_string(),
        })?;

        match parts.next() {
            Some(pin) => {
                let user: u32 =
                    first
                        .parse()
                        .map_err(|_| ArrowheadError::InvalidUserCode {
                            reason: format!("user number '{}' is not numeric", first),
                        })?;
                if user == 0 {
                    return Err(ArrowheadError::InvalidUserCode {
                        reason: "user number must be at least 1".to_string(),
                    });
                }
                Ok(Self {
                    user,
                    pin: pin.to_string(),
                })
            }
            None => {
                if !first.chars().all(|c| c.is_ascii_digit()) {
                    return Err(ArrowheadError::InvalidUserCode {
                        reason: format!("PIN '{}' is not numeric", first),
                    });
                }
                Ok(Self {
                    user: 1,
                    pin: first.to_string(),
                })
            }
        }
    }

    /// The `<user> <pin>` wire fragment.
    pub fn wire(&self) -> String {
        format!("{} {}", self.user, self.pin)
    }
}

/// Manual zone specification: a contiguous range or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneSelection {
    Range(u32, u32),
    List(Vec<u32>),
}

impl ZoneSelection {
    /// Expand to the sorted, deduplicated set of zone ids, dropping any id
    /// outside 1..=248.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = match self {
            Self::Range(lo, hi) => (*lo..=*hi).collect(),
            Self::List(list) => list.clone(),
        };
        ids.retain(|z| (1..=MAX_ZONE_ID).contains(z));
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Configuration for a panel session.
///
/// Owned and populated by the caller (the integration layer); the library
/// never reads configuration from disk.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub panel_type: PanelType,
    /// Panel IP address or hostname
    pub host: String,
    /// Panel automation TCP port (default: 9000)
    pub port: u16,
    /// Login username, if the panel's port is login-protected
    pub username: String,
    /// Login password
    pub password: String,
    /// Default user code for disarm commands (`"<user> <pin>"` or bare PIN)
    pub user_code: String,
    /// Whether to probe program locations for zone/area topology
    pub auto_detect: bool,
    /// Manual zone specification; always wins over detection when present
    pub manual_zones: Option<ZoneSelection>,
    /// Manual area list; always wins over detection when present
    pub manual_areas: Option<Vec<u32>>,
    /// Zones that never report open/close and are seeded as sealed
    pub sealed_zones: Vec<u32>,
    /// Display name overrides per zone
    pub zone_names: HashMap<u32, String>,
    /// Number of outputs to model (outputs are configured, not discovered)
    pub outputs: u32,
    /// Interval of the periodic STATUS refresh
    pub scan_interval_ms: u64,
    /// Silence window before a liveness STATUS poll (default per panel type)
    pub liveness_window_ms: Option<u64>,
    /// Silence window after which the socket is considered dead
    pub idle_timeout_ms: u64,
    /// TCP connect timeout
    pub connect_timeout_ms: u64,
    /// Wait for the login banner / auth exchanges (default per panel type)
    pub auth_timeout_ms: Option<u64>,
    /// Per-command acknowledgement timeout
    pub command_timeout_ms: u64,
    /// Base delay for exponential reconnect backoff
    pub reconnect_base_delay_ms: u64,
    /// Cap for the reconnect backoff
    pub reconnect_max_delay_ms: u64,
    /// Maximum reconnect attempts before reporting persistent failure
    /// (`None` = retry indefinitely)
    pub max_reconnect_attempts: Option<u32>,
    /// A connection that survives this long resets the backoff schedule
    pub backoff_reset_after_ms: u64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            panel_type: PanelType::Esx,
            host: "192.168.0.50".to_string(),
            port: 9000,
            username: "admin".to_string(),
            password: "admin".to_string(),
            user_code: "1 123".to_string(),
            auto_detect: true,
            manual_zones: None,
            manual_areas: None,
            sealed_zones: Vec::new(),
            zone_names: HashMap::new(),
            outputs: 4,
            scan_interval_ms: 30_000,
            liveness_window_ms: None,
            idle_timeout_ms: 120_000,
            connect_timeout_ms: 10_000,
            auth_timeout_ms: None,
            command_timeout_ms: 5_000,
            reconnect_base_delay_ms: 10_000,
            reconnect_max_delay_ms: 300_000,
            max_reconnect_attempts: Some(5),
            backoff_reset_after_ms: 60_000,
        }
    }
}

impl PanelConfig {
    pub fn builder() -> PanelConfigBuilder {
        PanelConfigBuilder::default()
    }

    /// Effective liveness window, falling back to the panel-type default.
    pub fn liveness_window_ms(&self) -> u64 {
        self.liveness_window_ms
            .unwrap_or_else(|| self.panel_type.default_liveness_window_ms())
    }

    /// Effective auth timeout, falling back to the panel-type default.
    pub fn auth_timeout_ms(&self) -> u64 {
        self.auth_timeout_ms
            .unwrap_or_else(|| self.panel_type.default_auth_timeout_ms())
    }

    /// Display name for a zone: configured override or `Zone 001` style.
    pub fn zone_name(&self, zone: u32) -> String {
        self.zone_names
            .get(&zone)
            .cloned()
            .unwrap_or_else(|| format!("Zone {:03}", zone))
    }
}

/// Builder for [`PanelConfig`].
#[derive(Debug, Clone, Default)]
pub struct PanelConfigBuilder {
    config: PanelConfig,
}

impl PanelConfigBuilder {
    pub fn panel_type(mut self, panel_type: PanelType) -> Self {
        self.config.panel_type = panel_type;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    pub fn user_code(mut self, code: impl Into<String>) -> Self {
        self.config.user_code = code.into();
        self
    }

    pub fn auto_detect(mut self, auto_detect: bool) -> Self {
        self.config.auto_detect = auto_detect;
        self
    }

    pub fn manual_zones(mut self, zones: ZoneSelection) -> Self {
        self.config.manual_zones = Some(zones);
        self
    }

    pub fn manual_zone_range(mut self, lo: u32, hi: u32) -> Self {
        self.config.manual_zones = Some(ZoneSelection::Range(lo, hi));
        self
    }

    pub fn manual_areas(mut self, areas: Vec<u32>) -> Self {
        self.config.manual_areas = Some(areas);
        self
    }

    pub fn sealed_zones(mut self, zones: Vec<u32>) -> Self {
        self.config.sealed_zones = zones;
        self
    }

    pub fn zone_name(mut self, zone: u32, name: impl Into<String>) -> Self {
        self.config.zone_names.insert(zone, name.into());
        self
    }

    pub fn outputs(mut self, outputs: u32) -> Self {
        self.config.outputs = outputs;
        self
    }

    pub fn scan_interval_ms(mut self, ms: u64) -> Self {
        self.config.scan_interval_ms = ms;
        self
    }

    pub fn liveness_window_ms(mut self, ms: u64) -> Self {
        self.config.liveness_window_ms = Some(ms);
        self
    }

    pub fn idle_timeout_ms(mut self, ms: u64) -> Self {
        self.config.idle_timeout_ms = ms;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn auth_timeout_ms(mut self, ms: u64) -> Self {
        self.config.auth_timeout_ms = Some(ms);
        self
    }

    pub fn command_timeout_ms(mut self, ms: u64) -> Self {
        self.config.command_timeout_ms = ms;
        self
    }

    pub fn reconnect_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_base_delay_ms = ms;
        self
    }

    pub fn reconnect_max_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_max_delay_ms = ms;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    pub fn backoff_reset_after_ms(mut self, ms: u64) -> Self {
        self.config.backoff_reset_after_ms = ms;
        self
    }

    pub fn build(self) -> PanelConfig {
        self.config
    }
}

/// Compare two dotted version strings (e.g. "10.3.50" vs "10.3.49").
///
/// Returns: positive if v1 > v2, 0 if equal, negative if v1 < v2.
pub fn compare_version(v1: &str, v2: &str) -> i32 {
    if v1 == v2 {
        return 0;
    }
    let parts1: Vec<i32> = v1.split('.').filter_map(|s| s.parse().ok()).collect();
    let parts2: Vec<i32> = v2.split('.').filter_map(|s| s.parse().ok()).collect();
    let len = parts1.len().min(parts2.len());
    for i in 0..len {
        if parts1[i] > parts2[i] {
            return 1;
        }
        if parts1[i] < parts2[i] {
            return -1;
        }
    }
    // If all compared parts are equal, longer version is greater
    (parts1.len() as i32) - (parts2.len() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_version() {
        assert_eq!(compare_version("10.3.50", "10.3.50"), 0);
        assert!(compare_version("10.3.51", "10.3.50") > 0);
        assert!(compare_version("10.3.49", "10.3.50") < 0);
        assert!(compare_version("10.4", "10.3.50") > 0);
        assert!(compare_version("9.9.99", "10.3.50") < 0);
        assert!(compare_version("10.3", "10.3.50") < 0);
    }

    #[test]
    fn test_user_code_parse_user_and_pin() {
        let code = UserCode::parse("5 4321").unwrap();
        assert_eq!(code.user, 5);
        assert_eq!(code.pin, "4321");
        assert_eq!(code.wire(), "5 4321");
    }

    #[test]
    fn test_user_code_bare_pin_defaults_to_user_1() {
        let code = UserCode::parse("123").unwrap();
        assert_eq!(code.user, 1);
        assert_eq!(code.pin, "123");
        assert_eq!(code.wire(), "1 123");
    }

    #[test]
    fn test_user_code_rejects_garbage() {
        assert!(UserCode::parse("").is_err());
        assert!(UserCode::parse("   ").is_err());
        assert!(UserCode::parse("abc").is_err());
        assert!(UserCode::parse("x 123").is_err());
        assert!(UserCode::parse("0 123").is_err());
    }

    #[test]
    fn test_zone_selection_range() {
        assert_eq!(ZoneSelection::Range(1, 4).ids(), vec![1, 2, 3, 4]);
        // Out-of-protocol ids are dropped
        assert_eq!(ZoneSelection::Range(247, 300).ids(), vec![247, 248]);
    }

    #[test]
    fn test_zone_selection_list_dedup() {
        assert_eq!(
            ZoneSelection::List(vec![3, 1, 3, 0, 249]).ids(),
            vec![1, 3]
        );
    }

    #[test]
    fn test_panel_type_profiles() {
        assert_eq!(PanelType::Esx.max_zones(), 32);
        assert_eq!(PanelType::Eci.max_zones(), 248);
        assert!(PanelType::Esx.supports_rf());
        assert!(!PanelType::Eci.supports_rf());
        assert!(PanelType::Eci.supports_detection());
        assert!(!PanelType::Esx.supports_detection());
    }

    #[test]
    fn test_expander_ranges_cover_max_zones() {
        for pt in [PanelType::Esx, PanelType::Eci] {
            let last = pt.expander_ranges().last().unwrap();
            assert_eq!(last.1.1, pt.max_zones());
        }
    }

    #[test]
    fn test_config_builder() {
        let config = PanelConfig::builder()
            .panel_type(PanelType::Eci)
            .host("10.0.0.1")
            .port(9001)
            .user_code("2 9999")
            .sealed_zones(vec![7])
            .manual_zone_range(1, 24)
            .build();

        assert_eq!(config.panel_type, PanelType::Eci);
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, 9001);
        assert_eq!(config.sealed_zones, vec![7]);
        assert_eq!(config.manual_zones, Some(ZoneSelection::Range(1, 24)));
        // Panel-type defaults apply when not overridden
        assert_eq!(config.auth_timeout_ms(), 3_000);
        assert_eq!(config.liveness_window_ms(), 60_000);
    }

    #[test]
    fn test_zone_name_padding_and_override() {
        let config = PanelConfig::builder().zone_name(3, "Front Door").build();
        assert_eq!(config.zone_name(3), "Front Door");
        assert_eq!(config.zone_name(12), "Zone 012");
    }
}
