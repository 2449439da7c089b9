use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, ConfigIssue, Feature},
    lwt::DeviationCurve,
    outdoor::OutdoorRange,
    types::{ControllerMode, ThresholdPair},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomConfig {
    pub sensor: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Overrides `threshold_room_needs_heat` for this room.
    #[serde(default)]
    pub need_threshold: Option<f64>,
}

impl RoomConfig {
    pub fn new(sensor: impl Into<String>, weight: f64) -> Self {
        Self {
            sensor: sensor.into(),
            weight,
            need_threshold: None,
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutdoorConfig {
    #[serde(default)]
    pub sensor: Option<String>,
    #[serde(default)]
    pub fallback_sensor: Option<String>,
    #[serde(default)]
    pub ranges: Vec<OutdoorRange>,
    /// Minimum time a matched range stays active before another may replace it.
    /// Zero disables the hold-down.
    #[serde(default = "default_mapping_switch_delay")]
    pub mapping_switch_delay_minutes: u32,
}

fn default_mapping_switch_delay() -> u32 {
    60
}

impl Default for OutdoorConfig {
    fn default() -> Self {
        Self {
            sensor: None,
            fallback_sensor: None,
            ranges: Vec::new(),
            mapping_switch_delay_minutes: default_mapping_switch_delay(),
        }
    }
}

impl OutdoorConfig {
    pub fn is_configured(&self) -> bool {
        (self.sensor.is_some() || self.fallback_sensor.is_some()) && !self.ranges.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LwtConfig {
    pub max_room_setpoint: f64,
    pub deviation_min: f64,
    pub deviation_max: f64,
    pub min_off_time_minutes: u32,
    pub overcapacity_threshold: f64,
    pub overcapacity_duration_minutes: u32,
    pub deviation_curve: DeviationCurve,
}

impl Default for LwtConfig {
    fn default() -> Self {
        Self {
            max_room_setpoint: 22.0,
            deviation_min: -10.0,
            deviation_max: 10.0,
            min_off_time_minutes: 30,
            overcapacity_threshold: 1.0,
            overcapacity_duration_minutes: 60,
            deviation_curve: DeviationCurve::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    pub rooms: Vec<RoomConfig>,
    #[serde(default)]
    pub on_off_switch: Option<String>,
    #[serde(default = "default_before_heat")]
    pub threshold_before_heat: f64,
    #[serde(default = "default_before_off")]
    pub threshold_before_off: f64,
    #[serde(default = "default_room_needs_heat")]
    pub threshold_room_needs_heat: f64,
    #[serde(default = "default_true")]
    pub room_needs_heat_override: bool,
    #[serde(default)]
    pub outdoor: OutdoorConfig,
    #[serde(default)]
    pub lwt: Option<LwtConfig>,
}

fn default_before_heat() -> f64 {
    ThresholdPair::default().before_heat
}

fn default_before_off() -> f64 {
    ThresholdPair::default().before_off
}

fn default_room_needs_heat() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            rooms: Vec::new(),
            on_off_switch: None,
            threshold_before_heat: default_before_heat(),
            threshold_before_off: default_before_off(),
            threshold_room_needs_heat: default_room_needs_heat(),
            room_needs_heat_override: true,
            outdoor: OutdoorConfig::default(),
            lwt: None,
        }
    }
}

impl ControllerConfig {
    pub fn base_thresholds(&self) -> ThresholdPair {
        ThresholdPair::new(self.threshold_before_heat, self.threshold_before_off)
    }

    pub fn room_need_threshold(&self, room: &RoomConfig) -> f64 {
        room.need_threshold.unwrap_or(self.threshold_room_needs_heat)
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let base = self.base_thresholds();
        if !base.is_ordered() {
            issues.push(ConfigIssue::new(
                Feature::BaseThresholds,
                ConfigError::InvertedThresholds {
                    before_heat: base.before_heat,
                    before_off: base.before_off,
                },
            ));
        }

        if self.rooms.is_empty() {
            issues.push(ConfigIssue::new(Feature::Rooms, ConfigError::NoRooms));
        }
        let mut seen = HashSet::new();
        for room in &self.rooms {
            if !(room.weight.is_finite() && room.weight > 0.0) {
                issues.push(ConfigIssue::new(
                    Feature::Rooms,
                    ConfigError::NonPositiveWeight {
                        sensor: room.sensor.clone(),
                        weight: room.weight,
                    },
                ));
            }
            if !seen.insert(room.sensor.as_str()) {
                issues.push(ConfigIssue::new(
                    Feature::Rooms,
                    ConfigError::DuplicateRoom(room.sensor.clone()),
                ));
            }
        }

        issues.extend(
            validate_ranges(&self.outdoor.ranges)
                .into_iter()
                .map(|error| ConfigIssue::new(Feature::OutdoorAdjustment, error)),
        );

        if let Some(lwt) = &self.lwt {
            if !(lwt.deviation_min.is_finite()
                && lwt.deviation_max.is_finite()
                && lwt.deviation_min < lwt.deviation_max)
            {
                issues.push(ConfigIssue::new(
                    Feature::LwtControl,
                    ConfigError::InvertedDeviationBounds {
                        min: lwt.deviation_min,
                        max: lwt.deviation_max,
                    },
                ));
            }
            if !(lwt.max_room_setpoint.is_finite() && lwt.max_room_setpoint > 0.0) {
                issues.push(ConfigIssue::new(
                    Feature::LwtControl,
                    ConfigError::InvalidMaxRoomSetpoint(lwt.max_room_setpoint),
                ));
            }
        }

        issues
    }

    /// Disables every feature that has a fatal issue and returns all issues found.
    pub fn sanitize(&mut self) -> Vec<ConfigIssue> {
        let issues = self.validate();

        for issue in issues.iter().filter(|issue| issue.error.is_fatal()) {
            match issue.feature {
                Feature::BaseThresholds => {
                    let defaults = ThresholdPair::default();
                    self.threshold_before_heat = defaults.before_heat;
                    self.threshold_before_off = defaults.before_off;
                }
                Feature::OutdoorAdjustment => self.outdoor.ranges.clear(),
                Feature::LwtControl => self.lwt = None,
                Feature::Rooms => {}
            }
        }

        issues
    }
}

fn validate_ranges(ranges: &[OutdoorRange]) -> Vec<ConfigError> {
    let mut errors = Vec::new();
    let last = ranges.len().saturating_sub(1);

    for (index, range) in ranges.iter().enumerate() {
        let pair = range.thresholds();
        if !pair.is_ordered() {
            errors.push(ConfigError::InvertedRangeThresholds {
                index,
                before_heat: pair.before_heat,
                before_off: pair.before_off,
            });
        }

        if let (Some(min_temp), Some(max_temp)) = (range.min_temp, range.max_temp) {
            if min_temp >= max_temp {
                errors.push(ConfigError::EmptyRange {
                    index,
                    min_temp,
                    max_temp,
                });
                continue;
            }
        }

        if range.is_catch_all() {
            if index != last {
                errors.push(ConfigError::CatchAllNotLast { index });
            }
            continue;
        }

        // Catch-alls are reported on their own and not counted as overlaps.
        if let Some(previous) = ranges[..index]
            .iter()
            .position(|earlier| !earlier.is_catch_all() && earlier.overlaps(range))
        {
            errors.push(ConfigError::OverlappingRanges { index, previous });
        }
    }

    errors
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSettings {
    pub mode: ControllerMode,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            mode: ControllerMode::Manual,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub mqtt_client_id: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            mqtt_client_id: "heatpump-controller-rust".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_state_publish_interval")]
    pub state_publish_interval_secs: u64,
    #[serde(default = "default_sensor_stale_timeout")]
    pub sensor_stale_timeout_secs: u64,
}

fn default_http_port() -> u16 {
    8080
}

fn default_tick_interval() -> u64 {
    60
}

fn default_state_publish_interval() -> u64 {
    10
}

fn default_sensor_stale_timeout() -> u64 {
    900
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            network: NetworkConfig::default(),
            http_port: default_http_port(),
            tick_interval_secs: default_tick_interval(),
            state_publish_interval_secs: default_state_publish_interval(),
            sensor_stale_timeout_secs: default_sensor_stale_timeout(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) -> Vec<ConfigIssue> {
        self.tick_interval_secs = self.tick_interval_secs.clamp(1, 3_600);
        self.state_publish_interval_secs = self.state_publish_interval_secs.clamp(1, 3_600);
        self.sensor_stale_timeout_secs = self.sensor_stale_timeout_secs.max(self.tick_interval_secs);
        self.controller.sanitize()
    }
}
