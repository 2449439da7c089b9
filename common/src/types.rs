use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerMode {
    #[default]
    Manual,
    WeightedAverage,
    WeightedAverageOutdoor,
    LwtControl,
}

impl ControllerMode {
    pub const ALL: [ControllerMode; 4] = [
        Self::Manual,
        Self::WeightedAverage,
        Self::WeightedAverageOutdoor,
        Self::LwtControl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::WeightedAverage => "weighted_average",
            Self::WeightedAverageOutdoor => "weighted_average_outdoor",
            Self::LwtControl => "lwt_control",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Manual => "Manual",
            Self::WeightedAverage => "Weighted Average",
            Self::WeightedAverageOutdoor => "Weighted Average with Outdoor Temp",
            Self::LwtControl => "LWT Control",
        }
    }

    pub fn uses_decision_engine(self) -> bool {
        !matches!(self, Self::LwtControl)
    }
}

impl fmt::Display for ControllerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControllerMode {
    type Err = ControllerError;

    // Accepts either the wire name or the operator-facing label.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|mode| {
                mode.as_str().eq_ignore_ascii_case(trimmed)
                    || mode.label().eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| ControllerError::UnknownMode(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HvacAction {
    #[default]
    Off,
    Heat,
}

impl HvacAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Heat => "HEAT",
        }
    }

    pub fn is_heating(self) -> bool {
        self == Self::Heat
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub before_heat: f64,
    pub before_off: f64,
}

impl ThresholdPair {
    pub const fn new(before_heat: f64, before_off: f64) -> Self {
        Self {
            before_heat,
            before_off,
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.before_heat.is_finite()
            && self.before_off.is_finite()
            && self.before_off < self.before_heat
    }
}

impl Default for ThresholdPair {
    fn default() -> Self {
        Self::new(0.07, 0.007)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    HeatOn,
    HeatOff,
    SetDeviation(f64),
    SetRoomSetpoint { room: String, setpoint: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutdoorSource {
    Primary,
    Fallback,
    Unavailable,
}

impl OutdoorSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub mode: ControllerMode,
    pub hvac_action: HvacAction,
    pub avg_current_temp: Option<f64>,
    pub avg_target_temp: Option<f64>,
    pub avg_needed_temp: f64,
    pub any_room_needs_heat: bool,
    pub rooms_below_target: usize,
    pub available_rooms: usize,
    pub threshold_before_heat: f64,
    pub threshold_before_off: f64,
    pub outdoor_temp: Option<f64>,
    pub outdoor_source: Option<OutdoorSource>,
    pub outdoor_range_index: Option<usize>,
    pub outdoor_range: Option<serde_json::Value>,
    pub lwt_deviation: Option<f64>,
    /// Overcapacity has lasted the configured duration.
    pub lwt_overcapacity: Option<bool>,
    /// Overcapacity holds but the duration has not elapsed yet.
    pub lwt_overcapacity_pending: Option<bool>,
    pub lwt_overcapacity_since: Option<DateTime<Utc>>,
    pub lwt_off_remaining_min: Option<f64>,
    pub paused: bool,
    pub pause_until: Option<DateTime<Utc>>,
}
