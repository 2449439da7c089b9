use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    BaseThresholds,
    Rooms,
    OutdoorAdjustment,
    LwtControl,
}

impl Feature {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BaseThresholds => "base thresholds",
            Self::Rooms => "rooms",
            Self::OutdoorAdjustment => "outdoor adjustment",
            Self::LwtControl => "lwt control",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("threshold_before_off ({before_off}) must be below threshold_before_heat ({before_heat})")]
    InvertedThresholds { before_heat: f64, before_off: f64 },

    #[error("outdoor range {index}: threshold_before_off ({before_off}) must be below threshold_before_heat ({before_heat})")]
    InvertedRangeThresholds {
        index: usize,
        before_heat: f64,
        before_off: f64,
    },

    #[error("outdoor range {index}: min_temp {min_temp} must be below max_temp {max_temp}")]
    EmptyRange {
        index: usize,
        min_temp: f64,
        max_temp: f64,
    },

    #[error("outdoor range {index} overlaps range {previous}")]
    OverlappingRanges { index: usize, previous: usize },

    #[error("outdoor range {index} matches every temperature but is not the last entry")]
    CatchAllNotLast { index: usize },

    #[error("lwt_deviation_min ({min}) must be below lwt_deviation_max ({max})")]
    InvertedDeviationBounds { min: f64, max: f64 },

    #[error("max_room_setpoint must be a positive temperature, got {0}")]
    InvalidMaxRoomSetpoint(f64),

    #[error("room {sensor} has non-positive weight {weight}")]
    NonPositiveWeight { sensor: String, weight: f64 },

    #[error("room {0} is configured more than once")]
    DuplicateRoom(String),

    #[error("no rooms configured")]
    NoRooms,
}

impl ConfigError {
    /// Fatal issues disable the affected feature; the rest are reported and tolerated.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvertedThresholds { .. }
                | Self::InvertedRangeThresholds { .. }
                | Self::EmptyRange { .. }
                | Self::InvertedDeviationBounds { .. }
                | Self::InvalidMaxRoomSetpoint(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigIssue {
    pub feature: Feature,
    pub error: ConfigError,
}

impl ConfigIssue {
    pub fn new(feature: Feature, error: ConfigError) -> Self {
        Self { feature, error }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("unknown controller mode: {0}")]
    UnknownMode(String),

    #[error("lwt control is not configured")]
    LwtNotConfigured,

    #[error("pause duration must be positive, got {0} minutes")]
    InvalidPauseDuration(i64),
}
