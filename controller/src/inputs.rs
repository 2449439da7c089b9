use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use heatpump_common::{
    topics::{InboundTopic, RoomField},
    LwtReadings, OutdoorReadings, RoomValues, TickInputs,
};

/// Payloads that mean the upstream entity has no value right now.
const UNAVAILABLE_PAYLOADS: [&str; 4] = ["unavailable", "unknown", "none", "null"];

pub fn parse_reading(payload: &str) -> Option<f64> {
    let trimmed = payload.trim();
    if trimmed.is_empty()
        || UNAVAILABLE_PAYLOADS
            .iter()
            .any(|marker| trimmed.eq_ignore_ascii_case(marker))
    {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f64,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
struct RoomSamples {
    current: Option<Sample>,
    target: Option<Sample>,
    setpoint: Option<Sample>,
}

/// Last reading per input, timestamped so old values expire.
#[derive(Debug)]
pub struct SensorCache {
    stale_after: Duration,
    rooms: HashMap<String, RoomSamples>,
    outdoor_primary: Option<Sample>,
    outdoor_fallback: Option<Sample>,
    lwt_actual: Option<Sample>,
    lwt_setpoint: Option<Sample>,
}

impl SensorCache {
    pub fn new(stale_after_secs: u64) -> Self {
        Self {
            stale_after: Duration::seconds(i64::try_from(stale_after_secs).unwrap_or(i64::MAX)),
            rooms: HashMap::new(),
            outdoor_primary: None,
            outdoor_fallback: None,
            lwt_actual: None,
            lwt_setpoint: None,
        }
    }

    /// Stores a reading. Unparseable payloads clear the previous value.
    /// Returns `false` for topics that are not readings.
    pub fn record(&mut self, topic: InboundTopic<'_>, payload: &str, now: DateTime<Utc>) -> bool {
        let sample = parse_reading(payload).map(|value| Sample { value, at: now });
        if sample.is_none() {
            debug!(?topic, payload, "reading unavailable");
        }

        let slot = match topic {
            InboundTopic::Room { room, field } => {
                let samples = self.rooms.entry(room.to_string()).or_default();
                match field {
                    RoomField::Current => &mut samples.current,
                    RoomField::Target => &mut samples.target,
                    RoomField::Setpoint => &mut samples.setpoint,
                }
            }
            InboundTopic::OutdoorPrimary => &mut self.outdoor_primary,
            InboundTopic::OutdoorFallback => &mut self.outdoor_fallback,
            InboundTopic::LwtActual => &mut self.lwt_actual,
            InboundTopic::LwtSetpoint => &mut self.lwt_setpoint,
            InboundTopic::Mode | InboundTopic::Pause => return false,
        };
        *slot = sample;
        true
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> TickInputs {
        let fresh = |sample: Option<Sample>| {
            sample
                .filter(|sample| now - sample.at <= self.stale_after)
                .map(|sample| sample.value)
        };

        let rooms = self
            .rooms
            .iter()
            .map(|(room, samples)| {
                (
                    room.clone(),
                    RoomValues {
                        current_temp: fresh(samples.current),
                        target_temp: fresh(samples.target),
                        setpoint: fresh(samples.setpoint),
                    },
                )
            })
            .collect();

        TickInputs {
            rooms,
            outdoor: OutdoorReadings {
                primary: fresh(self.outdoor_primary),
                fallback: fresh(self.outdoor_fallback),
            },
            lwt: LwtReadings {
                actual: fresh(self.lwt_actual),
                setpoint: fresh(self.lwt_setpoint),
            },
        }
    }
}
