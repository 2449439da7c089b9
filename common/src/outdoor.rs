//! Outdoor-temperature-indexed threshold overrides.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{OutdoorSource, ThresholdPair};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutdoorRange {
    #[serde(default)]
    pub min_temp: Option<f64>,
    #[serde(default)]
    pub max_temp: Option<f64>,
    pub threshold_before_heat: f64,
    pub threshold_before_off: f64,
}

impl OutdoorRange {
    pub fn thresholds(&self) -> ThresholdPair {
        ThresholdPair::new(self.threshold_before_heat, self.threshold_before_off)
    }

    pub fn is_catch_all(&self) -> bool {
        self.min_temp.is_none() && self.max_temp.is_none()
    }

    pub fn matches(&self, outdoor_temp: f64) -> bool {
        match (self.min_temp, self.max_temp) {
            (Some(min), Some(max)) => min <= outdoor_temp && outdoor_temp < max,
            (Some(min), None) => outdoor_temp >= min,
            (None, Some(max)) => outdoor_temp < max,
            (None, None) => true,
        }
    }

    pub(crate) fn overlaps(&self, other: &OutdoorRange) -> bool {
        let lower = |range: &OutdoorRange| range.min_temp.unwrap_or(f64::NEG_INFINITY);
        let upper = |range: &OutdoorRange| range.max_temp.unwrap_or(f64::INFINITY);
        lower(self) < upper(other) && lower(other) < upper(self)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutdoorReadings {
    pub primary: Option<f64>,
    pub fallback: Option<f64>,
}

impl OutdoorReadings {
    pub fn select(&self) -> (Option<f64>, OutdoorSource) {
        let usable = |value: Option<f64>| value.filter(|v| v.is_finite());
        if let Some(temp) = usable(self.primary) {
            (Some(temp), OutdoorSource::Primary)
        } else if let Some(temp) = usable(self.fallback) {
            (Some(temp), OutdoorSource::Fallback)
        } else {
            (None, OutdoorSource::Unavailable)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutdoorResolution {
    pub thresholds: ThresholdPair,
    pub outdoor_temp: Option<f64>,
    pub source: OutdoorSource,
    pub matched_range: Option<usize>,
}

/// Picks the thresholds for this tick. The first range that matches wins,
/// even when later ranges overlap it.
pub fn resolve(
    readings: OutdoorReadings,
    ranges: &[OutdoorRange],
    base: ThresholdPair,
) -> OutdoorResolution {
    let (outdoor_temp, source) = readings.select();
    if source == OutdoorSource::Fallback {
        debug!("primary outdoor sensor unavailable, using fallback reading");
    }

    let matched_range =
        outdoor_temp.and_then(|temp| ranges.iter().position(|range| range.matches(temp)));

    let thresholds = matched_range
        .map(|index| ranges[index].thresholds())
        .unwrap_or(base);

    OutdoorResolution {
        thresholds,
        outdoor_temp,
        source,
        matched_range,
    }
}

/// Holds the active range for a minimum time before switching to another one.
#[derive(Debug, Clone, Default)]
pub struct OutdoorThresholdResolver {
    switch_delay: Duration,
    active: Option<usize>,
    last_change: Option<DateTime<Utc>>,
}

impl OutdoorThresholdResolver {
    pub fn new(switch_delay_minutes: u32) -> Self {
        Self {
            switch_delay: Duration::minutes(i64::from(switch_delay_minutes)),
            active: None,
            last_change: None,
        }
    }

    pub fn active_range(&self) -> Option<usize> {
        self.active
    }

    pub fn clear(&mut self) {
        self.active = None;
        self.last_change = None;
    }

    pub fn resolve(
        &mut self,
        readings: OutdoorReadings,
        ranges: &[OutdoorRange],
        base: ThresholdPair,
        now: DateTime<Utc>,
    ) -> OutdoorResolution {
        let mut resolution = resolve(readings, ranges, base);

        let Some(candidate) = resolution.matched_range else {
            if self.active.is_some() {
                debug!("clearing active outdoor range (no outdoor data or no match)");
            }
            self.clear();
            return resolution;
        };

        if self.active == Some(candidate) {
            return resolution;
        }

        if let (Some(active), Some(last_change)) = (self.active, self.last_change) {
            let since = now - last_change;
            if since < self.switch_delay && active < ranges.len() {
                debug!(
                    active,
                    candidate,
                    seconds_since_change = since.num_seconds(),
                    "suppressing outdoor range switch"
                );
                resolution.matched_range = Some(active);
                resolution.thresholds = ranges[active].thresholds();
                return resolution;
            }
        }

        info!(
            outdoor_temp = resolution.outdoor_temp,
            range = candidate,
            before_heat = resolution.thresholds.before_heat,
            before_off = resolution.thresholds.before_off,
            "applying outdoor threshold override"
        );
        self.active = Some(candidate);
        self.last_change = Some(now);
        resolution
    }
}
