//! Leaving-water-temperature control: maps heat need to a deviation setpoint and
//! protects the heat pump from running at overcapacity.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    aggregate::{AggregateSignals, RoomReading},
    config::LwtConfig,
    types::EngineAction,
};

const DEVIATION_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviationCurve {
    /// `need_span` degrees of need drive the deviation to the bound on that side.
    Proportional { need_span: f64 },
    /// (need, deviation) points, interpolated linearly and held flat past the ends.
    Piecewise { points: Vec<(f64, f64)> },
}

impl Default for DeviationCurve {
    fn default() -> Self {
        Self::Proportional { need_span: 1.0 }
    }
}

impl DeviationCurve {
    pub fn map(&self, need: f64, min: f64, max: f64) -> f64 {
        let raw = match self {
            Self::Proportional { need_span } => {
                let span = if need_span.is_finite() && *need_span > 0.0 {
                    *need_span
                } else {
                    1.0
                };
                let fraction = (need / span).clamp(-1.0, 1.0);
                if fraction >= 0.0 {
                    fraction * max.max(0.0)
                } else {
                    fraction * min.min(0.0).abs()
                }
            }
            Self::Piecewise { points } => interpolate(points, need),
        };
        // Bounds are not ordered in an unsanitized config.
        raw.max(min).min(max)
    }
}

fn interpolate(points: &[(f64, f64)], need: f64) -> f64 {
    let mut sorted: Vec<(f64, f64)> = points
        .iter()
        .copied()
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let (Some(first), Some(last)) = (sorted.first(), sorted.last()) else {
        return 0.0;
    };
    if need <= first.0 {
        return first.1;
    }
    if need >= last.0 {
        return last.1;
    }

    sorted
        .windows(2)
        .find(|pair| need >= pair[0].0 && need <= pair[1].0)
        .map(|pair| {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if x1 == x0 {
                y1
            } else {
                y0 + (need - x0) * (y1 - y0) / (x1 - x0)
            }
        })
        .unwrap_or(last.1)
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LwtReadings {
    pub actual: Option<f64>,
    pub setpoint: Option<f64>,
}

impl LwtReadings {
    fn difference(&self) -> Option<f64> {
        let actual = self.actual.filter(|v| v.is_finite())?;
        let setpoint = self.setpoint.filter(|v| v.is_finite())?;
        Some(actual - setpoint)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LwtState {
    pub deviation: f64,
    pub saved_room_setpoints: Option<BTreeMap<String, f64>>,
    pub overcapacity_since: Option<DateTime<Utc>>,
    pub last_off_at: Option<DateTime<Utc>>,
    pub previous_avg_current_temp: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct LwtController {
    config: LwtConfig,
    state: LwtState,
    written_deviation: Option<f64>,
    heat_on: bool,
}

impl LwtController {
    pub fn new(config: LwtConfig) -> Self {
        Self {
            config,
            state: LwtState::default(),
            written_deviation: None,
            heat_on: false,
        }
    }

    pub fn config(&self) -> &LwtConfig {
        &self.config
    }

    pub fn state(&self) -> &LwtState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.saved_room_setpoints.is_some()
    }

    pub fn deviation(&self) -> f64 {
        self.state.deviation
    }

    /// The overcapacity condition holds but has not lasted the full duration yet.
    pub fn overcapacity_pending(&self) -> bool {
        self.state.overcapacity_since.is_some()
    }

    pub fn overcapacity_since(&self) -> Option<DateTime<Utc>> {
        self.state.overcapacity_since
    }

    /// The condition has held for at least `overcapacity_duration_minutes`.
    pub fn is_overcapacity(&self, now: DateTime<Utc>) -> bool {
        self.state
            .overcapacity_since
            .is_some_and(|since| now - since >= self.overcapacity_duration())
    }

    pub fn heat_on(&self) -> bool {
        self.heat_on
    }

    /// Minutes left before a forced-off heat pump may restart, if it is forced off.
    pub fn off_remaining_minutes(&self, now: DateTime<Utc>) -> Option<f64> {
        if self.heat_on {
            return None;
        }
        let last_off = self.state.last_off_at?;
        let remaining = self.min_off_time() - (now - last_off);
        Some((remaining.num_seconds() as f64 / 60.0).max(0.0))
    }

    /// Saves the room setpoints and pushes those rooms to the maximum so the
    /// water temperature alone regulates the house. Rooms without a known
    /// setpoint are left alone until [`Self::capture_rooms`] sees one.
    pub fn activate(&mut self, rooms: &[RoomReading], heat_on: bool) -> Vec<EngineAction> {
        if self.is_active() {
            return Vec::new();
        }

        self.state.saved_room_setpoints = Some(BTreeMap::new());
        let mut actions = self.capture_rooms(rooms);
        info!(
            rooms = actions.len(),
            max_room_setpoint = self.config.max_room_setpoint,
            "entering lwt control, saved room setpoints"
        );

        self.heat_on = heat_on;
        if !self.heat_on {
            actions.push(EngineAction::HeatOn);
            self.heat_on = true;
        }
        actions
    }

    /// Saves and overrides every room whose setpoint is known but not yet saved.
    pub fn capture_rooms(&mut self, rooms: &[RoomReading]) -> Vec<EngineAction> {
        let max_room_setpoint = self.config.max_room_setpoint;
        let Some(saved) = self.state.saved_room_setpoints.as_mut() else {
            return Vec::new();
        };

        let mut actions = Vec::new();
        for room in rooms {
            if saved.contains_key(&room.sensor_id) {
                continue;
            }
            let Some(setpoint) = room.setpoint() else {
                continue;
            };
            debug!(room = %room.sensor_id, setpoint, "saving room setpoint");
            saved.insert(room.sensor_id.clone(), setpoint);
            actions.push(EngineAction::SetRoomSetpoint {
                room: room.sensor_id.clone(),
                setpoint: max_room_setpoint,
            });
        }
        actions
    }

    /// Restores the saved room setpoints. Returns the restore commands and
    /// whether the heat pump is left running.
    pub fn deactivate(&mut self) -> (Vec<EngineAction>, bool) {
        let Some(saved) = self.state.saved_room_setpoints.take() else {
            return (Vec::new(), self.heat_on);
        };
        info!(rooms = saved.len(), "leaving lwt control, restoring room setpoints");

        let actions = saved
            .into_iter()
            .map(|(room, setpoint)| EngineAction::SetRoomSetpoint { room, setpoint })
            .collect();

        self.state.overcapacity_since = None;
        self.state.last_off_at = None;
        self.state.previous_avg_current_temp = None;
        self.written_deviation = None;
        (actions, self.heat_on)
    }

    pub fn tick(
        &mut self,
        now: DateTime<Utc>,
        signals: &AggregateSignals,
        readings: LwtReadings,
    ) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        let trending_down = self.update_trend(signals.avg_current_temp);
        self.update_deviation(signals.avg_needed_temp, &mut actions);

        if self.heat_on {
            self.check_overcapacity(now, readings, &mut actions);
        } else if self.restart_allowed(now, signals, trending_down) {
            info!(
                avg_needed_temp = signals.avg_needed_temp,
                "restarting heat pump after forced off"
            );
            actions.push(EngineAction::HeatOn);
            self.heat_on = true;
        }

        actions
    }

    fn min_off_time(&self) -> Duration {
        Duration::minutes(i64::from(self.config.min_off_time_minutes))
    }

    fn overcapacity_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.config.overcapacity_duration_minutes))
    }

    fn update_trend(&mut self, avg_current_temp: Option<f64>) -> bool {
        let Some(current) = avg_current_temp.filter(|v| v.is_finite()) else {
            return false;
        };
        let trending_down = self
            .state
            .previous_avg_current_temp
            .is_some_and(|previous| current < previous);
        self.state.previous_avg_current_temp = Some(current);
        trending_down
    }

    fn update_deviation(&mut self, need: f64, actions: &mut Vec<EngineAction>) {
        let deviation = self.config.deviation_curve.map(
            need,
            self.config.deviation_min,
            self.config.deviation_max,
        );
        self.state.deviation = deviation;

        let changed = self
            .written_deviation
            .map_or(true, |written| (written - deviation).abs() > DEVIATION_EPSILON);
        if changed {
            debug!(avg_needed_temp = need, deviation, "writing lwt deviation");
            actions.push(EngineAction::SetDeviation(deviation));
            self.written_deviation = Some(deviation);
        }
    }

    fn check_overcapacity(
        &mut self,
        now: DateTime<Utc>,
        readings: LwtReadings,
        actions: &mut Vec<EngineAction>,
    ) {
        let Some(difference) = readings.difference() else {
            if self.state.overcapacity_since.take().is_some() {
                warn!("lwt readings unavailable, overcapacity tracking reset");
            } else {
                debug!("lwt readings unavailable, skipping overcapacity check");
            }
            return;
        };

        let at_minimum = self.state.deviation <= self.config.deviation_min + DEVIATION_EPSILON;
        if !(difference > self.config.overcapacity_threshold && at_minimum) {
            if self.state.overcapacity_since.take().is_some() {
                info!(difference, "overcapacity condition cleared");
            }
            return;
        }

        self.state.overcapacity_since.get_or_insert_with(|| {
            info!(difference, "overcapacity detected");
            now
        });
        if self.is_overcapacity(now) {
            warn!(
                difference,
                minutes = self.config.overcapacity_duration_minutes,
                "sustained overcapacity, turning heat pump off"
            );
            actions.push(EngineAction::HeatOff);
            self.heat_on = false;
            self.state.last_off_at = Some(now);
            self.state.overcapacity_since = None;
        }
    }

    fn restart_allowed(
        &self,
        now: DateTime<Utc>,
        signals: &AggregateSignals,
        trending_down: bool,
    ) -> bool {
        let off_long_enough = self
            .state
            .last_off_at
            .map_or(true, |last_off| now - last_off >= self.min_off_time());
        let needs_heat = signals.avg_needed_temp > 0.0 || signals.any_room_needs_heat;

        if needs_heat && !off_long_enough {
            debug!("restart refused, minimum off time not reached");
        }
        off_long_enough && trending_down && needs_heat
    }
}
