use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RoomReading {
    pub sensor_id: String,
    pub current_temp: Option<f64>,
    pub target_temp: Option<f64>,
    pub setpoint: Option<f64>,
    pub weight: f64,
    pub need_threshold: f64,
}

impl RoomReading {
    fn current(&self) -> Option<f64> {
        self.current_temp.filter(|v| v.is_finite())
    }

    fn target(&self) -> Option<f64> {
        self.target_temp.filter(|v| v.is_finite())
    }

    fn has_weight(&self) -> bool {
        self.weight.is_finite() && self.weight > 0.0
    }

    pub fn gap(&self) -> Option<f64> {
        Some(self.target()? - self.current()?)
    }

    pub fn setpoint(&self) -> Option<f64> {
        self.setpoint.filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AggregateSignals {
    pub avg_current_temp: Option<f64>,
    pub avg_target_temp: Option<f64>,
    pub avg_needed_temp: f64,
    pub any_room_needs_heat: bool,
    pub rooms_below_target: usize,
    pub available_rooms: usize,
}

impl AggregateSignals {
    pub fn all_unavailable(&self) -> bool {
        self.available_rooms == 0
    }
}

#[derive(Default)]
struct WeightedSum {
    sum: f64,
    weight: f64,
}

impl WeightedSum {
    fn add(&mut self, value: f64, weight: f64) {
        self.sum += value * weight;
        self.weight += weight;
    }

    fn mean(&self) -> Option<f64> {
        (self.weight > 0.0).then(|| self.sum / self.weight)
    }
}

/// Each average only counts the rooms that can contribute to it, so
/// `avg_needed_temp` is the mean of per-room gaps rather than
/// `avg_target_temp - avg_current_temp`.
pub fn aggregate(rooms: &[RoomReading]) -> AggregateSignals {
    let mut current = WeightedSum::default();
    let mut target = WeightedSum::default();
    let mut needed = WeightedSum::default();
    let mut any_room_needs_heat = false;
    let mut rooms_below_target = 0;
    let mut available_rooms = 0;

    for room in rooms.iter().filter(|room| room.has_weight()) {
        if let Some(value) = room.current() {
            current.add(value, room.weight);
        }
        if let Some(value) = room.target() {
            target.add(value, room.weight);
        }

        let Some(gap) = room.gap() else {
            debug!(room = %room.sensor_id, "room reading unavailable, excluded this tick");
            continue;
        };

        available_rooms += 1;
        needed.add(gap, room.weight);
        if gap > 0.0 {
            rooms_below_target += 1;
        }
        if gap > room.need_threshold {
            debug!(
                room = %room.sensor_id,
                gap,
                threshold = room.need_threshold,
                "room below target beyond its threshold"
            );
            any_room_needs_heat = true;
        }
    }

    if available_rooms == 0 {
        warn!("all rooms unavailable, treating as no heat needed");
    }

    let signals = AggregateSignals {
        avg_current_temp: current.mean(),
        avg_target_temp: target.mean(),
        avg_needed_temp: needed.mean().unwrap_or(0.0),
        any_room_needs_heat,
        rooms_below_target,
        available_rooms,
    };
    debug!(?signals, "aggregated room readings");
    signals
}
