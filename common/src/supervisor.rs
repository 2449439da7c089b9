use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    aggregate::{aggregate, AggregateSignals, RoomReading},
    config::ControllerConfig,
    decision::HeatDecisionEngine,
    error::ControllerError,
    lwt::{LwtController, LwtReadings},
    outdoor::{OutdoorReadings, OutdoorResolution, OutdoorThresholdResolver},
    types::{ControllerMode, ControllerStatus, EngineAction, HvacAction, ThresholdPair},
};

/// Latest values reported for one room.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RoomValues {
    pub current_temp: Option<f64>,
    pub target_temp: Option<f64>,
    pub setpoint: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct TickInputs {
    pub rooms: HashMap<String, RoomValues>,
    pub outdoor: OutdoorReadings,
    pub lwt: LwtReadings,
}

#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub actions: Vec<EngineAction>,
    pub status: ControllerStatus,
}

pub struct AlgorithmSupervisor {
    config: ControllerConfig,
    mode: ControllerMode,
    decision: HeatDecisionEngine,
    outdoor: OutdoorThresholdResolver,
    lwt: Option<LwtController>,
    signals: AggregateSignals,
    thresholds: ThresholdPair,
    outdoor_resolution: Option<OutdoorResolution>,
    last_tick: Option<DateTime<Utc>>,
}

impl AlgorithmSupervisor {
    /// Sanitizes `config` first, disabling any feature with a fatal issue.
    pub fn new(mut config: ControllerConfig) -> Self {
        for issue in config.sanitize() {
            if issue.error.is_fatal() {
                debug!(feature = issue.feature.as_str(), "{}", issue.error);
            }
        }
        Self {
            mode: ControllerMode::Manual,
            decision: HeatDecisionEngine::new(config.room_needs_heat_override),
            outdoor: OutdoorThresholdResolver::new(config.outdoor.mapping_switch_delay_minutes),
            lwt: config.lwt.clone().map(LwtController::new),
            signals: AggregateSignals::default(),
            thresholds: config.base_thresholds(),
            outdoor_resolution: None,
            last_tick: None,
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn mode(&self) -> ControllerMode {
        self.mode
    }

    /// Switches the active algorithm. Leaving LWT control restores the saved
    /// room setpoints right away; entering it takes effect on the next tick.
    pub fn set_mode(&mut self, mode: ControllerMode) -> Result<Vec<EngineAction>, ControllerError> {
        if mode == self.mode {
            return Ok(Vec::new());
        }
        if mode == ControllerMode::LwtControl && self.lwt.is_none() {
            return Err(ControllerError::LwtNotConfigured);
        }

        let mut actions = Vec::new();
        if self.mode == ControllerMode::LwtControl {
            if let Some(lwt) = self.lwt.as_mut() {
                let (restored, heat_on) = lwt.deactivate();
                actions = restored;
                self.decision.assume_action(if heat_on {
                    HvacAction::Heat
                } else {
                    HvacAction::Off
                });
            }
        }
        if mode != ControllerMode::WeightedAverageOutdoor {
            self.outdoor.clear();
            self.outdoor_resolution = None;
        }

        info!(from = %self.mode, to = %mode, "controller mode changed");
        self.mode = mode;
        Ok(actions)
    }

    pub fn pause(
        &mut self,
        minutes: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ControllerError> {
        self.decision.pause_for(minutes, now)
    }

    pub fn resume(&mut self) {
        self.decision.resume();
    }

    pub fn room_readings(&self, values: &HashMap<String, RoomValues>) -> Vec<RoomReading> {
        self.config
            .rooms
            .iter()
            .map(|room| {
                let value = values.get(&room.sensor).copied().unwrap_or_default();
                RoomReading {
                    sensor_id: room.sensor.clone(),
                    current_temp: value.current_temp,
                    target_temp: value.target_temp,
                    setpoint: value.setpoint,
                    weight: room.weight,
                    need_threshold: self.config.room_need_threshold(room),
                }
            })
            .collect()
    }

    pub fn tick(&mut self, now: DateTime<Utc>, inputs: &TickInputs) -> TickOutcome {
        let rooms = self.room_readings(&inputs.rooms);
        let signals = aggregate(&rooms);
        let base = self.config.base_thresholds();

        let resolution = (self.mode == ControllerMode::WeightedAverageOutdoor
            && self.config.outdoor.is_configured())
        .then(|| {
            self.outdoor
                .resolve(inputs.outdoor, &self.config.outdoor.ranges, base, now)
        });
        let thresholds = resolution.map_or(base, |resolution| resolution.thresholds);

        let actions = match self.mode {
            ControllerMode::LwtControl => {
                let heating = self.decision.hvac_action().is_heating();
                match self.lwt.as_mut() {
                    Some(lwt) => {
                        let mut actions = if lwt.is_active() {
                            lwt.capture_rooms(&rooms)
                        } else {
                            lwt.activate(&rooms, heating)
                        };
                        actions.extend(lwt.tick(now, &signals, inputs.lwt));
                        actions
                    }
                    None => {
                        warn!("lwt control selected without configuration");
                        Vec::new()
                    }
                }
            }
            mode => self.decision.tick(now, mode, &signals, thresholds),
        };

        if !actions.is_empty() {
            debug!(?actions, "tick produced actions");
        }

        self.signals = signals;
        self.thresholds = thresholds;
        self.outdoor_resolution = resolution;
        self.last_tick = Some(now);

        TickOutcome {
            actions,
            status: self.status(now),
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> ControllerStatus {
        let lwt = self
            .lwt
            .as_ref()
            .filter(|_| self.mode == ControllerMode::LwtControl);
        let hvac_action = match lwt {
            Some(lwt) if lwt.is_active() => {
                if lwt.heat_on() {
                    HvacAction::Heat
                } else {
                    HvacAction::Off
                }
            }
            _ => self.decision.hvac_action(),
        };
        let resolution = self.outdoor_resolution.as_ref();
        let matched_range = resolution.and_then(|resolution| resolution.matched_range);
        let decision = self.decision.state();

        ControllerStatus {
            mode: self.mode,
            hvac_action,
            avg_current_temp: self.signals.avg_current_temp,
            avg_target_temp: self.signals.avg_target_temp,
            avg_needed_temp: self.signals.avg_needed_temp,
            any_room_needs_heat: self.signals.any_room_needs_heat,
            rooms_below_target: self.signals.rooms_below_target,
            available_rooms: self.signals.available_rooms,
            threshold_before_heat: self.thresholds.before_heat,
            threshold_before_off: self.thresholds.before_off,
            outdoor_temp: resolution.and_then(|resolution| resolution.outdoor_temp),
            outdoor_source: resolution.map(|resolution| resolution.source),
            outdoor_range_index: matched_range,
            outdoor_range: matched_range
                .and_then(|index| self.config.outdoor.ranges.get(index))
                .map(|range| range.to_json()),
            lwt_deviation: lwt.map(|lwt| lwt.deviation()),
            lwt_overcapacity: lwt.map(|lwt| lwt.is_overcapacity(now)),
            lwt_overcapacity_pending: lwt.map(|lwt| lwt.overcapacity_pending()),
            lwt_overcapacity_since: lwt.and_then(|lwt| lwt.overcapacity_since()),
            lwt_off_remaining_min: lwt.and_then(|lwt| lwt.off_remaining_minutes(now)),
            paused: decision.paused,
            pause_until: decision.pause_until,
        }
    }

    pub fn last_tick(&self) -> Option<DateTime<Utc>> {
        self.last_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{LwtConfig, RoomConfig},
        outdoor::OutdoorRange,
        types::OutdoorSource,
    };
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 20, 5, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn config() -> ControllerConfig {
        let mut config = ControllerConfig {
            rooms: vec![
                RoomConfig::new("climate.living", 1.5),
                RoomConfig::new("climate.office", 1.0),
            ],
            threshold_room_needs_heat: 10.0,
            lwt: Some(LwtConfig::default()),
            ..ControllerConfig::default()
        };
        config.outdoor.sensor = Some("sensor.outdoor".into());
        config.outdoor.ranges = vec![OutdoorRange {
            min_temp: None,
            max_temp: None,
            threshold_before_heat: 2.0,
            threshold_before_off: 0.5,
        }];
        config
    }

    fn inputs(living: (f64, f64), office: (f64, f64)) -> TickInputs {
        let mut rooms = HashMap::new();
        rooms.insert(
            "climate.living".to_string(),
            RoomValues {
                current_temp: Some(living.0),
                target_temp: Some(living.1),
                setpoint: Some(living.1),
            },
        );
        rooms.insert(
            "climate.office".to_string(),
            RoomValues {
                current_temp: Some(office.0),
                target_temp: Some(office.1),
                setpoint: Some(office.1),
            },
        );
        TickInputs {
            rooms,
            outdoor: OutdoorReadings {
                primary: Some(3.0),
                fallback: None,
            },
            lwt: LwtReadings::default(),
        }
    }

    fn needs_one_degree() -> TickInputs {
        inputs((19.0, 21.0), (20.5, 20.0))
    }

    fn setpoint_actions(actions: &[EngineAction]) -> Vec<(String, f64)> {
        actions
            .iter()
            .filter_map(|action| match action {
                EngineAction::SetRoomSetpoint { room, setpoint } => Some((room.clone(), *setpoint)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn starts_in_manual_and_stays_quiet() {
        let mut supervisor = AlgorithmSupervisor::new(config());
        let outcome = supervisor.tick(at(0), &needs_one_degree());

        assert_eq!(supervisor.mode(), ControllerMode::Manual);
        assert!(outcome.actions.is_empty());
        assert!((outcome.status.avg_needed_temp - 1.0).abs() < 1e-9);
        assert_eq!(outcome.status.hvac_action, HvacAction::Off);
    }

    #[test]
    fn weighted_average_ignores_outdoor_table() {
        let mut supervisor = AlgorithmSupervisor::new(config());
        supervisor.set_mode(ControllerMode::WeightedAverage).unwrap();

        let outcome = supervisor.tick(at(0), &needs_one_degree());

        assert_eq!(outcome.actions, vec![EngineAction::HeatOn]);
        assert_eq!(outcome.status.outdoor_source, None);
        assert_eq!(outcome.status.outdoor_range_index, None);
        assert_eq!(outcome.status.threshold_before_heat, 0.07);
    }

    #[test]
    fn outdoor_mode_applies_matched_range() {
        let mut supervisor = AlgorithmSupervisor::new(config());
        supervisor
            .set_mode(ControllerMode::WeightedAverageOutdoor)
            .unwrap();

        let outcome = supervisor.tick(at(0), &needs_one_degree());

        assert!(outcome.actions.is_empty());
        assert_eq!(outcome.status.threshold_before_heat, 2.0);
        assert_eq!(outcome.status.outdoor_source, Some(OutdoorSource::Primary));
        assert_eq!(outcome.status.outdoor_temp, Some(3.0));
        assert_eq!(outcome.status.outdoor_range_index, Some(0));
        assert!(outcome.status.outdoor_range.is_some());
    }

    #[test]
    fn outdoor_mode_without_sensor_behaves_like_weighted_average() {
        let mut config = config();
        config.outdoor.sensor = None;
        let mut supervisor = AlgorithmSupervisor::new(config);
        supervisor
            .set_mode(ControllerMode::WeightedAverageOutdoor)
            .unwrap();

        let outcome = supervisor.tick(at(0), &needs_one_degree());

        assert_eq!(outcome.actions, vec![EngineAction::HeatOn]);
        assert_eq!(outcome.status.outdoor_source, None);
    }

    #[test]
    fn lwt_requires_configuration() {
        let mut config = config();
        config.lwt = None;
        let mut supervisor = AlgorithmSupervisor::new(config);
        supervisor.set_mode(ControllerMode::WeightedAverage).unwrap();

        assert_eq!(
            supervisor.set_mode(ControllerMode::LwtControl),
            Err(ControllerError::LwtNotConfigured)
        );
        assert_eq!(supervisor.mode(), ControllerMode::WeightedAverage);
    }

    #[test]
    fn lwt_entry_happens_once_on_first_tick() {
        let mut supervisor = AlgorithmSupervisor::new(config());
        assert!(supervisor
            .set_mode(ControllerMode::LwtControl)
            .unwrap()
            .is_empty());

        let first = supervisor.tick(at(0), &needs_one_degree());
        assert_eq!(
            setpoint_actions(&first.actions),
            vec![
                ("climate.living".to_string(), 22.0),
                ("climate.office".to_string(), 22.0)
            ]
        );
        assert!(first.actions.contains(&EngineAction::HeatOn));
        assert!(first.actions.contains(&EngineAction::SetDeviation(10.0)));
        assert_eq!(first.status.hvac_action, HvacAction::Heat);
        assert_eq!(first.status.lwt_deviation, Some(10.0));

        let second = supervisor.tick(at(1), &inputs((19.0, 22.0), (20.5, 22.0)));
        assert!(setpoint_actions(&second.actions).is_empty());
        assert!(!second.actions.contains(&EngineAction::HeatOn));
    }

    #[test]
    fn inverted_lwt_bounds_disable_lwt_without_sanitize() {
        let mut config = config();
        config.lwt = Some(LwtConfig {
            deviation_min: 5.0,
            deviation_max: -5.0,
            ..LwtConfig::default()
        });
        let mut supervisor = AlgorithmSupervisor::new(config);

        assert_eq!(
            supervisor.set_mode(ControllerMode::LwtControl),
            Err(ControllerError::LwtNotConfigured)
        );
        assert!(supervisor.config().lwt.is_none());
    }

    #[test]
    fn lwt_only_overrides_rooms_it_can_restore() {
        let mut supervisor = AlgorithmSupervisor::new(config());
        supervisor.set_mode(ControllerMode::LwtControl).unwrap();

        let mut partial = needs_one_degree();
        if let Some(office) = partial.rooms.get_mut("climate.office") {
            office.setpoint = None;
        }
        let entry = supervisor.tick(at(0), &partial);
        assert_eq!(
            setpoint_actions(&entry.actions),
            vec![("climate.living".to_string(), 22.0)]
        );

        // The office setpoint shows up later and is saved before being overridden.
        let late = supervisor.tick(at(1), &inputs((19.0, 22.0), (20.5, 19.5)));
        assert_eq!(
            setpoint_actions(&late.actions),
            vec![("climate.office".to_string(), 22.0)]
        );

        let restored = supervisor.set_mode(ControllerMode::Manual).unwrap();
        assert_eq!(
            setpoint_actions(&restored),
            vec![
                ("climate.living".to_string(), 21.0),
                ("climate.office".to_string(), 19.5)
            ]
        );
    }

    #[test]
    fn lwt_entry_before_any_setpoint_overrides_nothing() {
        let mut supervisor = AlgorithmSupervisor::new(config());
        supervisor.set_mode(ControllerMode::LwtControl).unwrap();

        let mut blank = needs_one_degree();
        for values in blank.rooms.values_mut() {
            values.setpoint = None;
        }
        let entry = supervisor.tick(at(0), &blank);
        assert!(setpoint_actions(&entry.actions).is_empty());

        let restored = supervisor.set_mode(ControllerMode::WeightedAverage).unwrap();
        assert!(setpoint_actions(&restored).is_empty());
    }

    #[test]
    fn all_rooms_unavailable_turns_heat_off_with_negative_off_threshold() {
        let mut config = config();
        config.threshold_before_heat = 0.1;
        config.threshold_before_off = -0.1;
        assert!(config.validate().is_empty());
        let mut supervisor = AlgorithmSupervisor::new(config);
        supervisor.set_mode(ControllerMode::WeightedAverage).unwrap();
        assert_eq!(
            supervisor.tick(at(0), &needs_one_degree()).actions,
            vec![EngineAction::HeatOn]
        );

        let outcome = supervisor.tick(at(1), &TickInputs::default());
        assert_eq!(outcome.actions, vec![EngineAction::HeatOff]);
        for minute in 2..600 {
            let outcome = supervisor.tick(at(minute), &TickInputs::default());
            assert!(outcome.actions.is_empty());
            assert_eq!(outcome.status.hvac_action, HvacAction::Off);
        }
    }

    #[test]
    fn lwt_round_trip_through_manual_restores_saved_setpoints() {
        let mut supervisor = AlgorithmSupervisor::new(config());
        supervisor.set_mode(ControllerMode::LwtControl).unwrap();
        supervisor.tick(at(0), &needs_one_degree());
        supervisor.tick(at(1), &inputs((19.5, 22.0), (20.5, 22.0)));

        let restored = supervisor.set_mode(ControllerMode::Manual).unwrap();
        assert_eq!(
            setpoint_actions(&restored),
            vec![
                ("climate.living".to_string(), 21.0),
                ("climate.office".to_string(), 20.0)
            ]
        );
        assert!(supervisor
            .set_mode(ControllerMode::WeightedAverage)
            .unwrap()
            .is_empty());

        let outcome = supervisor.tick(at(2), &needs_one_degree());
        assert!(setpoint_actions(&outcome.actions).is_empty());
        assert_eq!(outcome.status.lwt_deviation, None);
    }

    #[test]
    fn leaving_lwt_syncs_switch_state() {
        let mut supervisor = AlgorithmSupervisor::new(config());
        supervisor.set_mode(ControllerMode::LwtControl).unwrap();
        supervisor.tick(at(0), &needs_one_degree());

        supervisor.set_mode(ControllerMode::WeightedAverage).unwrap();
        // 0.03 is inside the dead band, so the running heat pump is left alone.
        let outcome = supervisor.tick(at(1), &inputs((20.0, 20.03), (20.0, 20.03)));

        assert!(outcome.actions.is_empty());
        assert_eq!(outcome.status.hvac_action, HvacAction::Heat);
    }

    #[test]
    fn all_rooms_unavailable_turns_heat_off() {
        let mut supervisor = AlgorithmSupervisor::new(config());
        supervisor.set_mode(ControllerMode::WeightedAverage).unwrap();
        supervisor.tick(at(0), &needs_one_degree());

        let outcome = supervisor.tick(at(1), &TickInputs::default());

        assert_eq!(outcome.actions, vec![EngineAction::HeatOff]);
        assert_eq!(outcome.status.available_rooms, 0);
    }

    #[test]
    fn pause_is_reported_and_expires() {
        let mut supervisor = AlgorithmSupervisor::new(config());
        supervisor.set_mode(ControllerMode::WeightedAverage).unwrap();
        supervisor.tick(at(0), &needs_one_degree());

        let until = supervisor.pause(None, at(1)).unwrap();
        let paused = supervisor.tick(at(2), &needs_one_degree());
        assert_eq!(paused.actions, vec![EngineAction::HeatOff]);
        assert!(paused.status.paused);
        assert_eq!(paused.status.pause_until, Some(until));

        supervisor.resume();
        let resumed = supervisor.tick(at(3), &needs_one_degree());
        assert_eq!(resumed.actions, vec![EngineAction::HeatOn]);
        assert!(!resumed.status.paused);
    }
}
