use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::{
    aggregate::AggregateSignals,
    error::ControllerError,
    types::{ControllerMode, EngineAction, HvacAction, ThresholdPair},
};

pub const DEFAULT_PAUSE_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeatDecisionState {
    pub hvac_action: HvacAction,
    pub paused: bool,
    pub pause_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct HeatDecisionEngine {
    state: HeatDecisionState,
    room_override: bool,
}

impl HeatDecisionEngine {
    pub fn new(room_override: bool) -> Self {
        Self {
            state: HeatDecisionState::default(),
            room_override,
        }
    }

    pub fn state(&self) -> HeatDecisionState {
        self.state
    }

    pub fn hvac_action(&self) -> HvacAction {
        self.state.hvac_action
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    pub fn pause_until(&self) -> Option<DateTime<Utc>> {
        self.state.pause_until
    }

    pub fn pause_for(
        &mut self,
        minutes: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ControllerError> {
        let minutes = minutes.unwrap_or(DEFAULT_PAUSE_MINUTES);
        if minutes <= 0 {
            return Err(ControllerError::InvalidPauseDuration(minutes));
        }
        let until = now + Duration::minutes(minutes);
        self.pause(until, now);
        Ok(until)
    }

    pub fn pause(&mut self, until: DateTime<Utc>, now: DateTime<Utc>) {
        if until <= now {
            self.resume();
            return;
        }
        info!(pause_until = %until, "controller paused");
        self.state.paused = true;
        self.state.pause_until = Some(until);
    }

    pub fn resume(&mut self) {
        if self.state.paused {
            info!("controller pause cleared");
        }
        self.state.paused = false;
        self.state.pause_until = None;
    }

    /// Adopts the switch state left behind by another controller.
    pub fn assume_action(&mut self, action: HvacAction) {
        self.state.hvac_action = action;
    }

    pub fn tick(
        &mut self,
        now: DateTime<Utc>,
        mode: ControllerMode,
        signals: &AggregateSignals,
        thresholds: ThresholdPair,
    ) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        self.expire_pause_if_needed(now);

        if mode == ControllerMode::Manual {
            debug!("manual mode selected, skipping automatic control");
            return actions;
        }

        if self.state.paused {
            if self.state.hvac_action.is_heating() {
                info!("controller paused, turning heat off");
                self.turn_off(&mut actions);
            }
            return actions;
        }

        if signals.all_unavailable() {
            if self.state.hvac_action.is_heating() {
                warn!("no room readings available, turning heat off");
                self.turn_off(&mut actions);
            }
            return actions;
        }

        if self.room_override && signals.any_room_needs_heat {
            if !self.state.hvac_action.is_heating() {
                info!("turning heat on: at least one room is below its threshold");
                self.turn_on(&mut actions);
            }
            return actions;
        }

        let need = signals.avg_needed_temp;
        match self.state.hvac_action {
            HvacAction::Off if need > thresholds.before_heat => {
                info!(
                    avg_needed_temp = need,
                    before_heat = thresholds.before_heat,
                    "turning heat on"
                );
                self.turn_on(&mut actions);
            }
            HvacAction::Heat if need < thresholds.before_off => {
                info!(
                    avg_needed_temp = need,
                    before_off = thresholds.before_off,
                    "turning heat off"
                );
                self.turn_off(&mut actions);
            }
            action => {
                debug!(
                    action = action.as_str(),
                    avg_needed_temp = need,
                    before_heat = thresholds.before_heat,
                    before_off = thresholds.before_off,
                    "no change needed"
                );
            }
        }

        actions
    }

    fn expire_pause_if_needed(&mut self, now: DateTime<Utc>) {
        if let Some(until) = self.state.pause_until {
            if now >= until {
                info!("pause expired, resuming automatic control");
                self.state.paused = false;
                self.state.pause_until = None;
            }
        }
    }

    fn turn_on(&mut self, actions: &mut Vec<EngineAction>) {
        if self.state.hvac_action.is_heating() {
            return;
        }
        actions.push(EngineAction::HeatOn);
        self.state.hvac_action = HvacAction::Heat;
    }

    fn turn_off(&mut self, actions: &mut Vec<EngineAction>) {
        if !self.state.hvac_action.is_heating() {
            return;
        }
        actions.push(EngineAction::HeatOff);
        self.state.hvac_action = HvacAction::Off;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const PAIR: ThresholdPair = ThresholdPair::new(0.07, 0.007);
    const EPS: f64 = 1e-4;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 12, 7, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn need(value: f64) -> AggregateSignals {
        AggregateSignals {
            avg_current_temp: Some(20.0),
            avg_target_temp: Some(20.0 + value),
            avg_needed_temp: value,
            any_room_needs_heat: false,
            rooms_below_target: usize::from(value > 0.0),
            available_rooms: 1,
        }
    }

    fn tick(engine: &mut HeatDecisionEngine, minute: i64, value: f64) -> Vec<EngineAction> {
        engine.tick(at(minute), ControllerMode::WeightedAverage, &need(value), PAIR)
    }

    #[test]
    fn hysteresis_cycle() {
        let mut engine = HeatDecisionEngine::new(true);

        assert_eq!(tick(&mut engine, 0, PAIR.before_heat + EPS), vec![EngineAction::HeatOn]);
        assert_eq!(engine.hvac_action(), HvacAction::Heat);

        for value in [0.05, 0.03, 0.01, PAIR.before_off, PAIR.before_heat] {
            assert!(tick(&mut engine, 1, value).is_empty());
            assert_eq!(engine.hvac_action(), HvacAction::Heat);
        }

        assert_eq!(tick(&mut engine, 2, PAIR.before_off - EPS), vec![EngineAction::HeatOff]);
        assert_eq!(engine.hvac_action(), HvacAction::Off);

        for value in [PAIR.before_off, 0.03, PAIR.before_heat] {
            assert!(tick(&mut engine, 3, value).is_empty());
            assert_eq!(engine.hvac_action(), HvacAction::Off);
        }
    }

    #[test]
    fn repeated_decision_emits_one_command() {
        let mut engine = HeatDecisionEngine::new(true);
        assert_eq!(tick(&mut engine, 0, 1.0), vec![EngineAction::HeatOn]);
        assert!(tick(&mut engine, 1, 1.0).is_empty());
        assert_eq!(tick(&mut engine, 2, -1.0), vec![EngineAction::HeatOff]);
        assert!(tick(&mut engine, 3, -1.0).is_empty());
    }

    #[test]
    fn manual_mode_never_heats() {
        let mut engine = HeatDecisionEngine::new(true);
        let mut signals = need(5.0);
        signals.any_room_needs_heat = true;

        let actions = engine.tick(at(0), ControllerMode::Manual, &signals, PAIR);

        assert!(actions.is_empty());
        assert_eq!(engine.hvac_action(), HvacAction::Off);
    }

    #[test]
    fn pause_forces_off_then_resumes() {
        let mut engine = HeatDecisionEngine::new(true);
        tick(&mut engine, 0, 1.0);

        let until = engine.pause_for(Some(30), at(1)).unwrap();
        assert_eq!(until, at(31));

        assert_eq!(tick(&mut engine, 2, 1.0), vec![EngineAction::HeatOff]);
        assert!(tick(&mut engine, 10, 5.0).is_empty());
        assert!(tick(&mut engine, 30, 5.0).is_empty());
        assert!(engine.is_paused());

        assert_eq!(tick(&mut engine, 31, 5.0), vec![EngineAction::HeatOn]);
        assert!(!engine.is_paused());
        assert_eq!(engine.pause_until(), None);
    }

    #[test]
    fn pause_overrides_room_need() {
        let mut engine = HeatDecisionEngine::new(true);
        engine.pause_for(None, at(0)).unwrap();
        let mut signals = need(2.0);
        signals.any_room_needs_heat = true;

        let actions = engine.tick(at(5), ControllerMode::WeightedAverage, &signals, PAIR);

        assert!(actions.is_empty());
        assert_eq!(engine.pause_until(), Some(at(DEFAULT_PAUSE_MINUTES)));
    }

    #[test]
    fn invalid_pause_duration_is_rejected() {
        let mut engine = HeatDecisionEngine::new(true);
        assert_eq!(
            engine.pause_for(Some(0), at(0)),
            Err(ControllerError::InvalidPauseDuration(0))
        );
        assert!(!engine.is_paused());
    }

    #[test]
    fn pause_in_the_past_clears() {
        let mut engine = HeatDecisionEngine::new(true);
        engine.pause(at(30), at(0));
        assert!(engine.is_paused());
        engine.pause(at(0), at(5));
        assert!(!engine.is_paused());
    }

    #[test]
    fn room_override_heats_inside_dead_band() {
        let mut engine = HeatDecisionEngine::new(true);
        let mut signals = need(0.01);
        signals.any_room_needs_heat = true;

        let actions = engine.tick(at(0), ControllerMode::WeightedAverage, &signals, PAIR);
        assert_eq!(actions, vec![EngineAction::HeatOn]);

        signals.avg_needed_temp = -0.5;
        assert!(engine
            .tick(at(1), ControllerMode::WeightedAverage, &signals, PAIR)
            .is_empty());
        assert_eq!(engine.hvac_action(), HvacAction::Heat);
    }

    #[test]
    fn room_override_can_be_disabled() {
        let mut engine = HeatDecisionEngine::new(false);
        let mut signals = need(0.01);
        signals.any_room_needs_heat = true;

        assert!(engine
            .tick(at(0), ControllerMode::WeightedAverage, &signals, PAIR)
            .is_empty());
    }

    #[test]
    fn all_rooms_unavailable_turns_heat_off() {
        let mut engine = HeatDecisionEngine::new(true);
        tick(&mut engine, 0, 1.0);

        let signals = AggregateSignals::default();
        let actions = engine.tick(at(1), ControllerMode::WeightedAverage, &signals, PAIR);

        assert_eq!(actions, vec![EngineAction::HeatOff]);
    }

    #[test]
    fn all_rooms_unavailable_turns_off_inside_dead_band() {
        let pair = ThresholdPair::new(0.1, -0.1);
        let mut engine = HeatDecisionEngine::new(true);
        engine.tick(at(0), ControllerMode::WeightedAverage, &need(2.0), pair);
        assert_eq!(engine.hvac_action(), HvacAction::Heat);

        let signals = AggregateSignals::default();
        let actions = engine.tick(at(1), ControllerMode::WeightedAverage, &signals, pair);
        assert_eq!(actions, vec![EngineAction::HeatOff]);

        for minute in 2..60 {
            assert!(engine
                .tick(at(minute), ControllerMode::WeightedAverage, &signals, pair)
                .is_empty());
        }
        assert_eq!(engine.hvac_action(), HvacAction::Off);
    }

    #[test]
    fn concrete_two_room_scenario_heats() {
        use crate::aggregate::{aggregate, RoomReading};

        let rooms = [(19.0, 21.0, 1.5), (20.5, 20.0, 1.0)]
            .into_iter()
            .enumerate()
            .map(|(i, (current, target, weight))| RoomReading {
                sensor_id: format!("climate.room{i}"),
                current_temp: Some(current),
                target_temp: Some(target),
                setpoint: None,
                weight,
                need_threshold: 10.0,
            })
            .collect::<Vec<_>>();
        let signals = aggregate(&rooms);
        let mut engine = HeatDecisionEngine::new(true);

        let actions = engine.tick(at(0), ControllerMode::WeightedAverage, &signals, PAIR);

        assert!((signals.avg_needed_temp - 1.0).abs() < 1e-9);
        assert_eq!(actions, vec![EngineAction::HeatOn]);
    }
}
