pub mod aggregate;
pub mod config;
pub mod decision;
pub mod error;
pub mod lwt;
pub mod outdoor;
pub mod supervisor;
pub mod topics;
pub mod types;

pub use aggregate::{aggregate, AggregateSignals, RoomReading};
pub use config::{
    ControllerConfig, LwtConfig, NetworkConfig, OutdoorConfig, PersistedSettings, RoomConfig,
    RuntimeConfig,
};
pub use decision::{HeatDecisionEngine, HeatDecisionState};
pub use error::{ConfigError, ConfigIssue, ControllerError, Feature};
pub use lwt::{DeviationCurve, LwtController, LwtReadings, LwtState};
pub use outdoor::{OutdoorRange, OutdoorReadings, OutdoorResolution, OutdoorThresholdResolver};
pub use supervisor::{AlgorithmSupervisor, RoomValues, TickInputs, TickOutcome};
pub use topics::*;
pub use types::{
    ControllerMode, ControllerStatus, EngineAction, HvacAction, OutdoorSource, ThresholdPair,
};
