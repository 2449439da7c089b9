use std::{
    collections::HashMap, io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use heatpump_common::{
    parse_topic, room_setpoint_command_topic, AlgorithmSupervisor, ControllerConfig,
    ControllerError, ControllerMode, EngineAction, InboundTopic, PersistedSettings, RuntimeConfig,
    TOPIC_CMD_LWT_DEVIATION, TOPIC_CMD_MODE, TOPIC_CMD_PAUSE, TOPIC_CMD_SWITCH,
    TOPIC_CONTROLLER_STATE, TOPIC_LWT_ACTUAL, TOPIC_LWT_SETPOINT, TOPIC_OUTDOOR_FALLBACK,
    TOPIC_OUTDOOR_PRIMARY, TOPIC_ROOM_WILDCARD,
};

use crate::inputs::SensorCache;

#[derive(Clone)]
struct AppState {
    supervisor: Arc<Mutex<AlgorithmSupervisor>>,
    sensors: Arc<Mutex<SensorCache>>,
    runtime: Arc<RuntimeConfig>,
    mqtt: AsyncClient,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    settings_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct ConfigView<'a> {
    controller: &'a ControllerConfig,
    http_port: u16,
    tick_interval_secs: u64,
    state_publish_interval_secs: u64,
    sensor_stale_timeout_secs: u64,
    mqtt_host: &'a str,
    mqtt_port: u16,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime);

    for issue in runtime.sanitize() {
        if issue.error.is_fatal() {
            warn!(feature = issue.feature.as_str(), "{}; feature disabled", issue.error);
        } else {
            warn!(feature = issue.feature.as_str(), "{}", issue.error);
        }
    }

    let mut supervisor = AlgorithmSupervisor::new(runtime.controller.clone());
    let settings = store.load_settings().await.unwrap_or_else(|err| {
        warn!("failed to load settings from store: {err:#}");
        PersistedSettings::default()
    });
    if let Err(err) = supervisor.set_mode(settings.mode) {
        warn!(mode = %settings.mode, "cannot restore saved mode, staying in manual: {err}");
    }

    let mut mqtt_options = MqttOptions::new(
        runtime.network.mqtt_client_id.clone(),
        runtime.network.mqtt_host.clone(),
        runtime.network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if !runtime.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.network.mqtt_user.clone(),
            runtime.network.mqtt_pass.clone(),
        );
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        supervisor: Arc::new(Mutex::new(supervisor)),
        sensors: Arc::new(Mutex::new(SensorCache::new(runtime.sensor_stale_timeout_secs))),
        runtime: Arc::new(runtime),
        mqtt,
        store,
    };

    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_control_loop(app_state.clone());
    spawn_state_publish_loop(app_state.clone());

    let port = app_state.runtime.http_port;
    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/pause", post(handle_pause))
        .route("/api/pause/clear", post(handle_pause_clear))
        .route("/api/config", get(handle_get_config))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    if let Ok(host) = std::env::var("MQTT_HOST") {
        runtime.network.mqtt_host = host;
    }
    if let Some(port) = env_parse::<u16>("MQTT_PORT") {
        runtime.network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        runtime.network.mqtt_user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        runtime.network.mqtt_pass = pass;
    }
    if let Some(port) = env_parse::<u16>("CONTROLLER_HTTP_PORT") {
        runtime.http_port = port;
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse::<T>().ok())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_ROOM_WILDCARD,
        TOPIC_OUTDOOR_PRIMARY,
        TOPIC_OUTDOOR_FALLBACK,
        TOPIC_LWT_ACTUAL,
        TOPIC_LWT_SETPOINT,
        TOPIC_CMD_MODE,
        TOPIC_CMD_PAUSE,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, &message.topic, &message.payload).await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    if let Err(err) = subscribe_topics(&app_state.mqtt).await {
                        warn!("mqtt subscribe failed: {err:#}");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let period = Duration::from_secs(app_state.runtime.tick_interval_secs);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            run_tick(&app_state).await;
        }
    });
}

/// Runs one control tick unless another tick or command holds the supervisor.
async fn run_tick(app_state: &AppState) {
    let Ok(mut supervisor) = app_state.supervisor.try_lock() else {
        debug!("previous tick still running, skipping");
        return;
    };

    let now = Utc::now();
    let inputs = { app_state.sensors.lock().await.snapshot(now) };
    let outcome = supervisor.tick(now, &inputs);
    drop(supervisor);

    debug!(
        mode = %outcome.status.mode,
        avg_needed_temp = outcome.status.avg_needed_temp,
        hvac_action = outcome.status.hvac_action.as_str(),
        "tick complete"
    );
    publish_actions(app_state, outcome.actions).await;
}

fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let period = Duration::from_secs(app_state.runtime.state_publish_interval_secs);
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;

            let payload = {
                let supervisor = app_state.supervisor.lock().await;
                serde_json::to_vec(&supervisor.status(Utc::now()))
            };

            match payload {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }
        }
    });
}

async fn publish_actions(app_state: &AppState, actions: Vec<EngineAction>) {
    let switch_configured = app_state.runtime.controller.on_off_switch.is_some();

    for action in actions {
        info!("engine action: {action:?}");

        let (topic, payload) = match action {
            EngineAction::HeatOn | EngineAction::HeatOff if !switch_configured => {
                debug!("no on/off switch configured, not publishing");
                continue;
            }
            EngineAction::HeatOn => (TOPIC_CMD_SWITCH.to_string(), "ON".to_string()),
            EngineAction::HeatOff => (TOPIC_CMD_SWITCH.to_string(), "OFF".to_string()),
            EngineAction::SetDeviation(deviation) => {
                (TOPIC_CMD_LWT_DEVIATION.to_string(), format!("{deviation:.2}"))
            }
            EngineAction::SetRoomSetpoint { room, setpoint } => {
                (room_setpoint_command_topic(&room), format!("{setpoint:.1}"))
            }
        };

        if let Err(err) = app_state
            .mqtt
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
        {
            warn!(%topic, "actuation publish failed: {err}");
        }
    }
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = std::str::from_utf8(payload).context("non utf8 mqtt payload")?;
    let Some(inbound) = parse_topic(topic) else {
        debug!(topic, "ignoring message on unknown topic");
        return Ok(());
    };

    match inbound {
        InboundTopic::Mode => match message.parse::<ControllerMode>() {
            Ok(mode) => match apply_mode(app_state, mode).await {
                Ok(true) => persist_settings(app_state).await?,
                Ok(false) => {}
                Err(err) => warn!("mode command rejected: {err}"),
            },
            Err(err) => warn!("mode command rejected: {err}"),
        },
        InboundTopic::Pause => {
            let command = message.trim();
            if command.eq_ignore_ascii_case("off") {
                resume(app_state).await;
            } else if command.is_empty() {
                pause(app_state, None).await?;
            } else {
                let minutes = command
                    .parse::<i64>()
                    .with_context(|| format!("invalid pause duration '{command}'"))?;
                pause(app_state, Some(minutes)).await?;
            }
        }
        reading => {
            let mut sensors = app_state.sensors.lock().await;
            sensors.record(reading, message, Utc::now());
        }
    }

    Ok(())
}

/// Returns whether the mode changed.
async fn apply_mode(app_state: &AppState, mode: ControllerMode) -> Result<bool, ControllerError> {
    let actions = {
        let mut supervisor = app_state.supervisor.lock().await;
        if supervisor.mode() == mode {
            return Ok(false);
        }
        supervisor.set_mode(mode)?
    };
    publish_actions(app_state, actions).await;
    run_tick(app_state).await;
    Ok(true)
}

async fn pause(app_state: &AppState, minutes: Option<i64>) -> Result<(), ControllerError> {
    {
        let mut supervisor = app_state.supervisor.lock().await;
        supervisor.pause(minutes, Utc::now())?;
    }
    run_tick(app_state).await;
    Ok(())
}

async fn resume(app_state: &AppState) {
    {
        let mut supervisor = app_state.supervisor.lock().await;
        supervisor.resume();
    }
    run_tick(app_state).await;
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = {
        let supervisor = state.supervisor.lock().await;
        supervisor.status(Utc::now())
    };
    Json(status)
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    let mode = match value.parse::<ControllerMode>() {
        Ok(mode) => mode,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    match apply_mode(&state, mode).await {
        Ok(true) => {
            if let Err(err) = persist_settings(&state).await {
                warn!("failed to persist mode update: {err:#}");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to persist controller settings",
                );
            }
        }
        Ok(false) => {}
        Err(err) => return controller_error_response(&err),
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_pause(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let minutes = match params.get("minutes") {
        None => None,
        Some(value) => match value.parse::<i64>() {
            Ok(minutes) => Some(minutes),
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid 'minutes' value"),
        },
    };

    if let Err(err) = pause(&state, minutes).await {
        return controller_error_response(&err);
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_pause_clear(State(state): State<AppState>) -> impl IntoResponse {
    resume(&state).await;
    handle_get_status(State(state)).await.into_response()
}

async fn handle_get_config(State(state): State<AppState>) -> impl IntoResponse {
    let runtime = state.runtime.as_ref();
    Json(ConfigView {
        controller: &runtime.controller,
        http_port: runtime.http_port,
        tick_interval_secs: runtime.tick_interval_secs,
        state_publish_interval_secs: runtime.state_publish_interval_secs,
        sensor_stale_timeout_secs: runtime.sensor_stale_timeout_secs,
        mqtt_host: &runtime.network.mqtt_host,
        mqtt_port: runtime.network.mqtt_port,
    })
    .into_response()
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("HEATPUMP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.heatpump"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            settings_path: Arc::new(data_dir.join("settings.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
                .with_context(|| format!("invalid {}", self.runtime_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    "no runtime config at {}, using defaults",
                    self.runtime_path.display()
                );
                Ok(RuntimeConfig::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn load_settings(&self) -> anyhow::Result<PersistedSettings> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.settings_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<PersistedSettings>(&raw).unwrap_or_else(|err| {
                warn!("unreadable settings, falling back to manual mode: {err}");
                PersistedSettings::default()
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(PersistedSettings::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_settings(&self, settings: &PersistedSettings) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.settings_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(settings)?;
        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

async fn persist_settings(state: &AppState) -> anyhow::Result<()> {
    let mode = state.supervisor.lock().await.mode();
    state.store.save_settings(&PersistedSettings { mode }).await
}

fn controller_error_response(err: &ControllerError) -> axum::response::Response {
    let status = match err {
        ControllerError::LwtNotConfigured => StatusCode::CONFLICT,
        ControllerError::UnknownMode(_) | ControllerError::InvalidPauseDuration(_) => {
            StatusCode::BAD_REQUEST
        }
    };
    error_response(status, &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
