use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::{StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        Mutex, Notify,
    },
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use lamp_common::{
    availability_topic, button_topic,
    http::{ACKNOWLEDGEMENT, CONTROL_ROUTES},
    output::duty_for_level,
    parse_button_level, parse_control_request, parse_set_topic, scene_views, set_filter,
    state_topic, Accessory, ButtonMachine, Characteristic, CharacteristicValue, ControlRequest,
    LampAction, LampBroker, LampVariant, LightOutput, OutputError, OutputFrame, RecordStore,
    RequestError, RuntimeConfig, StateStore, StoreError, PAYLOAD_OFFLINE, PAYLOAD_ONLINE,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 64;
const SIMULATED_MAX_DUTY: u32 = (1 << 13) - 1;

#[derive(Clone)]
struct AppState {
    broker: Arc<Mutex<LampBroker>>,
    accessory: Arc<Accessory>,
    output: Arc<Mutex<LoggingOutput>>,
    records: Arc<Mutex<StateStore<FileRecordStore>>>,
    actions: UnboundedSender<Vec<LampAction>>,
    button_level: Arc<AtomicBool>,
    restart: Arc<Notify>,
    device: Arc<str>,
    mqtt: AsyncClient,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    state_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct FileRecordStore {
    path: PathBuf,
}

#[derive(Default)]
struct LoggingOutput {
    last: Option<OutputFrame>,
}

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
    runtime.sanitize();

    let capabilities = runtime.variant.capabilities();
    info!(
        "starting {} lamp '{}' ({} scenes)",
        runtime.variant.as_str(),
        runtime.network.device_name,
        capabilities.scene_count()
    );

    let mut records = StateStore::new(
        FileRecordStore::new(store.state_path.as_ref().clone()),
        capabilities,
    );
    let initial = records.load();
    let mut broker = LampBroker::new(runtime.lamp.clone(), capabilities, initial);
    let accessory = Accessory::new(&capabilities);

    let device = runtime.network.device_name.clone();
    let mut mqtt_options = MqttOptions::new(
        format!("lamp-controller-{device}"),
        runtime.network.mqtt_host.clone(),
        runtime.network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_last_will(LastWill::new(
        availability_topic(&device),
        PAYLOAD_OFFLINE,
        QoS::AtLeastOnce,
        true,
    ));
    if !runtime.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.network.mqtt_user.clone(),
            runtime.network.mqtt_pass.clone(),
        );
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let startup = broker.start(monotonic_ms());
    let (action_tx, action_rx) = mpsc::unbounded_channel();

    let app_state = AppState {
        broker: Arc::new(Mutex::new(broker)),
        accessory: Arc::new(accessory),
        output: Arc::new(Mutex::new(LoggingOutput::default())),
        records: Arc::new(Mutex::new(records)),
        actions: action_tx,
        button_level: Arc::new(AtomicBool::new(false)),
        restart: Arc::new(Notify::new()),
        device: Arc::from(device.as_str()),
        mqtt,
        store,
    };
    execute_lamp_actions(&app_state, startup).await;

    subscribe_topics(&app_state).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_control_loop(app_state.clone(), action_rx, runtime.lamp.tick_interval_ms);

    let mut router = Router::new();
    for route in CONTROL_ROUTES {
        router = router.route(route, get(handle_control));
    }
    let app = router
        .fallback(handle_not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind lamp server at {addr}"))?;

    info!("lamp listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(app_state.restart.clone()))
        .await?;

    shutdown(&app_state).await;
    Ok(())
}

async fn shutdown_signal(restart: Arc<Notify>) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!("failed to listen for ctrl-c: {err}");
            }
            info!("shutdown requested");
        }
        _ = restart.notified() => {
            info!("restart requested, exiting for the supervisor to restart");
        }
    }
}

async fn shutdown(app_state: &AppState) {
    let pending = {
        let mut broker = app_state.broker.lock().await;
        if broker.is_resetting() {
            None
        } else {
            broker.flush_persist()
        }
    };
    if let Some(action) = pending {
        execute_lamp_actions(app_state, vec![action]).await;
    }
    if let Err(err) = app_state
        .mqtt
        .publish(
            availability_topic(&app_state.device),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_OFFLINE,
        )
        .await
    {
        warn!("availability publish failed: {err}");
    }
}

async fn subscribe_topics(app_state: &AppState) -> anyhow::Result<()> {
    let topics = [set_filter(&app_state.device), button_topic(&app_state.device)];
    for topic in topics {
        app_state
            .mqtt
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .context("mqtt subscribe failed")?;
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
                    publish_snapshot(&app_state).await;
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

fn spawn_control_loop(
    app_state: AppState,
    mut queued: UnboundedReceiver<Vec<LampAction>>,
    tick_interval_ms: u64,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(tick_interval_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut button = {
            let broker = app_state.broker.lock().await;
            ButtonMachine::new(broker.config())
        };

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();
            let pressed = app_state.button_level.load(Ordering::Relaxed);

            let actions = {
                let mut broker = app_state.broker.lock().await;
                let mut actions = Vec::new();
                while let Ok(batch) = queued.try_recv() {
                    actions.extend(batch);
                }
                if let Some(event) = button.update(pressed, now_ms) {
                    actions.extend(broker.handle_button(event, now_ms));
                }
                actions.extend(broker.tick(now_ms));
                actions
            };

            if !actions.is_empty() {
                execute_lamp_actions(&app_state, actions).await;
            }
        }
    });
}

// Callers hold the broker lock, so batches reach the control loop in the
// order the broker produced them.
fn queue_actions(app_state: &AppState, actions: Vec<LampAction>) {
    if actions.is_empty() {
        return;
    }
    if app_state.actions.send(actions).is_err() {
        warn!("control loop is gone; dropping lamp actions");
    }
}

async fn execute_lamp_actions(app_state: &AppState, actions: Vec<LampAction>) {
    for action in actions {
        match action {
            LampAction::Output(frame) => {
                if let Err(err) = app_state.output.lock().await.write(frame) {
                    warn!("output write failed: {err}");
                }
            }
            LampAction::Persist(record) => {
                if app_state.records.lock().await.save_record(&record) {
                    debug!("lamp state persisted");
                }
            }
            LampAction::EraseStore => {
                app_state.records.lock().await.erase();
            }
            LampAction::ClearProvisioning => {
                if let Err(err) = app_state.store.clear_provisioning().await {
                    warn!("failed to clear provisioning: {err:#}");
                }
            }
            LampAction::Restart => app_state.restart.notify_one(),
            LampAction::Notify(characteristic) => {
                publish_characteristic(app_state, characteristic).await;
            }
        }
    }
}

async fn publish_characteristic(app_state: &AppState, characteristic: Characteristic) {
    let value = {
        let broker = app_state.broker.lock().await;
        app_state.accessory.read(&broker, characteristic)
    };
    if let Some(value) = value {
        publish_value(app_state, characteristic, value);
    }
}

fn publish_value(app_state: &AppState, characteristic: Characteristic, value: CharacteristicValue) {
    let topic = state_topic(&app_state.device, characteristic);
    // Never block the control loop on a full request queue while the broker is away.
    if let Err(err) = app_state
        .mqtt
        .try_publish(topic, QoS::AtLeastOnce, true, value.to_payload())
    {
        warn!("{} publish failed: {err}", characteristic.name());
    }
}

async fn publish_snapshot(app_state: &AppState) {
    if let Err(err) = app_state
        .mqtt
        .publish(
            availability_topic(&app_state.device),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_ONLINE,
        )
        .await
    {
        warn!("availability publish failed: {err}");
    }

    let snapshot = {
        let broker = app_state.broker.lock().await;
        app_state.accessory.snapshot(&broker)
    };
    for (characteristic, value) in snapshot {
        publish_value(app_state, characteristic, value);
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

    if topic == button_topic(&app_state.device) {
        match parse_button_level(message) {
            Some(pressed) => app_state.button_level.store(pressed, Ordering::Relaxed),
            None => warn!("ignoring button payload '{message}'"),
        }
        return Ok(());
    }

    let Some(characteristic) = parse_set_topic(&app_state.device, topic) else {
        debug!("ignoring message on {topic}");
        return Ok(());
    };
    let Some(value) = CharacteristicValue::parse(message) else {
        warn!("ignoring {} payload '{message}'", characteristic.name());
        return Ok(());
    };

    let mut broker = app_state.broker.lock().await;
    if broker.is_resetting() {
        warn!("ignoring {} command during factory reset", characteristic.name());
        return Ok(());
    }
    let actions = app_state
        .accessory
        .write(&mut broker, characteristic, value, monotonic_ms());
    queue_actions(app_state, actions);
    Ok(())
}

async fn handle_control(
    State(state): State<AppState>,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let capabilities = *state.broker.lock().await.capabilities();
    let request = match parse_control_request(uri.path(), &params, &capabilities) {
        Ok(request) => request,
        Err(err) => return request_error_response(&err),
    };

    match request {
        ControlRequest::Status => {
            let status = state.broker.lock().await.status();
            Json(status).into_response()
        }
        ControlRequest::Scenes => Json(scene_views(&capabilities)).into_response(),
        ControlRequest::Apply(intents) => {
            let mut broker = state.broker.lock().await;
            if broker.is_resetting() {
                return error_response(StatusCode::SERVICE_UNAVAILABLE, "factory reset in progress");
            }
            let now_ms = monotonic_ms();
            let actions = intents
                .into_iter()
                .flat_map(|intent| broker.apply(intent, now_ms))
                .collect::<Vec<_>>();
            queue_actions(&state, actions);
            (StatusCode::OK, ACKNOWLEDGEMENT).into_response()
        }
    }
}

async fn handle_not_found(uri: Uri) -> axum::response::Response {
    request_error_response(&RequestError::UnknownRoute(uri.path().to_string()))
}

fn request_error_response(err: &RequestError) -> axum::response::Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
    error_response(status, &err.to_string())
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("LAMP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.lamp"));

        Self {
            runtime_path: Arc::new(data_dir.join("config.json")),
            state_path: Arc::new(data_dir.join("state.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.runtime_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }

    async fn clear_provisioning(&self) -> anyhow::Result<()> {
        let mut runtime = self.load_runtime_config().await?;
        runtime.network.clear_credentials();
        self.save_runtime_config(&runtime)
            .await
            .context("failed to save cleared network config")?;
        warn!("network provisioning cleared");
        Ok(())
    }
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
    if let Some(port) = env_parse::<u16>("LAMP_HTTP_PORT") {
        runtime.http_port = port;
    }
    if let Ok(variant) = std::env::var("LAMP_VARIANT") {
        match LampVariant::parse(&variant) {
            Some(variant) => runtime.variant = variant,
            None => warn!("ignoring unknown LAMP_VARIANT '{variant}'"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.parse().ok())
}

impl FileRecordStore {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

impl RecordStore for FileRecordStore {
    fn read(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&mut self, record: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let temp = self.temp_path();
        std::fs::write(&temp, record)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn erase(&mut self) -> Result<(), StoreError> {
        remove_if_present(&self.path)?;
        remove_if_present(&self.temp_path())?;
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

impl LightOutput for LoggingOutput {
    fn write(&mut self, frame: OutputFrame) -> Result<(), OutputError> {
        if self.last == Some(frame) {
            return Ok(());
        }
        let duty = duty_for_level(frame.level, SIMULATED_MAX_DUTY);
        match frame.color {
            Some(rgb) => debug!(level = frame.level, duty, r = rgb.r, g = rgb.g, b = rgb.b, "output"),
            None => debug!(level = frame.level, duty, "output"),
        }
        if self.last.map_or(true, |last| last.is_dark() != frame.is_dark()) {
            info!("output {}", if frame.is_dark() { "dark" } else { "lit" });
        }
        self.last = Some(frame);
        Ok(())
    }
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

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
