use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::Method,
    io::Write,
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::gpio::{AnyInputPin, Input, Output, PinDriver, Pull};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{
        gpio::AnyOutputPin,
        ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver, LEDC},
        modem::Modem,
        prelude::*,
    },
    http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, LwtConfiguration, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, info, warn};
use serde::Serialize;

use lamp_common::{
    availability_topic, button_topic,
    http::{ACKNOWLEDGEMENT, CONTROL_ROUTES},
    output::{duty_for_channel, duty_for_level},
    parse_button_level, parse_control_request, parse_query, parse_set_topic, scene_views,
    set_filter, state_topic, Accessory, ButtonMachine, Characteristic, CharacteristicValue,
    ControlRequest, LampAction, LampBroker, LampConfig, LightOutput, NetworkConfig, OutputError,
    OutputFrame, RecordStore, RequestError, RuntimeConfig, StateStore, StoreError,
    PAYLOAD_OFFLINE, PAYLOAD_ONLINE,
};

const NVS_NAMESPACE: &str = "lamp";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const NVS_STATE_KEY: &str = "state_json";
const NVS_RECORD_CAPACITY: usize = 256;
const MAX_MQTT_PAYLOAD_BYTES: usize = 64;
const WATCHDOG_TIMEOUT_SEC: u32 = 5;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const PWM_FREQUENCY_KHZ: u32 = 5;
const WHITE_PIN: i32 = 4;
const RED_PIN: i32 = 4;
const GREEN_PIN: i32 = 5;
const BLUE_PIN: i32 = 6;
const BUTTON_PIN: i32 = 9;
const STATUS_LED_PIN: i32 = 48;
const LED_FAST_BLINK_MS: u64 = 200;
const RESTART_DELAY_MS: u64 = 100;

#[derive(Clone)]
struct SharedState {
    broker: Arc<Mutex<LampBroker>>,
    accessory: Arc<Accessory>,
    actions: Sender<Vec<LampAction>>,
    mqtt: Option<Arc<Mutex<EspMqttClient<'static>>>>,
    mqtt_connected: Arc<AtomicBool>,
    device: Arc<str>,
}

struct StatusLed {
    pin: PinDriver<'static, AnyOutputPin, Output>,
    lit: bool,
}

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

struct NvsRecordStore {
    nvs: EspNvs<NvsDefault>,
}

struct PwmOutput<T> {
    channels: Vec<LedcDriver<'static>>,
    max_duty: u32,
    _timer: T,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
        lock: Arc::new(Mutex::new(())),
    };

    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();
    ensure_wifi_defaults(&mut runtime);

    let capabilities = runtime.variant.capabilities();
    info!(
        "NVS config loaded: variant={}, device=`{}`, mqtt=`{}:{}`",
        runtime.variant.as_str(),
        runtime.network.device_name,
        runtime.network.mqtt_host,
        runtime.network.mqtt_port,
    );

    let mut records = StateStore::new(
        NvsRecordStore::new(nvs_partition.clone()).context("failed to open lamp NVS namespace")?,
        capabilities,
    );
    let mut broker = LampBroker::new(runtime.lamp.clone(), capabilities, records.load());
    let startup = broker.start(monotonic_ms());

    let Peripherals { modem, ledc, .. } = Peripherals::take()?;
    let mut output = init_pwm_output(ledc, capabilities.supports_color)
        .context("failed to initialize LEDC output")?;
    for action in startup {
        if let LampAction::Output(frame) = action {
            if let Err(err) = output.write(frame) {
                warn!("initial output write failed: {err}");
            }
        }
    }

    let button = init_button(BUTTON_PIN).context("failed to initialize button input")?;
    let status_led = init_status_led(STATUS_LED_PIN);

    let wifi = connect_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .unwrap_or_else(|err| {
            warn!("wifi startup failed, running offline: {err:#}");
            None
        });

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;

    let device: Arc<str> = Arc::from(runtime.network.device_name.as_str());
    let mqtt_connected = Arc::new(AtomicBool::new(false));
    let (action_tx, action_rx) = mpsc::channel();

    let (mqtt, mqtt_conn) = if wifi.is_some() {
        match create_mqtt_client(&runtime.network) {
            Ok((client, conn)) => (Some(Arc::new(Mutex::new(client))), Some(conn)),
            Err(err) => {
                warn!("mqtt client unavailable: {err:#}");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    let shared_state = SharedState {
        broker: Arc::new(Mutex::new(broker)),
        accessory: Arc::new(Accessory::new(&capabilities)),
        actions: action_tx,
        mqtt,
        mqtt_connected,
        device,
    };

    if let (Some(client), Some(conn)) = (shared_state.mqtt.clone(), mqtt_conn) {
        if let Err(err) = subscribe_topics(&shared_state, &client) {
            warn!("mqtt subscribe failed: {err:#}");
        }
        spawn_mqtt_receiver(shared_state.clone(), conn, client)?;
    }

    spawn_control_loop(
        shared_state.clone(),
        nvs_store,
        records,
        output,
        button,
        status_led,
        action_rx,
        runtime.lamp.clone(),
    )?;

    let server = create_http_server(shared_state.clone())?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }
}

fn init_pwm_output(
    ledc: LEDC,
    color: bool,
) -> anyhow::Result<PwmOutput<impl Send + 'static>> {
    let timer = LedcTimerDriver::new(
        ledc.timer0,
        &TimerConfig::default().frequency(PWM_FREQUENCY_KHZ.kHz().into()),
    )?;

    let channels = if color {
        vec![
            LedcDriver::new(ledc.channel0, &timer, unsafe { AnyOutputPin::new(RED_PIN) })?,
            LedcDriver::new(ledc.channel1, &timer, unsafe { AnyOutputPin::new(GREEN_PIN) })?,
            LedcDriver::new(ledc.channel2, &timer, unsafe { AnyOutputPin::new(BLUE_PIN) })?,
        ]
    } else {
        vec![LedcDriver::new(ledc.channel0, &timer, unsafe {
            AnyOutputPin::new(WHITE_PIN)
        })?]
    };

    let max_duty = channels
        .first()
        .map(LedcDriver::get_max_duty)
        .ok_or_else(|| anyhow!("no LEDC channel configured"))?;
    info!(
        "LEDC output ready: {} channel(s), max duty {max_duty}",
        channels.len()
    );

    Ok(PwmOutput {
        channels,
        max_duty,
        _timer: timer,
    })
}

impl<T> LightOutput for PwmOutput<T> {
    fn write(&mut self, frame: OutputFrame) -> Result<(), OutputError> {
        let max_duty = self.max_duty;
        match (frame.color, self.channels.as_mut_slice()) {
            (Some(rgb), [red, green, blue]) => {
                set_duty(red, "red", duty_for_channel(rgb.r, max_duty))?;
                set_duty(green, "green", duty_for_channel(rgb.g, max_duty))?;
                set_duty(blue, "blue", duty_for_channel(rgb.b, max_duty))
            }
            (_, [white, ..]) => set_duty(white, "white", duty_for_level(frame.level, max_duty)),
            (_, []) => Ok(()),
        }
    }
}

fn set_duty(
    channel: &mut LedcDriver<'static>,
    name: &'static str,
    duty: u32,
) -> Result<(), OutputError> {
    channel.set_duty(duty).map_err(|err| OutputError::Channel {
        channel: name,
        reason: err.to_string(),
    })
}

fn init_button(pin: i32) -> anyhow::Result<PinDriver<'static, AnyInputPin, Input>> {
    let mut driver = PinDriver::input(unsafe { AnyInputPin::new(pin) })?;
    driver.set_pull(Pull::Up)?;
    Ok(driver)
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<Option<EspWifi<'static>>> {
    if !network.has_station_credentials() {
        warn!("wifi credentials missing; running with button control only");
        return Ok(None);
    }

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected on attempt {attempt}");
                drop(wifi);
                return Ok(Some(esp_wifi));
            }
            Err(err) => warn!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS} failed: {err:#}"),
        }
        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    let _ = wifi.stop();
    Err(anyhow!("all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed"))
}

fn create_mqtt_client(
    network: &NetworkConfig,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);
    let client_id = format!("lamp-{}", network.device_name);
    let will_topic = availability_topic(&network.device_name);

    let conf = MqttClientConfiguration {
        client_id: Some(client_id.as_str()),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        lwt: Some(LwtConfiguration {
            topic: will_topic.as_str(),
            payload: PAYLOAD_OFFLINE.as_bytes(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }),
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn subscribe_topics(
    state: &SharedState,
    mqtt: &Arc<Mutex<EspMqttClient<'static>>>,
) -> anyhow::Result<()> {
    let mut mqtt = lock(mqtt);
    for topic in [set_filter(&state.device), button_topic(&state.device)] {
        mqtt.subscribe(&topic, QoS::AtMostOnce)?;
    }
    Ok(())
}

fn spawn_mqtt_receiver(
    state: SharedState,
    mut conn: EspMqttConnection,
    mqtt: Arc<Mutex<EspMqttClient<'static>>>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(8 * 1024)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => {
                        state.mqtt_connected.store(true, Ordering::Relaxed);
                        publish_snapshot(&state);
                    }
                    EventPayload::Disconnected => {
                        state.mqtt_connected.store(false, Ordering::Relaxed);
                    }
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details,
                        ..
                    } => {
                        // Only complete payloads are handled.
                        if !matches!(details, Details::Complete) {
                            continue;
                        }
                        if data.len() > MAX_MQTT_PAYLOAD_BYTES {
                            warn!(
                                "dropping oversized MQTT payload on topic {} ({} bytes)",
                                topic,
                                data.len()
                            );
                            continue;
                        }
                        if let Ok(message) = core::str::from_utf8(data) {
                            handle_mqtt_message(&state, topic, message);
                        }
                    }
                    _ => {}
                },
                Err(err) => {
                    state.mqtt_connected.store(false, Ordering::Relaxed);
                    warn!("mqtt receive loop error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                    if let Err(sub_err) = subscribe_topics(&state, &mqtt) {
                        warn!("mqtt re-subscribe failed: {sub_err:#}");
                    }
                }
            }
        })
        .context("failed to spawn mqtt receiver thread")?;
    Ok(())
}

fn handle_mqtt_message(state: &SharedState, topic: &str, message: &str) {
    if topic == button_topic(&state.device) {
        // The physical button is authoritative on hardware; remote levels are only logged.
        debug!("remote button level {:?} ignored", parse_button_level(message));
        return;
    }

    let Some(characteristic) = parse_set_topic(&state.device, topic) else {
        return;
    };
    let Some(value) = CharacteristicValue::parse(message) else {
        warn!("ignoring {} payload '{message}'", characteristic.name());
        return;
    };

    let mut broker = lock(&state.broker);
    let actions = state
        .accessory
        .write(&mut broker, characteristic, value, monotonic_ms());
    queue_actions(state, actions);
}

fn publish_snapshot(state: &SharedState) {
    let Some(mqtt) = state.mqtt.as_ref() else {
        return;
    };
    let snapshot = {
        let broker = lock(&state.broker);
        state.accessory.snapshot(&broker)
    };

    let mut client = lock(mqtt);
    if let Err(err) = client.enqueue(
        &availability_topic(&state.device),
        QoS::AtLeastOnce,
        true,
        PAYLOAD_ONLINE.as_bytes(),
    ) {
        warn!("availability publish failed: {err}");
    }
    for (characteristic, value) in snapshot {
        enqueue_value(&mut client, &state.device, characteristic, value);
    }
}

fn enqueue_value(
    client: &mut EspMqttClient<'static>,
    device: &str,
    characteristic: Characteristic,
    value: CharacteristicValue,
) {
    let topic = state_topic(device, characteristic);
    if let Err(err) = client.enqueue(
        &topic,
        QoS::AtLeastOnce,
        true,
        value.to_payload().as_bytes(),
    ) {
        warn!("{} publish failed: {err}", characteristic.name());
    }
}

// Callers hold the broker lock, so batches reach the control loop in the
// order the broker produced them.
fn queue_actions(state: &SharedState, actions: Vec<LampAction>) {
    if actions.is_empty() {
        return;
    }
    if state.actions.send(actions).is_err() {
        warn!("control loop is gone; dropping lamp actions");
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_control_loop<O>(
    state: SharedState,
    nvs_store: NvsStore,
    mut records: StateStore<NvsRecordStore>,
    mut output: O,
    button: PinDriver<'static, AnyInputPin, Input>,
    mut status_led: Option<StatusLed>,
    actions: Receiver<Vec<LampAction>>,
    config: LampConfig,
) -> anyhow::Result<()>
where
    O: LightOutput + Send + 'static,
{
    thread::Builder::new()
        .name("control-loop".into())
        .stack_size(12 * 1024)
        .spawn(move || {
            if let Err(err) = add_current_task_to_watchdog() {
                warn!("failed to register control loop with watchdog: {err:#}");
            }

            let mut machine = ButtonMachine::new(&config);
            let tick = Duration::from_millis(config.tick_interval_ms);

            loop {
                feed_watchdog();
                let now_ms = monotonic_ms();
                update_status_led(&mut status_led, is_wifi_station_connected(), now_ms);

                let pending = {
                    let mut broker = lock(&state.broker);
                    let mut pending: Vec<LampAction> = actions.try_iter().flatten().collect();
                    if let Some(event) = machine.update(button.is_low(), now_ms) {
                        pending.extend(broker.handle_button(event, now_ms));
                    }
                    pending.extend(broker.tick(now_ms));
                    pending
                };

                execute_lamp_actions(&state, &nvs_store, &mut records, &mut output, pending);
                thread::sleep(tick);
            }
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

fn execute_lamp_actions<O: LightOutput>(
    state: &SharedState,
    nvs_store: &NvsStore,
    records: &mut StateStore<NvsRecordStore>,
    output: &mut O,
    actions: Vec<LampAction>,
) {
    for action in actions {
        match action {
            LampAction::Output(frame) => {
                if let Err(err) = output.write(frame) {
                    warn!("output write failed: {err}");
                }
            }
            LampAction::Persist(record) => {
                if records.save_record(&record) {
                    debug!("lamp state persisted");
                }
            }
            LampAction::EraseStore => {
                records.erase();
            }
            LampAction::ClearProvisioning => {
                if let Err(err) = nvs_store.clear_provisioning() {
                    warn!("failed to clear provisioning: {err:#}");
                }
            }
            LampAction::Restart => {
                warn!("restarting device");
                thread::sleep(Duration::from_millis(RESTART_DELAY_MS));
                unsafe { esp_idf_svc::sys::esp_restart() };
            }
            LampAction::Notify(characteristic) => notify(state, characteristic),
        }
    }
}

fn notify(state: &SharedState, characteristic: Characteristic) {
    let Some(mqtt) = state.mqtt.as_ref() else {
        return;
    };
    if !state.mqtt_connected.load(Ordering::Relaxed) {
        return;
    }
    let value = {
        let broker = lock(&state.broker);
        state.accessory.read(&broker, characteristic)
    };
    if let Some(value) = value {
        enqueue_value(&mut lock(mqtt), &state.device, characteristic, value);
    }
}

fn create_http_server(state: SharedState) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 10 * 1024,
        uri_match_wildcard: true,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    for route in CONTROL_ROUTES {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>(route, Method::Get, move |req| {
            let uri = req.uri().to_string();
            let (path, query) = uri.split_once('?').unwrap_or((uri.as_str(), ""));
            handle_control(&state, req, path, &parse_query(query))
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/*", Method::Get, move |req| {
        let uri = req.uri().to_string();
        let path = uri.split_once('?').map_or(uri.as_str(), |(path, _)| path);
        write_request_error(req, &RequestError::UnknownRoute(path.to_string()))
    })?;

    Ok(server)
}

fn handle_control(
    state: &SharedState,
    req: Request<&mut EspHttpConnection<'_>>,
    path: &str,
    params: &HashMap<String, String>,
) -> anyhow::Result<()> {
    let capabilities = *lock(&state.broker).capabilities();
    let request = match parse_control_request(path, params, &capabilities) {
        Ok(request) => request,
        Err(err) => return write_request_error(req, &err),
    };

    match request {
        ControlRequest::Status => {
            let status = lock(&state.broker).status();
            write_json(req, &status)
        }
        ControlRequest::Scenes => write_json(req, &scene_views(&capabilities)),
        ControlRequest::Apply(intents) => {
            {
                let mut broker = lock(&state.broker);
                let now_ms = monotonic_ms();
                let actions = intents
                    .into_iter()
                    .flat_map(|intent| broker.apply(intent, now_ms))
                    .collect::<Vec<_>>();
                queue_actions(state, actions);
            }
            req.into_ok_response()?
                .write_all(ACKNOWLEDGEMENT.as_bytes())?;
            Ok(())
        }
    }
}

fn write_json<T: Serialize>(
    req: Request<&mut EspHttpConnection<'_>>,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_request_error(
    req: Request<&mut EspHttpConnection<'_>>,
    err: &RequestError,
) -> anyhow::Result<()> {
    let message = err.to_string();
    let body = serde_json::to_vec(&ErrorBody { error: &message })?;
    req.into_response(
        err.status_code(),
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = lock(&self.lock);
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 2048];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }

    fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = lock(&self.lock);
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let payload = serde_json::to_string(runtime)?;
        nvs.set_str(NVS_RUNTIME_KEY, &payload)?;
        Ok(())
    }

    fn clear_provisioning(&self) -> anyhow::Result<()> {
        let mut runtime = self.load_runtime_config()?;
        runtime.network.clear_credentials();
        self.save_runtime_config(&runtime)?;
        warn!("network provisioning cleared");
        Ok(())
    }
}

impl NvsRecordStore {
    fn new(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        Ok(Self {
            nvs: EspNvs::new(partition, NVS_NAMESPACE, true)?,
        })
    }
}

impl RecordStore for NvsRecordStore {
    fn read(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        let mut buffer = [0_u8; NVS_RECORD_CAPACITY];
        self.nvs
            .get_raw(NVS_STATE_KEY, &mut buffer)
            .map(|raw| raw.map(<[u8]>::to_vec))
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn write(&mut self, record: &[u8]) -> Result<(), StoreError> {
        self.nvs
            .set_raw(NVS_STATE_KEY, record)
            .map(|_| ())
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn erase(&mut self) -> Result<(), StoreError> {
        self.nvs
            .remove(NVS_STATE_KEY)
            .map(|_| ())
            .map_err(|err| StoreError::Backend(err.to_string()))
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn is_wifi_station_connected() -> bool {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    rc == esp_idf_svc::sys::ESP_OK
}

fn init_status_led(pin: i32) -> Option<StatusLed> {
    let driver = unsafe { PinDriver::output(AnyOutputPin::new(pin)) };
    match driver {
        Ok(mut pin) => {
            let _ = pin.set_low();
            Some(StatusLed { pin, lit: false })
        }
        Err(err) => {
            warn!("status LED unavailable on GPIO{pin}: {err}");
            None
        }
    }
}

fn update_status_led(status_led: &mut Option<StatusLed>, wifi_connected: bool, now_ms: u64) {
    let Some(led) = status_led.as_mut() else {
        return;
    };

    let desired_on = wifi_connected || (now_ms / LED_FAST_BLINK_MS) % 2 == 0;
    if desired_on == led.lit {
        return;
    }

    let result = if desired_on {
        led.pin.set_high()
    } else {
        led.pin.set_low()
    };

    if let Err(err) = result {
        warn!("failed to drive status LED: {err}");
    } else {
        led.lit = desired_on;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
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
