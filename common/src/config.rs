use serde::{Deserialize, Serialize};

use crate::types::LampVariant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LampConfig {
    pub debounce_ms: u64,
    pub long_press_ms: u64,
    pub very_long_press_ms: u64,
    pub fade_step_ms: u64,
    pub effect_step_ms: u64,
    pub identify_blinks: u8,
    pub identify_interval_ms: u64,
    pub save_debounce_ms: u64,
    pub tick_interval_ms: u64,
}

impl Default for LampConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            long_press_ms: 1_000,
            very_long_press_ms: 10_000,
            fade_step_ms: 20,
            effect_step_ms: 50,
            identify_blinks: 3,
            identify_interval_ms: 250,
            save_debounce_ms: 2_000,
            tick_interval_ms: 10,
        }
    }
}

impl LampConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        self.debounce_ms = self.debounce_ms.min(500);
        if self.long_press_ms <= self.debounce_ms {
            self.long_press_ms = defaults.long_press_ms.max(self.debounce_ms + 1);
        }
        if self.very_long_press_ms <= self.long_press_ms {
            self.very_long_press_ms = self.long_press_ms.saturating_mul(10);
        }

        self.fade_step_ms = self.fade_step_ms.clamp(1, 1_000);
        self.effect_step_ms = self.effect_step_ms.clamp(1, 1_000);
        self.identify_interval_ms = self.identify_interval_ms.clamp(10, 5_000);
        self.identify_blinks = self.identify_blinks.clamp(1, 20);
        self.save_debounce_ms = self.save_debounce_ms.clamp(250, 60_000);
        self.tick_interval_ms = self.tick_interval_ms.clamp(1, 100);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub device_name: String,
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            device_name: "lamp".to_string(),
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

impl NetworkConfig {
    pub fn clear_credentials(&mut self) {
        let device_name = std::mem::take(&mut self.device_name);
        *self = Self {
            device_name,
            ..Self::default()
        };
    }

    pub fn has_station_credentials(&self) -> bool {
        !self.wifi_ssid.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub lamp: LampConfig,
    pub variant: LampVariant,
    pub network: NetworkConfig,
    pub http_port: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            lamp: LampConfig::default(),
            variant: LampVariant::default(),
            network: NetworkConfig::default(),
            http_port: 80,
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.lamp.sanitize();
        if self.network.device_name.trim().is_empty() {
            self.network.device_name = NetworkConfig::default().device_name;
        }
        if self.http_port == 0 {
            self.http_port = Self::default().http_port;
        }
    }
}
