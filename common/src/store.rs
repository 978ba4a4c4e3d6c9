use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    clamp_brightness, clamp_saturation, normalize_hue, Capabilities, LampState,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub trait RecordStore {
    fn read(&mut self) -> Result<Option<Vec<u8>>, StoreError>;
    fn write(&mut self, record: &[u8]) -> Result<(), StoreError>;
    fn erase(&mut self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<i64>,
}

impl PersistedRecord {
    pub fn from_state(state: &LampState, capabilities: &Capabilities) -> Self {
        Self {
            on: Some(state.on),
            brightness: Some(i64::from(state.brightness)),
            hue: capabilities.supports_color.then_some(state.hue),
            saturation: capabilities.supports_color.then_some(state.saturation),
            scene: Some(i64::from(state.scene)),
        }
    }

    pub fn into_state(self, capabilities: &Capabilities) -> LampState {
        let defaults = LampState::default();
        let scene_count = i64::try_from(capabilities.scene_count()).unwrap_or(i64::MAX);

        let scene = match self.scene {
            Some(scene) if (0..=scene_count).contains(&scene) => scene as u8,
            Some(scene) => {
                warn!("persisted scene {scene} is outside the table, using custom");
                0
            }
            None => defaults.scene,
        };

        LampState {
            on: self.on.unwrap_or(defaults.on),
            brightness: self
                .brightness
                .map(clamp_brightness)
                .unwrap_or(defaults.brightness),
            hue: self.hue.map(normalize_hue).unwrap_or(defaults.hue),
            saturation: self
                .saturation
                .map(clamp_saturation)
                .unwrap_or(defaults.saturation),
            scene,
            effect: 0,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, StoreError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

pub struct StateStore<S> {
    backend: S,
    capabilities: Capabilities,
}

impl<S: RecordStore> StateStore<S> {
    pub fn new(backend: S, capabilities: Capabilities) -> Self {
        Self {
            backend,
            capabilities,
        }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn load(&mut self) -> LampState {
        match self.try_load() {
            Ok(Some(state)) => state,
            Ok(None) => {
                info!("no persisted lamp state, using defaults");
                LampState::default()
            }
            Err(err) => {
                warn!("failed to load persisted lamp state, using defaults: {err}");
                LampState::default()
            }
        }
    }

    pub fn try_load(&mut self) -> Result<Option<LampState>, StoreError> {
        let Some(raw) = self.backend.read()? else {
            return Ok(None);
        };
        let record = PersistedRecord::decode(&raw)?;
        Ok(Some(record.into_state(&self.capabilities)))
    }

    pub fn save(&mut self, state: &LampState) -> bool {
        let record = PersistedRecord::from_state(state, &self.capabilities);
        self.save_record(&record)
    }

    pub fn save_record(&mut self, record: &PersistedRecord) -> bool {
        let result = record
            .encode()
            .and_then(|payload| self.backend.write(&payload));
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to persist lamp state: {err}");
                false
            }
        }
    }

    pub fn erase(&mut self) -> bool {
        match self.backend.erase() {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to erase persisted lamp state: {err}");
                false
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    record: Option<Vec<u8>>,
    writes: usize,
    fail_writes: bool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: &[u8]) -> Self {
        Self {
            record: Some(record.to_vec()),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn raw(&self) -> Option<&[u8]> {
        self.record.as_deref()
    }
}

impl RecordStore for MemoryRecordStore {
    fn read(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.record.clone())
    }

    fn write(&mut self, record: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Backend("flash write rejected".to_string()));
        }
        self.record = Some(record.to_vec());
        self.writes += 1;
        Ok(())
    }

    fn erase(&mut self) -> Result<(), StoreError> {
        self.record = None;
        Ok(())
    }
}
