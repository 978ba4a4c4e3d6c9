pub mod accessory;
pub mod broker;
pub mod button;
pub mod config;
pub mod effect;
pub mod http;
pub mod output;
pub mod scene;
pub mod scheduler;
pub mod store;
pub mod topics;
pub mod transition;
pub mod types;

pub use accessory::{Accessory, Characteristic, CharacteristicValue};
pub use broker::{Intent, LampAction, LampBroker};
pub use button::ButtonMachine;
pub use config::{LampConfig, NetworkConfig, RuntimeConfig};
pub use http::{parse_control_request, parse_query, ControlRequest, RequestError};
pub use output::{LightOutput, OutputError, OutputFrame, Rgb};
pub use scene::{scene_views, SceneDefinition, SceneView};
pub use store::{MemoryRecordStore, PersistedRecord, RecordStore, StateStore, StoreError};
pub use topics::*;
pub use types::{ButtonEvent, Capabilities, LampState, LampStatus, LampVariant};
