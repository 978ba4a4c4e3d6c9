use log::warn;

use crate::{
    broker::{LampAction, LampBroker},
    types::Capabilities,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    On,
    Brightness,
    Hue,
    Saturation,
    Identify,
}

impl Characteristic {
    pub const ALL: [Self; 5] = [
        Self::On,
        Self::Brightness,
        Self::Hue,
        Self::Saturation,
        Self::Identify,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Brightness => "brightness",
            Self::Hue => "hue",
            Self::Saturation => "saturation",
            Self::Identify => "identify",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CharacteristicValue {
    Bool(bool),
    Int(i64),
    Float(f32),
}

impl CharacteristicValue {
    pub fn as_bool(self) -> bool {
        match self {
            Self::Bool(value) => value,
            Self::Int(value) => value != 0,
            Self::Float(value) => value != 0.0,
        }
    }

    pub fn as_int(self) -> i64 {
        match self {
            Self::Bool(value) => i64::from(value),
            Self::Int(value) => value,
            Self::Float(value) if value.is_finite() => value.round() as i64,
            Self::Float(_) => 0,
        }
    }

    pub fn as_float(self) -> f32 {
        match self {
            Self::Bool(value) => f32::from(u8::from(value)),
            Self::Int(value) => value as f32,
            Self::Float(value) => value,
        }
    }

    pub fn parse(payload: &str) -> Option<Self> {
        let payload = payload.trim();
        match payload.to_ascii_lowercase().as_str() {
            "true" | "on" => return Some(Self::Bool(true)),
            "false" | "off" => return Some(Self::Bool(false)),
            _ => {}
        }
        if let Ok(value) = payload.parse::<i64>() {
            return Some(Self::Int(value));
        }
        payload.parse::<f32>().ok().map(Self::Float)
    }

    pub fn to_payload(self) -> String {
        match self {
            Self::Bool(value) => value.to_string(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => format!("{value:.1}"),
        }
    }
}

type Getter = fn(&LampBroker) -> CharacteristicValue;
type Setter = fn(&mut LampBroker, CharacteristicValue, u64) -> Vec<LampAction>;

#[derive(Debug, Clone, Copy)]
pub struct CharacteristicBinding {
    pub characteristic: Characteristic,
    get: Option<Getter>,
    set: Setter,
}

impl CharacteristicBinding {
    pub fn get(&self, broker: &LampBroker) -> Option<CharacteristicValue> {
        self.get.map(|get| get(broker))
    }

    pub fn set(
        &self,
        broker: &mut LampBroker,
        value: CharacteristicValue,
        now_ms: u64,
    ) -> Vec<LampAction> {
        (self.set)(broker, value, now_ms)
    }
}

fn get_on(broker: &LampBroker) -> CharacteristicValue {
    CharacteristicValue::Bool(broker.state().on)
}

fn set_on(broker: &mut LampBroker, value: CharacteristicValue, now_ms: u64) -> Vec<LampAction> {
    broker.set_on(value.as_bool(), now_ms)
}

fn get_brightness(broker: &LampBroker) -> CharacteristicValue {
    CharacteristicValue::Int(i64::from(broker.state().brightness))
}

fn set_brightness(
    broker: &mut LampBroker,
    value: CharacteristicValue,
    now_ms: u64,
) -> Vec<LampAction> {
    broker.set_brightness(value.as_int(), now_ms)
}

fn get_hue(broker: &LampBroker) -> CharacteristicValue {
    CharacteristicValue::Float(broker.state().hue)
}

fn set_hue(broker: &mut LampBroker, value: CharacteristicValue, now_ms: u64) -> Vec<LampAction> {
    let saturation = broker.state().saturation;
    broker.set_color(value.as_float(), saturation, now_ms)
}

fn get_saturation(broker: &LampBroker) -> CharacteristicValue {
    CharacteristicValue::Float(broker.state().saturation)
}

fn set_saturation(
    broker: &mut LampBroker,
    value: CharacteristicValue,
    now_ms: u64,
) -> Vec<LampAction> {
    let hue = broker.state().hue;
    broker.set_color(hue, value.as_float(), now_ms)
}

fn set_identify(
    broker: &mut LampBroker,
    value: CharacteristicValue,
    now_ms: u64,
) -> Vec<LampAction> {
    if value.as_bool() {
        broker.identify(now_ms)
    } else {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
pub struct Accessory {
    bindings: Vec<CharacteristicBinding>,
}

impl Accessory {
    pub fn new(capabilities: &Capabilities) -> Self {
        let mut bindings = vec![
            CharacteristicBinding {
                characteristic: Characteristic::On,
                get: Some(get_on),
                set: set_on,
            },
            CharacteristicBinding {
                characteristic: Characteristic::Brightness,
                get: Some(get_brightness),
                set: set_brightness,
            },
        ];
        if capabilities.supports_color {
            bindings.push(CharacteristicBinding {
                characteristic: Characteristic::Hue,
                get: Some(get_hue),
                set: set_hue,
            });
            bindings.push(CharacteristicBinding {
                characteristic: Characteristic::Saturation,
                get: Some(get_saturation),
                set: set_saturation,
            });
        }
        bindings.push(CharacteristicBinding {
            characteristic: Characteristic::Identify,
            get: None,
            set: set_identify,
        });
        Self { bindings }
    }

    pub fn characteristics(&self) -> impl Iterator<Item = Characteristic> + '_ {
        self.bindings.iter().map(|binding| binding.characteristic)
    }

    pub fn binding(&self, characteristic: Characteristic) -> Option<&CharacteristicBinding> {
        self.bindings
            .iter()
            .find(|binding| binding.characteristic == characteristic)
    }

    pub fn read(
        &self,
        broker: &LampBroker,
        characteristic: Characteristic,
    ) -> Option<CharacteristicValue> {
        self.binding(characteristic)?.get(broker)
    }

    pub fn write(
        &self,
        broker: &mut LampBroker,
        characteristic: Characteristic,
        value: CharacteristicValue,
        now_ms: u64,
    ) -> Vec<LampAction> {
        match self.binding(characteristic) {
            Some(binding) => binding.set(broker, value, now_ms),
            None => {
                warn!(
                    "characteristic {} is not exposed by this fixture",
                    characteristic.name()
                );
                Vec::new()
            }
        }
    }

    pub fn snapshot(&self, broker: &LampBroker) -> Vec<(Characteristic, CharacteristicValue)> {
        self.bindings
            .iter()
            .filter_map(|binding| Some((binding.characteristic, binding.get(broker)?)))
            .collect()
    }
}
