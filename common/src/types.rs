use serde::{Deserialize, Serialize};

use crate::scene::{SceneDefinition, COLOR_SCENES, MONOCHROME_SCENES};

pub const BRIGHTNESS_MAX: u8 = 100;
pub const SATURATION_MAX: f32 = 100.0;
pub const HUE_CYCLE: f32 = 360.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LampState {
    pub on: bool,
    pub brightness: u8,
    pub hue: f32,
    pub saturation: f32,
    pub scene: u8,
    pub effect: u8,
}

impl Default for LampState {
    fn default() -> Self {
        Self {
            on: false,
            brightness: BRIGHTNESS_MAX,
            hue: 0.0,
            saturation: 0.0,
            scene: 0,
            effect: 0,
        }
    }
}

impl LampState {
    pub fn target_level(&self) -> u8 {
        if self.on {
            self.brightness
        } else {
            0
        }
    }
}

pub fn clamp_brightness(value: i64) -> u8 {
    value.clamp(0, i64::from(BRIGHTNESS_MAX)) as u8
}

pub fn normalize_hue(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    let wrapped = value.rem_euclid(HUE_CYCLE);
    // rem_euclid can round up to the modulus for tiny negative inputs.
    if wrapped >= HUE_CYCLE {
        0.0
    } else {
        wrapped
    }
}

pub fn clamp_saturation(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, SATURATION_MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    ShortPress,
    LongPress,
    VeryLongPress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LampVariant {
    Monochrome,
    Scenes,
    #[default]
    Color,
}

impl LampVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monochrome => "monochrome",
            Self::Scenes => "scenes",
            Self::Color => "color",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "monochrome" => Some(Self::Monochrome),
            "scenes" => Some(Self::Scenes),
            "color" => Some(Self::Color),
            _ => None,
        }
    }

    pub fn capabilities(self) -> Capabilities {
        match self {
            Self::Monochrome => Capabilities::monochrome(),
            Self::Scenes => Capabilities::monochrome_with_scenes(),
            Self::Color => Capabilities::color(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capabilities {
    pub supports_color: bool,
    pub supports_effects: bool,
    pub scenes: &'static [SceneDefinition],
}

impl Capabilities {
    pub fn monochrome() -> Self {
        Self {
            supports_color: false,
            supports_effects: false,
            scenes: &[],
        }
    }

    pub fn monochrome_with_scenes() -> Self {
        Self {
            supports_color: false,
            supports_effects: false,
            scenes: MONOCHROME_SCENES,
        }
    }

    pub fn color() -> Self {
        Self {
            supports_color: true,
            supports_effects: true,
            scenes: COLOR_SCENES,
        }
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LampStatus {
    pub on: bool,
    pub brightness: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hue: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f32>,
    pub scene: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<u8>,
}

impl LampStatus {
    pub fn from_state(state: &LampState, capabilities: &Capabilities) -> Self {
        Self {
            on: state.on,
            brightness: state.brightness,
            hue: capabilities.supports_color.then_some(state.hue),
            saturation: capabilities.supports_color.then_some(state.saturation),
            scene: state.scene,
            effect: capabilities.supports_effects.then_some(state.effect),
        }
    }
}
