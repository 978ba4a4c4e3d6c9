use smart_leds::{
    hsv::{hsv2rgb, Hsv},
    RGB8,
};
use thiserror::Error;

use crate::types::{BRIGHTNESS_MAX, HUE_CYCLE, SATURATION_MAX};

pub type Rgb = RGB8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFrame {
    pub level: u8,
    pub color: Option<Rgb>,
}

impl OutputFrame {
    pub fn monochrome(level: u8) -> Self {
        Self {
            level: level.min(BRIGHTNESS_MAX),
            color: None,
        }
    }

    pub fn colored(level: u8, hue: f32, saturation: f32) -> Self {
        let level = level.min(BRIGHTNESS_MAX);
        Self {
            level,
            color: Some(hsv_to_rgb(hue, saturation, level)),
        }
    }

    pub fn is_dark(&self) -> bool {
        self.level == 0
    }
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output channel `{channel}` write failed: {reason}")]
    Channel {
        channel: &'static str,
        reason: String,
    },
}

pub trait LightOutput {
    fn write(&mut self, frame: OutputFrame) -> Result<(), OutputError>;
}

pub fn hsv_to_rgb(hue: f32, saturation: f32, level: u8) -> Rgb {
    let hue = if hue.is_finite() {
        hue.rem_euclid(HUE_CYCLE) * 255.0 / HUE_CYCLE
    } else {
        0.0
    };
    let saturation = if saturation.is_finite() {
        (saturation / SATURATION_MAX).clamp(0.0, 1.0) * 255.0
    } else {
        0.0
    };

    hsv2rgb(Hsv {
        hue: hue as u8,
        sat: saturation.round() as u8,
        val: percent_to_u8(level),
    })
}

fn percent_to_u8(level: u8) -> u8 {
    let level = u16::from(level.min(BRIGHTNESS_MAX));
    let max = u16::from(BRIGHTNESS_MAX);
    ((level * 255 + max / 2) / max) as u8
}

pub fn duty_for_level(level: u8, max_duty: u32) -> u32 {
    let level = u64::from(level.min(BRIGHTNESS_MAX));
    let max = u64::from(BRIGHTNESS_MAX);
    (u64::from(max_duty) * level * level / (max * max)) as u32
}

pub fn duty_for_channel(channel: u8, max_duty: u32) -> u32 {
    (u64::from(max_duty) * u64::from(channel) / 255) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn primary_hues_map_to_primaries() {
        assert_eq!(hsv_to_rgb(0.0, 100.0, 100), Rgb::new(255, 0, 0));
        assert_eq!(hsv_to_rgb(120.0, 100.0, 100), Rgb::new(0, 255, 0));
        assert_eq!(hsv_to_rgb(240.0, 100.0, 100), Rgb::new(0, 0, 255));
    }

    #[test]
    fn zero_saturation_is_white_and_zero_level_is_black() {
        assert_eq!(hsv_to_rgb(200.0, 0.0, 100), Rgb::new(255, 255, 255));
        assert_eq!(hsv_to_rgb(200.0, 80.0, 0), Rgb::new(0, 0, 0));
    }

    #[test]
    fn level_scales_value() {
        assert_eq!(hsv_to_rgb(0.0, 100.0, 50), Rgb::new(128, 0, 0));
        assert_eq!(hsv_to_rgb(120.0, 0.0, 20), Rgb::new(51, 51, 51));
    }

    #[test]
    fn hue_wraps_and_non_finite_input_is_red() {
        assert_eq!(hsv_to_rgb(360.0, 100.0, 100), Rgb::new(255, 0, 0));
        assert_eq!(hsv_to_rgb(-240.0, 100.0, 100), Rgb::new(0, 255, 0));
        assert_eq!(hsv_to_rgb(f32::NAN, 100.0, 100), Rgb::new(255, 0, 0));
    }

    #[test]
    fn duty_curve_hits_endpoints() {
        assert_eq!(duty_for_level(0, 8191), 0);
        assert_eq!(duty_for_level(100, 8191), 8191);
        assert_eq!(duty_for_level(50, 8191), 2047);
        assert_eq!(duty_for_level(250, 1000), 1000);
    }

    #[test]
    fn channel_duty_is_linear() {
        assert_eq!(duty_for_channel(255, 1023), 1023);
        assert_eq!(duty_for_channel(0, 1023), 0);
    }

    #[test]
    fn frames_clamp_level() {
        assert_eq!(OutputFrame::monochrome(140).level, 100);
        assert!(OutputFrame::colored(0, 10.0, 10.0).is_dark());
    }
}
