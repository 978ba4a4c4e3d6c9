use crate::{output::OutputFrame, types::LampState};

const SWEEP_DEGREES_PER_SECOND: u64 = 36;
const BREATHING_PERIOD_MS: u64 = 4_000;
const FLICKER_HUE: f32 = 30.0;
const FLICKER_SATURATION: f32 = 85.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    HueSweep,
    Flicker,
    Breathing,
}

impl EffectKind {
    pub const ALL: [Self; 3] = [Self::HueSweep, Self::Flicker, Self::Breathing];

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::HueSweep),
            2 => Some(Self::Flicker),
            3 => Some(Self::Breathing),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Self::HueSweep => 1,
            Self::Flicker => 2,
            Self::Breathing => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::HueSweep => "hue-sweep",
            Self::Flicker => "flicker",
            Self::Breathing => "breathing",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EffectGenerator {
    kind: EffectKind,
    started_ms: u64,
    rng: u32,
}

impl EffectGenerator {
    pub fn new(kind: EffectKind, now_ms: u64, seed: u32) -> Self {
        Self {
            kind,
            started_ms: now_ms,
            // xorshift32 must never be seeded with zero.
            rng: seed.max(1),
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    pub fn frame(&mut self, state: &LampState, now_ms: u64) -> OutputFrame {
        let elapsed = now_ms.saturating_sub(self.started_ms);
        let ceiling = state.brightness;

        match self.kind {
            EffectKind::HueSweep => {
                let hue = (elapsed * SWEEP_DEGREES_PER_SECOND / 1_000) % 360;
                OutputFrame::colored(ceiling, hue as f32, 100.0)
            }
            EffectKind::Flicker => {
                let jitter = self.next_random() % 41;
                let level = u32::from(ceiling) * (60 + jitter) / 100;
                OutputFrame::colored(level as u8, FLICKER_HUE, FLICKER_SATURATION)
            }
            EffectKind::Breathing => {
                let phase = elapsed % BREATHING_PERIOD_MS;
                let half = BREATHING_PERIOD_MS / 2;
                let ramp = if phase < half {
                    phase
                } else {
                    BREATHING_PERIOD_MS - phase
                };
                let floor = u64::from(ceiling / 10);
                let span = u64::from(ceiling) - floor;
                let level = floor + span * ramp / half;
                OutputFrame::colored(level as u8, state.hue, state.saturation)
            }
        }
    }

    fn next_random(&mut self) -> u32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(brightness: u8) -> LampState {
        LampState {
            on: true,
            brightness,
            hue: 200.0,
            saturation: 50.0,
            effect: 1,
            ..LampState::default()
        }
    }

    #[test]
    fn ids_round_trip() {
        for kind in EffectKind::ALL {
            assert_eq!(EffectKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(EffectKind::from_id(0), None);
        assert_eq!(EffectKind::from_id(9), None);
    }

    #[test]
    fn hue_sweep_moves_around_the_wheel() {
        let state = lit(100);
        let mut generator = EffectGenerator::new(EffectKind::HueSweep, 1_000, 7);

        let start = generator.frame(&state, 1_000);
        let later = generator.frame(&state, 6_000);

        assert_eq!(start.level, 100);
        assert_ne!(start.color, later.color);
        // Full cycle after ten seconds.
        assert_eq!(generator.frame(&state, 11_000).color, start.color);
    }

    #[test]
    fn flicker_stays_under_brightness_ceiling() {
        let state = lit(80);
        let mut generator = EffectGenerator::new(EffectKind::Flicker, 0, 0);
        let mut levels = Vec::new();
        for tick in 0..200 {
            let frame = generator.frame(&state, tick * 50);
            assert!((48..=80).contains(&frame.level), "level {}", frame.level);
            levels.push(frame.level);
        }
        levels.dedup();
        assert!(levels.len() > 10, "flicker should vary");
    }

    #[test]
    fn breathing_oscillates_between_floor_and_ceiling() {
        let state = lit(100);
        let mut generator = EffectGenerator::new(EffectKind::Breathing, 0, 1);

        assert_eq!(generator.frame(&state, 0).level, 10);
        assert_eq!(generator.frame(&state, 2_000).level, 100);
        assert_eq!(generator.frame(&state, 4_000).level, 10);
        let mid = generator.frame(&state, 1_000).level;
        assert!(mid > 10 && mid < 100);
    }

    #[test]
    fn effects_never_touch_state() {
        let state = lit(70);
        let snapshot = state;
        let mut generator = EffectGenerator::new(EffectKind::Breathing, 0, 3);
        for tick in 0..10 {
            generator.frame(&state, tick * 100);
        }
        assert_eq!(state, snapshot);
    }
}
