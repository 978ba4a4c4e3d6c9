use crate::types::BRIGHTNESS_MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadePhase {
    Idle,
    Fading,
}

#[derive(Debug, Clone)]
pub struct FadeEngine {
    current: u8,
    target: u8,
}

impl FadeEngine {
    pub fn new(level: u8) -> Self {
        let level = level.min(BRIGHTNESS_MAX);
        Self {
            current: level,
            target: level,
        }
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    pub fn target(&self) -> u8 {
        self.target
    }

    pub fn phase(&self) -> FadePhase {
        if self.current == self.target {
            FadePhase::Idle
        } else {
            FadePhase::Fading
        }
    }

    pub fn is_fading(&self) -> bool {
        self.phase() == FadePhase::Fading
    }

    pub fn retarget(&mut self, target: u8) -> bool {
        self.target = target.min(BRIGHTNESS_MAX);
        self.is_fading()
    }

    pub fn jump(&mut self, level: u8) {
        let level = level.min(BRIGHTNESS_MAX);
        self.current = level;
        self.target = level;
    }

    pub fn step(&mut self) -> Option<u8> {
        if !self.is_fading() {
            return None;
        }
        self.current = fade_step(self.current, self.target);
        Some(self.current)
    }
}

pub fn fade_step(current: u8, target: u8) -> u8 {
    let distance = current.abs_diff(target);
    let step = (distance / 10).max(1).min(distance);
    if target > current {
        current + step
    } else {
        current - step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_completion(engine: &mut FadeEngine, start: u8, target: u8) -> usize {
        let low = start.min(target);
        let high = start.max(target);
        let mut steps = 0;
        while let Some(level) = engine.step() {
            assert!(
                (low..=high).contains(&level),
                "level {level} escaped [{low}, {high}]"
            );
            steps += 1;
            assert!(steps <= 64, "fade did not converge");
        }
        steps
    }

    #[test]
    fn fade_up_converges_without_overshoot() {
        let mut engine = FadeEngine::new(0);
        assert!(engine.retarget(100));

        let steps = run_to_completion(&mut engine, 0, 100);

        assert_eq!(engine.current(), 100);
        assert_eq!(engine.phase(), FadePhase::Idle);
        assert!(steps < 40, "took {steps} steps");
    }

    #[test]
    fn every_pair_converges_within_bound() {
        for start in 0..=100_u8 {
            for target in 0..=100_u8 {
                let mut engine = FadeEngine::new(start);
                engine.retarget(target);
                run_to_completion(&mut engine, start, target);
                assert_eq!(engine.current(), target);
            }
        }
    }

    #[test]
    fn first_step_is_proportional() {
        assert_eq!(fade_step(0, 100), 10);
        assert_eq!(fade_step(100, 0), 90);
        assert_eq!(fade_step(50, 55), 51);
        assert_eq!(fade_step(55, 54), 54);
    }

    #[test]
    fn retarget_redirects_in_flight_fade() {
        let mut engine = FadeEngine::new(0);
        engine.retarget(100);
        engine.step();
        engine.step();
        let midway = engine.current();
        assert_eq!(midway, 19);

        engine.retarget(10);
        let next = engine.step().unwrap();
        assert!(next < midway);

        run_to_completion(&mut engine, 10, next);
        assert_eq!(engine.current(), 10);
    }

    #[test]
    fn idle_engine_reports_no_step() {
        let mut engine = FadeEngine::new(40);
        assert!(!engine.retarget(40));
        assert_eq!(engine.step(), None);
    }

    #[test]
    fn jump_skips_the_fade() {
        let mut engine = FadeEngine::new(0);
        engine.retarget(80);
        engine.jump(30);
        assert_eq!(engine.current(), 30);
        assert!(!engine.is_fading());
    }

    #[test]
    fn targets_above_range_are_clamped() {
        let mut engine = FadeEngine::new(0);
        engine.retarget(250);
        assert_eq!(engine.target(), 100);
    }
}
