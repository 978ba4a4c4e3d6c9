use log::{debug, info, warn};

use crate::{
    accessory::Characteristic,
    config::LampConfig,
    effect::{EffectGenerator, EffectKind},
    output::OutputFrame,
    scene::{next_scene, scene_by_id},
    scheduler::{TaskKind, TaskQueue},
    store::PersistedRecord,
    transition::FadeEngine,
    types::{
        clamp_brightness, clamp_saturation, normalize_hue, ButtonEvent, Capabilities, LampState,
        LampStatus, BRIGHTNESS_MAX,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub enum LampAction {
    Output(OutputFrame),
    Persist(PersistedRecord),
    EraseStore,
    ClearProvisioning,
    Restart,
    Notify(Characteristic),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intent {
    SetOn(bool),
    SetBrightness(i64),
    SetColor { hue: f32, saturation: f32 },
    ApplyScene(i64),
    CycleScene,
    SetEffect(i64),
    Identify,
    FactoryReset,
}

#[derive(Debug, Clone, Copy)]
struct IdentifyBlink {
    remaining_toggles: u8,
    lit: bool,
}

#[derive(Debug, Clone)]
pub struct LampBroker {
    config: LampConfig,
    capabilities: Capabilities,
    state: LampState,
    fade: FadeEngine,
    effect: Option<EffectGenerator>,
    identify: Option<IdentifyBlink>,
    tasks: TaskQueue,
    seed: u32,
    resetting: bool,
}

impl LampBroker {
    pub fn new(config: LampConfig, capabilities: Capabilities, state: LampState) -> Self {
        let record = PersistedRecord::from_state(&state, &capabilities);
        Self {
            config,
            capabilities,
            state: record.into_state(&capabilities),
            fade: FadeEngine::new(0),
            effect: None,
            identify: None,
            tasks: TaskQueue::new(),
            seed: 0x9E37_79B9,
            resetting: false,
        }
    }

    pub fn config(&self) -> &LampConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn state(&self) -> &LampState {
        &self.state
    }

    pub fn status(&self) -> LampStatus {
        LampStatus::from_state(&self.state, &self.capabilities)
    }

    pub fn output_level(&self) -> u8 {
        self.fade.current()
    }

    pub fn is_fading(&self) -> bool {
        self.fade.is_fading()
    }

    pub fn is_identifying(&self) -> bool {
        self.identify.is_some()
    }

    pub fn active_effect(&self) -> Option<EffectKind> {
        self.effect.as_ref().map(EffectGenerator::kind)
    }

    pub fn is_resetting(&self) -> bool {
        self.resetting
    }

    pub fn has_pending_persist(&self) -> bool {
        self.tasks.is_scheduled(TaskKind::PersistFlush)
    }

    pub fn start(&mut self, now_ms: u64) -> Vec<LampAction> {
        let mut actions = vec![LampAction::Output(self.frame_for_level(self.fade.current()))];
        self.sync_output(false, now_ms, &mut actions);
        actions
    }

    pub fn apply(&mut self, intent: Intent, now_ms: u64) -> Vec<LampAction> {
        match intent {
            Intent::SetOn(on) => self.set_on(on, now_ms),
            Intent::SetBrightness(value) => self.set_brightness(value, now_ms),
            Intent::SetColor { hue, saturation } => self.set_color(hue, saturation, now_ms),
            Intent::ApplyScene(id) => self.apply_scene(id, now_ms),
            Intent::CycleScene => self.cycle_scene(now_ms),
            Intent::SetEffect(id) => self.set_effect(id, now_ms),
            Intent::Identify => self.identify(now_ms),
            Intent::FactoryReset => self.factory_reset(),
        }
    }

    pub fn handle_button(&mut self, event: ButtonEvent, now_ms: u64) -> Vec<LampAction> {
        info!("button event: {event:?}");
        match event {
            ButtonEvent::ShortPress => self.set_on(!self.state.on, now_ms),
            ButtonEvent::LongPress => self.cycle_scene(now_ms),
            ButtonEvent::VeryLongPress => self.factory_reset(),
        }
    }

    pub fn set_on(&mut self, on: bool, now_ms: u64) -> Vec<LampAction> {
        let before = self.state;
        self.state.on = on;
        if !on {
            self.state.effect = 0;
        }
        self.commit(before, now_ms)
    }

    pub fn set_brightness(&mut self, value: i64, now_ms: u64) -> Vec<LampAction> {
        let before = self.state;
        let brightness = clamp_brightness(value);
        if i64::from(brightness) != value {
            debug!("brightness {value} clamped to {brightness}");
        }
        self.state.brightness = brightness;
        self.state.scene = 0;
        self.commit(before, now_ms)
    }

    pub fn set_color(&mut self, hue: f32, saturation: f32, now_ms: u64) -> Vec<LampAction> {
        if !self.capabilities.supports_color {
            warn!("ignoring color command on a monochrome fixture");
            return Vec::new();
        }
        let before = self.state;
        self.state.hue = normalize_hue(hue);
        self.state.saturation = clamp_saturation(saturation);
        self.state.scene = 0;
        self.state.effect = 0;
        self.commit(before, now_ms)
    }

    pub fn apply_scene(&mut self, id: i64, now_ms: u64) -> Vec<LampAction> {
        let before = self.state;

        if id == 0 {
            self.state.scene = 0;
            return self.commit(before, now_ms);
        }

        let Some((id, scene)) = u8::try_from(id)
            .ok()
            .and_then(|id| scene_by_id(self.capabilities.scenes, id).map(|scene| (id, *scene)))
        else {
            warn!(
                "ignoring scene {id}; {} scene(s) available",
                self.capabilities.scene_count()
            );
            return Vec::new();
        };

        self.state.brightness = scene.brightness.min(BRIGHTNESS_MAX);
        if self.capabilities.supports_color {
            self.state.hue = normalize_hue(scene.hue);
            self.state.saturation = clamp_saturation(scene.saturation);
        }
        self.state.scene = id;
        self.state.effect = 0;
        self.state.on = true;
        info!("scene {id} ({}) applied", scene.name);
        self.commit(before, now_ms)
    }

    pub fn cycle_scene(&mut self, now_ms: u64) -> Vec<LampAction> {
        match next_scene(self.state.scene, self.capabilities.scene_count()) {
            Some(id) => self.apply_scene(i64::from(id), now_ms),
            None => {
                debug!("no scenes to cycle");
                Vec::new()
            }
        }
    }

    pub fn set_effect(&mut self, id: i64, now_ms: u64) -> Vec<LampAction> {
        if !self.capabilities.supports_effects {
            warn!("ignoring effect command on a fixture without effects");
            return Vec::new();
        }

        let before = self.state;
        if id == 0 {
            self.state.effect = 0;
        } else {
            let Some(kind) = u8::try_from(id).ok().and_then(EffectKind::from_id) else {
                warn!("ignoring unknown effect {id}");
                return Vec::new();
            };
            self.state.effect = kind.id();
            self.state.on = true;
            info!("effect {} started", kind.name());
        }
        self.commit(before, now_ms)
    }

    pub fn identify(&mut self, now_ms: u64) -> Vec<LampAction> {
        if self.resetting {
            return Vec::new();
        }
        let toggles = self.config.identify_blinks.saturating_mul(2).saturating_sub(1);
        self.identify = Some(IdentifyBlink {
            remaining_toggles: toggles,
            lit: true,
        });
        self.tasks
            .schedule_every(TaskKind::Identify, self.config.identify_interval_ms, now_ms);
        vec![LampAction::Output(self.frame_for_level(BRIGHTNESS_MAX))]
    }

    // Terminal: once requested, every later intent is refused until restart.
    pub fn factory_reset(&mut self) -> Vec<LampAction> {
        if self.resetting {
            return Vec::new();
        }
        warn!("factory reset requested");
        self.resetting = true;
        self.tasks.cancel_all();
        self.effect = None;
        self.identify = None;
        self.state = LampState::default();
        self.fade.jump(0);
        vec![
            LampAction::Output(self.frame_for_level(0)),
            LampAction::EraseStore,
            LampAction::ClearProvisioning,
            LampAction::Restart,
        ]
    }

    pub fn tick(&mut self, now_ms: u64) -> Vec<LampAction> {
        let mut actions = Vec::new();
        for task in self.tasks.take_due(now_ms) {
            match task {
                TaskKind::Identify => self.step_identify(now_ms, &mut actions),
                TaskKind::Effect => self.step_effect(now_ms, &mut actions),
                TaskKind::Fade => self.step_fade(&mut actions),
                TaskKind::PersistFlush => actions.push(self.persist_action()),
            }
        }
        actions
    }

    pub fn flush_persist(&mut self) -> Option<LampAction> {
        self.tasks
            .cancel(TaskKind::PersistFlush)
            .then(|| self.persist_action())
    }

    fn commit(&mut self, before: LampState, now_ms: u64) -> Vec<LampAction> {
        let mut actions = Vec::new();
        if self.resetting {
            debug!("ignoring state change while resetting");
            self.state = before;
            return actions;
        }
        if self.state == before {
            return actions;
        }

        let color_changed =
            before.hue != self.state.hue || before.saturation != self.state.saturation;
        self.sync_output(color_changed, now_ms, &mut actions);

        if PersistedRecord::from_state(&before, &self.capabilities)
            != PersistedRecord::from_state(&self.state, &self.capabilities)
        {
            self.tasks.schedule_once(
                TaskKind::PersistFlush,
                self.config.save_debounce_ms,
                now_ms,
            );
        }

        actions.extend(
            self.changed_characteristics(&before)
                .into_iter()
                .map(LampAction::Notify),
        );
        actions
    }

    fn sync_output(&mut self, mut force_frame: bool, now_ms: u64, actions: &mut Vec<LampAction>) {
        let wanted_effect = EffectKind::from_id(self.state.effect)
            .filter(|_| self.capabilities.supports_effects && self.state.on);

        match wanted_effect {
            Some(kind) => {
                if self.active_effect() != Some(kind) {
                    self.seed = self
                        .seed
                        .wrapping_mul(1_664_525)
                        .wrapping_add(1_013_904_223);
                    let mut generator = EffectGenerator::new(kind, now_ms, self.seed);
                    let frame = generator.frame(&self.state, now_ms);
                    self.effect = Some(generator);
                    self.tasks
                        .schedule_every(TaskKind::Effect, self.config.effect_step_ms, now_ms);
                    if self.identify.is_none() {
                        actions.push(LampAction::Output(frame));
                    }
                }
            }
            None => {
                if self.effect.take().is_some() {
                    self.tasks.cancel(TaskKind::Effect);
                    force_frame = true;
                }
            }
        }

        // The fade keeps tracking the target under an effect so that the
        // handover back to static output starts from the right level.
        if self.fade.retarget(self.state.target_level()) {
            self.tasks
                .ensure_every(TaskKind::Fade, self.config.fade_step_ms, now_ms);
        }

        if force_frame && self.effect.is_none() && self.identify.is_none() {
            actions.push(LampAction::Output(self.frame_for_level(self.fade.current())));
        }
    }

    fn step_fade(&mut self, actions: &mut Vec<LampAction>) {
        if let Some(level) = self.fade.step() {
            if self.effect.is_none() && self.identify.is_none() {
                actions.push(LampAction::Output(self.frame_for_level(level)));
            }
        }
        if !self.fade.is_fading() {
            self.tasks.cancel(TaskKind::Fade);
        }
    }

    fn step_effect(&mut self, now_ms: u64, actions: &mut Vec<LampAction>) {
        let Some(generator) = self.effect.as_mut() else {
            self.tasks.cancel(TaskKind::Effect);
            return;
        };
        let frame = generator.frame(&self.state, now_ms);
        if self.identify.is_none() {
            actions.push(LampAction::Output(frame));
        }
    }

    fn step_identify(&mut self, now_ms: u64, actions: &mut Vec<LampAction>) {
        let Some(blink) = self.identify.as_mut() else {
            self.tasks.cancel(TaskKind::Identify);
            return;
        };

        if blink.remaining_toggles == 0 {
            self.identify = None;
            self.tasks.cancel(TaskKind::Identify);
            let frame = match self.effect.as_mut() {
                Some(generator) => generator.frame(&self.state, now_ms),
                None => self.frame_for_level(self.fade.current()),
            };
            actions.push(LampAction::Output(frame));
            return;
        }

        blink.remaining_toggles -= 1;
        blink.lit = !blink.lit;
        let level = if blink.lit { BRIGHTNESS_MAX } else { 0 };
        actions.push(LampAction::Output(self.frame_for_level(level)));
    }

    fn frame_for_level(&self, level: u8) -> OutputFrame {
        if self.capabilities.supports_color {
            OutputFrame::colored(level, self.state.hue, self.state.saturation)
        } else {
            OutputFrame::monochrome(level)
        }
    }

    fn persist_action(&self) -> LampAction {
        LampAction::Persist(PersistedRecord::from_state(&self.state, &self.capabilities))
    }

    fn changed_characteristics(&self, before: &LampState) -> Vec<Characteristic> {
        let mut changed = Vec::new();
        if before.on != self.state.on {
            changed.push(Characteristic::On);
        }
        if before.brightness != self.state.brightness {
            changed.push(Characteristic::Brightness);
        }
        if self.capabilities.supports_color {
            if before.hue != self.state.hue {
                changed.push(Characteristic::Hue);
            }
            if before.saturation != self.state.saturation {
                changed.push(Characteristic::Saturation);
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn broker(capabilities: Capabilities, state: LampState) -> LampBroker {
        LampBroker::new(LampConfig::default(), capabilities, state)
    }

    fn run(broker: &mut LampBroker, from_ms: u64, until_ms: u64) -> Vec<LampAction> {
        let mut actions = Vec::new();
        let mut now = from_ms;
        while now <= until_ms {
            actions.extend(broker.tick(now));
            now += 10;
        }
        actions
    }

    fn outputs(actions: &[LampAction]) -> Vec<OutputFrame> {
        actions
            .iter()
            .filter_map(|action| match action {
                LampAction::Output(frame) => Some(*frame),
                _ => None,
            })
            .collect()
    }

    fn persist_count(actions: &[LampAction]) -> usize {
        actions
            .iter()
            .filter(|action| matches!(action, LampAction::Persist(_)))
            .count()
    }

    #[test]
    fn turning_on_reports_full_brightness_after_fade() {
        let mut broker = broker(Capabilities::monochrome(), LampState::default());
        broker.start(0);

        let actions = broker.set_on(true, 0);
        assert!(actions.contains(&LampAction::Notify(Characteristic::On)));

        run(&mut broker, 0, 2_000);

        assert_eq!(broker.output_level(), 100);
        let json = serde_json::to_string(&broker.status()).unwrap();
        assert_eq!(json, r#"{"on":true,"brightness":100,"scene":0}"#);
    }

    #[test]
    fn applying_scene_three_converges_to_forty() {
        let mut broker = broker(
            Capabilities::color(),
            LampState {
                on: true,
                effect: 0,
                ..LampState::default()
            },
        );
        broker.start(0);
        run(&mut broker, 0, 1_000);
        broker.set_effect(3, 1_000);

        broker.apply_scene(3, 1_010);
        assert_eq!(broker.state().scene, 3);
        assert_eq!(broker.state().effect, 0);
        assert_eq!(broker.active_effect(), None);

        let frames = outputs(&run(&mut broker, 1_020, 3_000));
        assert_eq!(frames.last().map(|frame| frame.level), Some(40));
        assert_eq!(broker.state().brightness, 40);
        assert_eq!(broker.output_level(), 40);
    }

    #[test]
    fn brightness_is_always_clamped() {
        let mut broker = broker(Capabilities::color(), LampState::default());
        for value in (-1_000..1_000).step_by(7) {
            broker.set_brightness(value, 0);
            assert!(broker.state().brightness <= 100);
        }
        broker.set_brightness(150, 0);
        assert_eq!(broker.state().brightness, 100);
        broker.set_brightness(i64::MIN, 0);
        assert_eq!(broker.state().brightness, 0);
    }

    #[test]
    fn direct_edits_clear_scene() {
        let mut broker = broker(Capabilities::color(), LampState::default());

        broker.apply_scene(2, 0);
        assert_eq!(broker.state().scene, 2);
        broker.set_brightness(55, 0);
        assert_eq!(broker.state().scene, 0);

        broker.apply_scene(2, 0);
        broker.set_color(120.0, 50.0, 0);
        assert_eq!(broker.state().scene, 0);
    }

    #[test]
    fn scene_application_clears_effect_and_turns_on() {
        let mut broker = broker(Capabilities::color(), LampState::default());
        broker.set_effect(1, 0);
        assert_eq!(broker.state().effect, 1);

        broker.set_on(false, 10);
        assert!(!broker.state().on);
        assert_eq!(broker.state().effect, 0);

        broker.apply_scene(4, 20);
        assert!(broker.state().on);
        assert_eq!(broker.state().effect, 0);
        assert_eq!(broker.state().brightness, 10);
        assert_eq!(broker.state().hue, 20.0);
    }

    #[test]
    fn out_of_range_scene_is_ignored() {
        let mut broker = broker(Capabilities::monochrome_with_scenes(), LampState::default());
        let before = *broker.state();

        assert!(broker.apply_scene(5, 0).is_empty());
        assert!(broker.apply_scene(-1, 0).is_empty());
        assert!(broker.apply_scene(1_000, 0).is_empty());
        assert_eq!(*broker.state(), before);
    }

    #[test]
    fn scene_zero_marks_custom_only() {
        let mut broker = broker(Capabilities::monochrome_with_scenes(), LampState::default());
        broker.apply_scene(3, 0);
        broker.apply_scene(0, 10);
        assert_eq!(broker.state().scene, 0);
        assert_eq!(broker.state().brightness, 40);
    }

    #[test]
    fn cycling_walks_the_table_skipping_custom() {
        let mut broker = broker(Capabilities::monochrome_with_scenes(), LampState::default());
        let mut scenes = Vec::new();
        for step in 0..5 {
            broker.cycle_scene(step * 100);
            scenes.push(broker.state().scene);
        }
        assert_eq!(scenes, vec![1, 2, 3, 4, 1]);
    }

    #[test]
    fn cycling_without_scenes_does_nothing() {
        let mut broker = broker(Capabilities::monochrome(), LampState::default());
        assert!(broker.cycle_scene(0).is_empty());
        assert_eq!(broker.state().scene, 0);
    }

    #[test]
    fn color_commands_are_ignored_on_monochrome() {
        let mut broker = broker(Capabilities::monochrome_with_scenes(), LampState::default());
        assert!(broker.set_color(10.0, 10.0, 0).is_empty());
        assert!(broker.set_effect(1, 0).is_empty());
        assert_eq!(broker.state().effect, 0);
    }

    #[test]
    fn effect_requires_on_and_unknown_effect_is_ignored() {
        let mut broker = broker(Capabilities::color(), LampState::default());
        assert!(broker.set_effect(42, 0).is_empty());

        broker.set_effect(2, 0);
        assert!(broker.state().on);
        assert_eq!(broker.active_effect(), Some(EffectKind::Flicker));
    }

    #[test]
    fn effect_writes_output_without_mutating_state() {
        let mut broker = broker(
            Capabilities::color(),
            LampState {
                on: true,
                brightness: 80,
                hue: 10.0,
                saturation: 20.0,
                ..LampState::default()
            },
        );
        broker.start(0);
        run(&mut broker, 0, 1_000);
        broker.set_effect(1, 1_000);
        let snapshot = *broker.state();

        let frames = outputs(&run(&mut broker, 1_010, 3_000));

        assert!(frames.len() >= 30);
        assert_eq!(*broker.state(), snapshot);
    }

    #[test]
    fn explicit_color_stops_effect_immediately() {
        let mut broker = broker(Capabilities::color(), LampState::default());
        broker.set_effect(1, 0);
        run(&mut broker, 0, 500);

        let actions = broker.set_color(240.0, 100.0, 510);
        assert_eq!(broker.state().effect, 0);
        assert_eq!(broker.active_effect(), None);

        let frames = outputs(&actions);
        assert_eq!(
            frames.last(),
            Some(&OutputFrame::colored(broker.output_level(), 240.0, 100.0))
        );

        // No effect frames after it was stopped: all further frames use the new color.
        let later = outputs(&run(&mut broker, 520, 2_000));
        assert!(later.iter().all(|frame| *frame
            == OutputFrame::colored(frame.level, 240.0, 100.0)));
    }

    #[test]
    fn rapid_edits_coalesce_into_one_write() {
        let mut broker = broker(Capabilities::color(), LampState::default());
        let mut actions = Vec::new();
        for step in 0..20_u64 {
            actions.extend(broker.set_brightness(step as i64 * 5, step * 50));
            actions.extend(broker.tick(step * 50));
        }
        assert_eq!(persist_count(&actions), 0);
        assert!(broker.has_pending_persist());

        let flushed = run(&mut broker, 1_000, 5_000);
        assert_eq!(persist_count(&flushed), 1);
        assert!(flushed.contains(&LampAction::Persist(PersistedRecord::from_state(
            broker.state(),
            broker.capabilities()
        ))));
    }

    #[test]
    fn unchanged_intent_produces_no_actions() {
        let mut broker = broker(Capabilities::color(), LampState::default());
        broker.set_on(true, 0);
        assert!(broker.set_on(true, 10).is_empty());
    }

    #[test]
    fn identify_blinks_then_restores_without_persisting() {
        let mut broker = broker(
            Capabilities::monochrome(),
            LampState {
                on: true,
                brightness: 60,
                ..LampState::default()
            },
        );
        broker.start(0);
        run(&mut broker, 0, 2_000);
        let before = *broker.state();

        let mut actions = broker.identify(2_010);
        actions.extend(run(&mut broker, 2_020, 5_000));

        let levels: Vec<u8> = outputs(&actions).iter().map(|frame| frame.level).collect();
        assert_eq!(levels, vec![100, 0, 100, 0, 100, 0, 60]);
        assert_eq!(*broker.state(), before);
        assert_eq!(persist_count(&actions), 0);
        assert!(!broker.is_identifying());
    }

    #[test]
    fn fade_redirects_when_target_changes_mid_flight() {
        let mut broker = broker(Capabilities::monochrome(), LampState::default());
        broker.start(0);
        broker.set_on(true, 0);
        run(&mut broker, 0, 60);
        let midway = broker.output_level();
        assert!(midway > 0 && midway < 100);

        broker.set_brightness(10, 70);
        let frames = outputs(&run(&mut broker, 70, 3_000));

        assert_eq!(broker.output_level(), 10);
        assert!(frames.iter().all(|frame| frame.level <= midway.max(10)));
        assert!(!broker.is_fading());
    }

    #[test]
    fn short_press_toggles_and_long_press_cycles() {
        let mut broker = broker(Capabilities::monochrome_with_scenes(), LampState::default());

        broker.handle_button(ButtonEvent::ShortPress, 0);
        assert!(broker.state().on);
        broker.handle_button(ButtonEvent::ShortPress, 10);
        assert!(!broker.state().on);

        broker.handle_button(ButtonEvent::LongPress, 20);
        assert_eq!(broker.state().scene, 1);
        assert!(broker.state().on);
    }

    #[test]
    fn very_long_press_factory_resets_once() {
        let mut broker = broker(
            Capabilities::color(),
            LampState {
                on: true,
                brightness: 30,
                scene: 2,
                ..LampState::default()
            },
        );

        let actions = broker.handle_button(ButtonEvent::VeryLongPress, 0);

        assert_eq!(
            actions,
            vec![
                LampAction::Output(OutputFrame::colored(0, 0.0, 0.0)),
                LampAction::EraseStore,
                LampAction::ClearProvisioning,
                LampAction::Restart,
            ]
        );
        assert_eq!(*broker.state(), LampState::default());
        assert!(run(&mut broker, 0, 5_000).is_empty());
    }

    #[test]
    fn boot_state_is_sanitized() {
        let broker = broker(
            Capabilities::monochrome_with_scenes(),
            LampState {
                on: true,
                brightness: 200,
                scene: 9,
                effect: 3,
                ..LampState::default()
            },
        );
        assert_eq!(broker.state().brightness, 100);
        assert_eq!(broker.state().scene, 0);
        assert_eq!(broker.state().effect, 0);
    }

    #[test]
    fn start_fades_in_a_lamp_restored_as_on() {
        let mut broker = broker(
            Capabilities::monochrome(),
            LampState {
                on: true,
                brightness: 70,
                ..LampState::default()
            },
        );
        let actions = broker.start(0);
        assert_eq!(outputs(&actions), vec![OutputFrame::monochrome(0)]);
        assert!(broker.is_fading());

        run(&mut broker, 0, 2_000);
        assert_eq!(broker.output_level(), 70);
    }

    #[test]
    fn flush_persist_emits_pending_record() {
        let mut broker = broker(Capabilities::color(), LampState::default());
        assert_eq!(broker.flush_persist(), None);

        broker.set_on(true, 0);
        assert!(matches!(broker.flush_persist(), Some(LampAction::Persist(_))));
        assert!(!broker.has_pending_persist());
    }

    #[test]
    fn actions_executed_in_issue_order_end_at_the_stored_level() {
        let mut broker = broker(
            Capabilities::color(),
            LampState {
                on: true,
                brightness: 100,
                ..LampState::default()
            },
        );
        broker.start(0);
        run(&mut broker, 10, 100);
        assert!(broker.is_fading());

        let color = broker.set_color(120.0, 50.0, 110);
        let stale = outputs(&color).last().copied();
        assert!(stale.is_some_and(|frame| frame.level < 100));

        let mut issued = color;
        issued.extend(run(&mut broker, 120, 3_000));
        assert!(!broker.is_fading());

        let last = outputs(&issued).last().copied();
        assert_eq!(last.map(|frame| frame.level), Some(broker.state().brightness));
        assert_eq!(last, Some(OutputFrame::colored(100, 120.0, 50.0)));
    }

    #[test]
    fn intents_after_factory_reset_change_nothing() {
        let mut broker = broker(Capabilities::color(), LampState::default());
        broker.start(0);
        broker.factory_reset();
        assert!(broker.is_resetting());

        assert!(broker.set_brightness(70, 10).is_empty());
        assert!(broker.apply(Intent::SetOn(true), 20).is_empty());
        assert!(broker.apply(Intent::SetEffect(1), 30).is_empty());
        assert!(broker.apply(Intent::ApplyScene(2), 40).is_empty());
        assert!(broker.identify(50).is_empty());
        assert!(broker.factory_reset().is_empty());

        assert_eq!(*broker.state(), LampState::default());
        assert!(!broker.has_pending_persist());
        assert_eq!(broker.flush_persist(), None);
        assert!(run(&mut broker, 60, 5_000).is_empty());
    }
}
