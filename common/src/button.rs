use log::debug;

use crate::{config::LampConfig, types::ButtonEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub pressed: bool,
    pub at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    window_ms: u64,
    stable: bool,
    candidate: bool,
    changed_at_ms: u64,
}

impl Debouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            stable: false,
            candidate: false,
            changed_at_ms: 0,
        }
    }

    pub fn level(&self) -> bool {
        self.stable
    }

    pub fn is_settled(&self) -> bool {
        self.candidate == self.stable
    }

    pub fn update(&mut self, raw: bool, now_ms: u64) -> Option<Edge> {
        if raw != self.candidate {
            self.candidate = raw;
            self.changed_at_ms = now_ms;
        }

        if self.candidate != self.stable
            && now_ms.saturating_sub(self.changed_at_ms) >= self.window_ms
        {
            self.stable = self.candidate;
            return Some(Edge {
                pressed: self.stable,
                at_ms: self.changed_at_ms,
            });
        }

        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonPhase {
    Idle,
    Pressed { since_ms: u64 },
}

// Short and long presses resolve on release; very-long fires while held.
#[derive(Debug, Clone)]
pub struct ButtonMachine {
    debouncer: Debouncer,
    long_press_ms: u64,
    very_long_press_ms: u64,
    phase: ButtonPhase,
    long_handled: bool,
    very_long_handled: bool,
}

impl ButtonMachine {
    pub fn new(config: &LampConfig) -> Self {
        Self {
            debouncer: Debouncer::new(config.debounce_ms),
            long_press_ms: config.long_press_ms,
            very_long_press_ms: config.very_long_press_ms,
            phase: ButtonPhase::Idle,
            long_handled: false,
            very_long_handled: false,
        }
    }

    pub fn phase(&self) -> ButtonPhase {
        self.phase
    }

    pub fn is_long_armed(&self) -> bool {
        self.long_handled
    }

    pub fn update(&mut self, raw_pressed: bool, now_ms: u64) -> Option<ButtonEvent> {
        if let Some(edge) = self.debouncer.update(raw_pressed, now_ms) {
            if edge.pressed {
                self.phase = ButtonPhase::Pressed {
                    since_ms: edge.at_ms,
                };
                self.long_handled = false;
                self.very_long_handled = false;
            } else if let ButtonPhase::Pressed { since_ms } = self.phase {
                self.phase = ButtonPhase::Idle;
                return self.classify_release(edge.at_ms.saturating_sub(since_ms));
            }
        }

        let ButtonPhase::Pressed { since_ms } = self.phase else {
            return None;
        };

        // A pending release resolves on its edge with the exact hold time.
        if !self.debouncer.is_settled() {
            return None;
        }

        let held_ms = now_ms.saturating_sub(since_ms);
        if held_ms >= self.very_long_press_ms && !self.very_long_handled {
            self.very_long_handled = true;
            return Some(ButtonEvent::VeryLongPress);
        }
        if held_ms >= self.long_press_ms && !self.long_handled && !self.very_long_handled {
            self.long_handled = true;
            debug!("button held past long threshold ({held_ms} ms)");
        }

        None
    }

    fn classify_release(&mut self, held_ms: u64) -> Option<ButtonEvent> {
        if self.very_long_handled {
            return None;
        }
        if held_ms >= self.very_long_press_ms {
            self.very_long_handled = true;
            return Some(ButtonEvent::VeryLongPress);
        }
        if held_ms >= self.long_press_ms {
            self.long_handled = true;
            return Some(ButtonEvent::LongPress);
        }
        Some(ButtonEvent::ShortPress)
    }
}
