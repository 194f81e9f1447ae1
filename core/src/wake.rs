//! Wake decision engine
//!
//! Classifies why the device powered on and picks the one action this boot
//! will take. The rules live in [`RULES`] and are evaluated top to bottom;
//! the first rule that applies decides.

/// What powered the device on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeTrigger {
    /// Sleep timer expired
    Timer,
    /// User button
    Button,
    /// External power attached while asleep
    PowerConnect,
    /// Cold start, reset, brown-out, panic: anything the platform cannot attribute
    Unrecognized,
}

impl WakeTrigger {
    pub fn is_recognized(&self) -> bool {
        !matches!(self, WakeTrigger::Unrecognized)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WakeTrigger::Timer => "timer",
            WakeTrigger::Button => "button",
            WakeTrigger::PowerConnect => "power",
            WakeTrigger::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeAction {
    ShowFirstRunScreen,
    Idle,
    RefreshAndRender,
    /// Redraw the cached result without touching the network. No rule in
    /// [`RULES`] picks it today; the controller still honours it.
    RenderFromCache,
}

/// Everything the decision depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeInputs {
    pub configured: bool,
    pub trigger: WakeTrigger,
    pub setup_screen_shown: bool,
    pub present: bool,
    /// Configuration exists but no sync has succeeded yet
    pub first_boot_after_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeDecision {
    pub action: WakeAction,
    /// Draw the first-run screen before acting
    pub draw_first_run: bool,
    /// Name of the rule that fired, for logs
    pub rule: &'static str,
}

struct Rule {
    name: &'static str,
    applies: fn(&WakeInputs) -> bool,
    decide: fn(&WakeInputs) -> WakeDecision,
}

fn decision(rule: &'static str, action: WakeAction) -> WakeDecision {
    WakeDecision {
        action,
        draw_first_run: false,
        rule,
    }
}

const RULES: [Rule; 4] = [
    Rule {
        name: "unconfigured",
        applies: |i| !i.configured,
        decide: |i| {
            let action = if i.present {
                WakeAction::Idle
            } else {
                WakeAction::ShowFirstRunScreen
            };
            WakeDecision {
                draw_first_run: i.trigger != WakeTrigger::PowerConnect
                    && (!i.setup_screen_shown || i.trigger == WakeTrigger::Unrecognized),
                ..decision("unconfigured", action)
            }
        },
    },
    Rule {
        name: "power-connect",
        applies: |i| i.trigger == WakeTrigger::PowerConnect,
        decide: |_| decision("power-connect", WakeAction::Idle),
    },
    Rule {
        name: "requested",
        applies: |i| match i.trigger {
            WakeTrigger::Button | WakeTrigger::Timer => true,
            WakeTrigger::Unrecognized => i.first_boot_after_config,
            WakeTrigger::PowerConnect => false,
        },
        decide: |_| decision("requested", WakeAction::RefreshAndRender),
    },
    Rule {
        name: "default",
        applies: |_| true,
        decide: |_| decision("default", WakeAction::RefreshAndRender),
    },
];

/// Pick the action for this boot
pub fn decide(inputs: &WakeInputs) -> WakeDecision {
    for rule in &RULES {
        if (rule.applies)(inputs) {
            let d = (rule.decide)(inputs);
            log::info!(
                "wake {} -> {:?} (rule {}, first-run {})",
                inputs.trigger.as_str(),
                d.action,
                rule.name,
                d.draw_first_run
            );
            return d;
        }
    }
    // the last rule always applies
    decision("default", WakeAction::RefreshAndRender)
}
