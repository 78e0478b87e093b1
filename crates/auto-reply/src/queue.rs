//! Queue policy decisions. Pure functions over run state and mode; the
//! coordinator applies the result under its lock.

use {parley_config::MessageQueueMode, serde::Serialize};

use crate::runs::RunState;

/// What to do with a newly arrived input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Start a run now with this input.
    StartNow,
    /// Hand the input to the running turn.
    InjectLive,
    /// Park the input until the active run settles.
    Backlog,
    /// Join or refresh the debounce window.
    ArmTimer,
    /// Cancel the active run; the input starts the next one.
    Interrupt,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartNow => "start_now",
            Self::InjectLive => "inject_live",
            Self::Backlog => "backlog",
            Self::ArmTimer => "arm_timer",
            Self::Interrupt => "interrupt",
        }
    }
}

/// How many backlog entries the next run consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPlan {
    /// The oldest entry only.
    One,
    /// The whole backlog, merged into one run.
    All,
}

/// Decide the action for one arrival.
///
/// `injectable` is true when the active run is streaming and the executor
/// reports it accepts live input.
#[must_use]
pub fn decide(
    state: RunState,
    mode: MessageQueueMode,
    debounce_ms: u64,
    injectable: bool,
) -> Action {
    use MessageQueueMode::*;

    match (state, mode) {
        (RunState::Idle, Collect) if debounce_ms > 0 => Action::ArmTimer,
        (RunState::Idle, _) => Action::StartNow,
        (_, Collect) => Action::ArmTimer,
        (RunState::Cancelling, _) => Action::Backlog,
        (_, Interrupt) => Action::Interrupt,
        (_, Steer | SteerBacklog) if injectable => Action::InjectLive,
        (_, Steer | SteerBacklog | Followup) => Action::Backlog,
    }
}

/// Drain shape after a run settles or a window flushes.
#[must_use]
pub fn drain_plan(mode: MessageQueueMode, pending_interrupt: bool) -> DrainPlan {
    if pending_interrupt {
        return DrainPlan::All;
    }
    match mode {
        MessageQueueMode::Followup | MessageQueueMode::Steer => DrainPlan::One,
        MessageQueueMode::Collect | MessageQueueMode::SteerBacklog | MessageQueueMode::Interrupt => {
            DrainPlan::All
        },
    }
}

#[cfg(test)]
mod tests {
    use {super::*, parley_config::MessageQueueMode::*, rstest::rstest};

    #[rstest]
    #[case(RunState::Idle, Interrupt, false, Action::StartNow)]
    #[case(RunState::Idle, Followup, false, Action::StartNow)]
    #[case(RunState::Idle, Collect, false, Action::ArmTimer)]
    #[case(RunState::Running, Interrupt, false, Action::Interrupt)]
    #[case(RunState::Streaming, Steer, true, Action::InjectLive)]
    #[case(RunState::Running, Steer, false, Action::Backlog)]
    #[case(RunState::Streaming, SteerBacklog, false, Action::Backlog)]
    #[case(RunState::Streaming, Followup, true, Action::Backlog)]
    #[case(RunState::Running, Collect, false, Action::ArmTimer)]
    #[case(RunState::Cancelling, Interrupt, false, Action::Backlog)]
    #[case(RunState::Cancelling, Steer, true, Action::Backlog)]
    #[case(RunState::Cancelling, Collect, false, Action::ArmTimer)]
    fn decision_table(
        #[case] state: RunState,
        #[case] mode: MessageQueueMode,
        #[case] injectable: bool,
        #[case] expected: Action,
    ) {
        assert_eq!(decide(state, mode, 200, injectable), expected);
    }

    #[test]
    fn collect_without_debounce_starts_immediately() {
        assert_eq!(decide(RunState::Idle, Collect, 0, false), Action::StartNow);
    }

    #[rstest]
    #[case(Followup, false, DrainPlan::One)]
    #[case(Steer, false, DrainPlan::One)]
    #[case(SteerBacklog, false, DrainPlan::All)]
    #[case(Collect, false, DrainPlan::All)]
    #[case(Followup, true, DrainPlan::All)]
    fn drain_shapes(
        #[case] mode: MessageQueueMode,
        #[case] pending_interrupt: bool,
        #[case] expected: DrainPlan,
    ) {
        assert_eq!(drain_plan(mode, pending_interrupt), expected);
    }
}
