use super::types::State;

/// States reachable from `src` in a single step.
pub fn allowed_transitions(src: &State) -> &'static [State] {
    match src {
        State::Pending => &[State::Scheduled],
        State::Scheduled => &[State::Scheduled, State::Running, State::Failed],
        State::Running => &[State::Running, State::Completed, State::Failed],
        State::Completed => &[],
        State::Failed => &[],
    }
}

pub fn valid_state_transition(src: &State, dst: &State) -> bool {
    allowed_transitions(src).contains(dst)
}
