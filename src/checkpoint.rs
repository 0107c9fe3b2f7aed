//! Where the persisted step index points at each moment of a step.
//!
//! The stored index always names the next step to run on resume. A step that
//! was interrupted mid-flight is retried, except `navigate`, which is marked
//! done before it runs because it takes the execution context down with it.

use crate::types::{RunState, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// About to start step `i`.
    Enter,
    /// About to perform step `i`, after any placeholder expansion.
    Perform,
    Succeeded,
    Failed { fail_fast: bool },
}

pub fn next_index(index: usize, step: &Step, phase: Phase) -> usize {
    match phase {
        Phase::Enter => index,
        Phase::Perform if step.is_navigation() => index + 1,
        Phase::Perform => index,
        Phase::Succeeded => index + 1,
        Phase::Failed { fail_fast: true } => index,
        Phase::Failed { fail_fast: false } => index + 1,
    }
}

impl RunState {
    /// The checkpoint to hold once `step` (at `index`) reaches `phase`.
    pub fn checkpointed(mut self, index: usize, step: &Step, phase: Phase) -> RunState {
        self.step_index = next_index(index, step, phase).min(self.total());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Macro;

    fn click() -> Step {
        Step::Click {
            selector: "#go".into(),
            timeout: None,
        }
    }

    fn navigate() -> Step {
        Step::Navigate {
            url: "https://example.com".into(),
        }
    }

    #[test]
    fn ordinary_steps_commit_only_after_success() {
        assert_eq!(next_index(3, &click(), Phase::Enter), 3);
        assert_eq!(next_index(3, &click(), Phase::Perform), 3);
        assert_eq!(next_index(3, &click(), Phase::Succeeded), 4);
    }

    #[test]
    fn navigation_commits_before_it_runs() {
        assert_eq!(next_index(1, &navigate(), Phase::Enter), 1);
        assert_eq!(next_index(1, &navigate(), Phase::Perform), 2);
        assert_eq!(next_index(1, &navigate(), Phase::Succeeded), 2);
    }

    #[test]
    fn failure_policy_decides_retry_or_skip() {
        assert_eq!(next_index(2, &click(), Phase::Failed { fail_fast: true }), 2);
        assert_eq!(next_index(2, &click(), Phase::Failed { fail_fast: false }), 3);
    }

    #[test]
    fn checkpoint_never_passes_the_end() {
        let m = Macro {
            steps: vec![navigate()],
            ..Default::default()
        };
        let state = RunState::new(m, 0).checkpointed(0, &navigate(), Phase::Perform);
        assert_eq!(state.step_index, 1);
        let again = state.checkpointed(1, &navigate(), Phase::Succeeded);
        assert_eq!(again.step_index, 1);
    }
}
