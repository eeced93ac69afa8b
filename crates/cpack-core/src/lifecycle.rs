use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of one unpack. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnpackState {
    Init,
    EnvironmentReady,
    ExtensionsReady,
    ModelsReady,
    Done,
    Failed,
}

impl UnpackState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UnpackState::Done | UnpackState::Failed)
    }
}

impl fmt::Display for UnpackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnpackState::Init => "init",
            UnpackState::EnvironmentReady => "environment_ready",
            UnpackState::ExtensionsReady => "extensions_ready",
            UnpackState::ModelsReady => "models_ready",
            UnpackState::Done => "done",
            UnpackState::Failed => "failed",
        })
    }
}

pub fn validate_transition(from: UnpackState, to: UnpackState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (UnpackState::Init, UnpackState::EnvironmentReady)
            | (UnpackState::EnvironmentReady, UnpackState::ExtensionsReady)
            | (UnpackState::ExtensionsReady, UnpackState::ModelsReady)
            | (UnpackState::ModelsReady, UnpackState::Done)
            | (
                UnpackState::Init
                    | UnpackState::EnvironmentReady
                    | UnpackState::ExtensionsReady
                    | UnpackState::ModelsReady,
                UnpackState::Failed
            )
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_path_is_valid() {
        let path = [
            UnpackState::Init,
            UnpackState::EnvironmentReady,
            UnpackState::ExtensionsReady,
            UnpackState::ModelsReady,
            UnpackState::Done,
        ];
        for pair in path.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok());
        }
    }

    #[test]
    fn any_live_state_can_fail() {
        for s in [
            UnpackState::Init,
            UnpackState::EnvironmentReady,
            UnpackState::ExtensionsReady,
            UnpackState::ModelsReady,
        ] {
            assert!(validate_transition(s, UnpackState::Failed).is_ok());
        }
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(UnpackState::Init, UnpackState::ExtensionsReady).is_err());
        assert!(validate_transition(UnpackState::Init, UnpackState::Done).is_err());
        assert!(validate_transition(UnpackState::Done, UnpackState::Failed).is_err());
        assert!(validate_transition(UnpackState::Failed, UnpackState::Init).is_err());
        assert!(
            validate_transition(UnpackState::ModelsReady, UnpackState::EnvironmentReady).is_err()
        );
    }

    #[test]
    fn terminal_states() {
        assert!(UnpackState::Done.is_terminal());
        assert!(UnpackState::Failed.is_terminal());
        assert!(!UnpackState::ModelsReady.is_terminal());
    }
}
