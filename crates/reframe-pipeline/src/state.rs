//! Pipeline lifecycle states.

use std::fmt;

use serde::Serialize;

/// Where a [`Transcoder`](crate::Transcoder) is in its run.
///
/// Runs move forward through `Idle` → `CheckingSupport` → `Demuxing` →
/// `Transcoding` → `Finalizing` → `Complete`. `Error` and `Destroyed` are
/// reachable from every state and are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    CheckingSupport,
    Demuxing,
    /// Decode and encode run overlapped.
    Transcoding,
    Finalizing,
    Complete,
    Error,
    Destroyed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Destroyed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CheckingSupport => "checking_support",
            Self::Demuxing => "demuxing",
            Self::Transcoding => "transcoding",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_serialized_name() {
        for state in [
            PipelineState::Idle,
            PipelineState::CheckingSupport,
            PipelineState::Finalizing,
            PipelineState::Destroyed,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }

    #[test]
    fn terminal_states() {
        assert!(PipelineState::Complete.is_terminal());
        assert!(PipelineState::Error.is_terminal());
        assert!(PipelineState::Destroyed.is_terminal());
        assert!(!PipelineState::Transcoding.is_terminal());
    }
}
