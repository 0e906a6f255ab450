//! Stream lifecycle state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle of a stream.
///
/// `Resolving` covers source discovery and never appears in the registry.
/// Entries are inserted as `Starting` and only become visible once `Live`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    Resolving,
    Starting,
    Live,
    Stopping,
    Stopped,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolving => "RESOLVING",
            Self::Starting => "STARTING",
            Self::Live => "LIVE",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RESOLVING" => Some(Self::Resolving),
            "STARTING" => Some(Self::Starting),
            "LIVE" => Some(Self::Live),
            "STOPPING" => Some(Self::Stopping),
            "STOPPED" => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Terminal: the entry is about to leave the registry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn can_transition_to(&self, target: StreamState) -> bool {
        use StreamState::*;

        match (self, target) {
            (from, to) if *from == to => !from.is_terminal(),
            (Resolving, Starting | Stopped) => true,
            // A failed start tears down through Stopping.
            (Starting, Live | Stopping) => true,
            (Live, Stopping) => true,
            (Stopping, Stopped) => true,
            _ => false,
        }
    }

    pub fn transition_to(&self, target: StreamState) -> Result<StreamState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_state_round_trip_names() {
        assert_eq!(StreamState::parse("LIVE"), Some(StreamState::Live));
        assert_eq!(StreamState::parse("live"), None);
        assert_eq!(StreamState::Stopping.to_string(), "STOPPING");
    }

    #[rstest]
    #[case(StreamState::Resolving, StreamState::Starting)]
    #[case(StreamState::Starting, StreamState::Live)]
    #[case(StreamState::Starting, StreamState::Stopping)]
    #[case(StreamState::Live, StreamState::Stopping)]
    #[case(StreamState::Stopping, StreamState::Stopped)]
    fn test_valid_transitions(#[case] from: StreamState, #[case] to: StreamState) {
        assert_eq!(from.transition_to(to).unwrap(), to);
    }

    #[rstest]
    #[case(StreamState::Live, StreamState::Starting)]
    #[case(StreamState::Live, StreamState::Stopped)]
    #[case(StreamState::Stopped, StreamState::Live)]
    #[case(StreamState::Stopped, StreamState::Stopped)]
    #[case(StreamState::Stopping, StreamState::Live)]
    fn test_invalid_transitions(#[case] from: StreamState, #[case] to: StreamState) {
        assert!(matches!(
            from.transition_to(to),
            Err(Error::InvalidStateTransition { .. })
        ));
    }
}
