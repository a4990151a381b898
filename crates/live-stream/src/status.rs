use market_core::ConnectionState;
use serde::{Deserialize, Serialize};

/// What the status badge shows for the live view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub state: ConnectionState,
    /// Last connection or load failure; cleared once the feed is open again
    pub error: Option<String>,
}

impl StreamStatus {
    pub fn new(state: ConnectionState, error: Option<String>) -> Self {
        Self { state, error }
    }

    pub fn label(&self) -> String {
        match &self.error {
            Some(error) if !self.state.is_live() => format!("{} ({})", self.state.label(), error),
            _ => self.state.label().to_string(),
        }
    }

    /// Next status after the feed reports `state`.
    ///
    /// Opening clears the error; a retry keeps the previous one visible until
    /// it either succeeds or fails with something new.
    pub(crate) fn advance(&self, state: ConnectionState, error: Option<String>) -> Self {
        let error = match state {
            ConnectionState::Open | ConnectionState::Idle => None,
            _ => error.or_else(|| self.error.clone()),
        };
        Self { state, error }
    }
}
