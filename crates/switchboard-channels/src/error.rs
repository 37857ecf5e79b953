//! Errors raised by channels and agents

use thiserror::Error;

use crate::agent::AgentState;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("channel '{0}' is closed")]
    ChannelClosed(String),

    #[error("channel hub has been stopped")]
    HubStopped,

    #[error("agent '{agent}' cannot {action} while {state}")]
    InvalidTransition {
        agent: String,
        action: &'static str,
        state: AgentState,
    },
}

pub type Result<T> = std::result::Result<T, BusError>;
