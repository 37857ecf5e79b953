//! Channels and agent runtime for switchboard
//!
//! This crate provides the in-process publish/subscribe layer that every
//! switchboard agent talks over:
//! - Named channels with filtered, non-persistent fan-out
//! - A process-wide channel hub that can be stopped in one call
//! - Agents with an explicit created → running → stopped lifecycle
//! - A supervisor that starts agents, runs a companion server, and shuts
//!   everything down in order

pub mod agent;
pub mod bus;
pub mod error;
pub mod message;
pub mod supervisor;

// Re-export main types
pub use agent::{Agent, AgentState, HandlerContext, MessageHandler, handler_fn};
pub use bus::{Channel, ChannelHub, Filter, Subscription};
pub use error::BusError;
pub use message::{Message, kinds};
pub use supervisor::{ShutdownReport, Supervisor};
