//! switchboard-gateway - HTTP and WebSocket front door for switchboard
//!
//! Clients connect over WebSocket (or POST to the REST API) to chat. Each
//! message is appended to its session transcript and published on the human
//! channel as a `user_message`; the relay agent sends the agents' replies back
//! to connected clients.

pub mod auth;
pub mod events;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;

pub use relay::{RELAY_AGENT, relay_agent};
pub use server::{GatewayServer, GatewayState};
pub use session::{Session, SessionManager};
