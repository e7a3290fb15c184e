//! Delivery-agent client core for a gas delivery service: order lifecycle,
//! OTP-gated delivery completion, and agent availability.

pub mod auth;
pub mod availability;
pub mod completion;
pub mod config;
pub mod console;
pub mod cooldown;
pub mod error;
pub mod lifecycle;
pub mod location;
pub mod models;
pub mod proof;
pub mod realtime;
pub mod remote;
pub mod store;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{AgentError, Result};
