//! # devsync Agent
//!
//! Standalone device management agent runtime: environment-driven
//! configuration, a rumqttc-backed [`Transport`](devsync_client::Transport)
//! and built-in action handlers for running without a real device behind the
//! session.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod actions;
pub mod config;
pub mod mqtt;

pub use config::AgentConfig;
pub use mqtt::{MqttError, MqttTransport};
