//! Concrete on-device capability providers for ODA.
//!
//! The local runner drives a model-runner CLI (llama.cpp style) as a child
//! process and exposes it as a chat [`Resource`](oda_core::Resource).

pub mod local_agents;
pub mod supported_models;

pub use local_agents::{LocalRunnerProvider, LocalRunnerResource};
pub use supported_models::{DEFAULT_MODEL, available_models};
