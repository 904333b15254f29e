//! Domain layer for ODA.
//!
//! Types and contracts shared by every crate in the workspace: the error
//! type, capability support, conversation history, session state, progress
//! reporting and configuration. This crate performs no I/O.

pub mod capability;
pub mod config;
pub mod error;
pub mod language;
pub mod progress;
pub mod session;
pub mod support;

// Re-export common error type
pub use error::{OdaError, Result};

pub use capability::{Capability, CapabilityProvider, Resource, ResourceKey, TextStream};
pub use support::{Availability, SupportProbe, SupportState};
