//! Runtime plumbing for ODA: tracing setup and channel-backed observers.

pub mod logging;
pub mod progress;
pub mod tracing_layer;

pub use logging::init_tracing;
pub use progress::ChannelProgressSink;
pub use tracing_layer::{LogEvent, SessionEventLayer};
