//! Session application services.
//!
//! This module contains the controller that owns one capability session's
//! lifecycle and the accumulator it uses to fold streamed replies.

mod accumulator;
mod controller;

pub use accumulator::{AccumulatedReply, StreamOutcome, StreamingAccumulator};
pub use controller::{ResourceCache, SendOutcome, SessionController};
