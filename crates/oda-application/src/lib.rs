//! Application layer for ODA.
//!
//! This crate coordinates the domain contracts from `oda-core` into the
//! session lifecycle: single-flight resource construction, generation with
//! rollback and cancellation, translation and language detection services.

pub mod cache;
pub mod language_detection_service;
pub mod session;
pub mod translation_service;

pub use cache::SingleFlightCache;
pub use language_detection_service::LanguageDetectionService;
pub use session::{SendOutcome, SessionController};
pub use translation_service::TranslatorService;
