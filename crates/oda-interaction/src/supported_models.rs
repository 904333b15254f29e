//! Supported on-device model catalogue.
//!
//! # Supported Models
//!
//! | Model ID | File | Notes |
//! |----------|------|-------|
//! | `Llama-3.2-1B-Instruct-q4f16_1` | `Llama-3.2-1B-Instruct-Q4_K_M.gguf` | Small general chat model (default) |
//! | `Llama-3.2-3B-Instruct-q4f16_1` | `Llama-3.2-3B-Instruct-Q4_K_M.gguf` | Better quality, more memory |
//! | `Qwen2.5-0.5B-Instruct-q4f16_1` | `Qwen2.5-0.5B-Instruct-Q4_K_M.gguf` | Fastest, lowest quality |
//! | `Phi-3.5-mini-instruct-q4f16_1` | `Phi-3.5-mini-instruct-Q4_K_M.gguf` | Reasoning-oriented |
//! | `gemma-2-2b-it-q4f16_1` | `gemma-2-2b-it-Q4_K_M.gguf` | Multilingual |
//! | `TinyLlama-1.1B-Chat-v1.0-q4f16_1` | `tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf` | Smallest footprint |
//!
//! Smaller models load faster but are less capable; larger ones give better
//! replies at the cost of memory.
//!
//! ## Notes
//!
//! - `DEFAULT_MODEL` is used when `[chat] model` is not set in `config.toml`.
//! - Model ids outside this table are passed through unchanged and used as
//!   the file name inside `[local_runner] model_dir`.

/// One entry of the model catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: &'static str,
    /// File name inside the configured model directory
    pub file_name: &'static str,
}

pub const SUPPORTED_MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "Llama-3.2-1B-Instruct-q4f16_1",
        file_name: "Llama-3.2-1B-Instruct-Q4_K_M.gguf",
    },
    ModelInfo {
        id: "Llama-3.2-3B-Instruct-q4f16_1",
        file_name: "Llama-3.2-3B-Instruct-Q4_K_M.gguf",
    },
    ModelInfo {
        id: "Qwen2.5-0.5B-Instruct-q4f16_1",
        file_name: "Qwen2.5-0.5B-Instruct-Q4_K_M.gguf",
    },
    ModelInfo {
        id: "Phi-3.5-mini-instruct-q4f16_1",
        file_name: "Phi-3.5-mini-instruct-Q4_K_M.gguf",
    },
    ModelInfo {
        id: "gemma-2-2b-it-q4f16_1",
        file_name: "gemma-2-2b-it-Q4_K_M.gguf",
    },
    ModelInfo {
        id: "TinyLlama-1.1B-Chat-v1.0-q4f16_1",
        file_name: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
    },
];

/// First catalogue entry.
pub const DEFAULT_MODEL: &str = "Llama-3.2-1B-Instruct-q4f16_1";

/// Ids of every catalogued model, default first.
pub fn available_models() -> Vec<&'static str> {
    SUPPORTED_MODELS.iter().map(|m| m.id).collect()
}

pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    SUPPORTED_MODELS.iter().find(|m| m.id == id)
}

/// File name for `id`: the catalogued file, or `id` itself.
pub fn model_file_name(id: &str) -> &str {
    find_model(id).map_or(id, |m| m.file_name)
}
