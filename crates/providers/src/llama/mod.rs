//! Adapter for a llama.cpp completion server: renders a chat history into
//! the server's single-prompt wire format and drives its streamed reply.

pub mod client;
pub mod config;
pub mod geninfo;
pub mod payload;
pub mod template;

pub use client::{ChatController, LlamaClient};
pub use config::LlamaConfig;
pub use payload::RequestPayload;

/// Sub-path for `POST` completion requests.
pub const CHAT_PATH: &str = "completion";
/// Sub-path for `GET` model metadata.
pub const MODEL_INFO_PATH: &str = "model.json";

/// Only the two literal backend sub-paths may be requested; anything else is
/// rejected before it reaches the server.
pub fn is_allowed_path(path: &str) -> bool {
    path == CHAT_PATH || path == MODEL_INFO_PATH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_is_exact() {
        assert!(is_allowed_path("completion"));
        assert!(is_allowed_path("model.json"));
        assert!(!is_allowed_path("completion/extra"));
        assert!(!is_allowed_path("/completion"));
        assert!(!is_allowed_path("models"));
        assert!(!is_allowed_path(""));
    }
}
