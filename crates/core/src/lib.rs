pub mod chat {
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    #[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum Role {
        System,
        User,
        Assistant,
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: Role,
        pub content: String,
    }

    impl ChatMessage {
        pub fn new(role: Role, content: impl Into<String>) -> Self {
            Self {
                role,
                content: content.into(),
            }
        }
    }

    /// One chat turn as supplied by the caller. `stream` selects between the
    /// event-stream and single request/response paths.
    #[derive(Clone, Debug, Default)]
    pub struct ChatOptions {
        pub messages: Vec<ChatMessage>,
        pub stream: bool,
    }

    /// Display names used both when formatting the conversation and when
    /// building stop sequences.
    #[derive(Clone, Debug)]
    pub struct Persona {
        pub charname: String,
        pub username: String,
    }

    #[derive(Error, Debug)]
    pub enum ChatError {
        #[error("template: {0}")]
        Template(String),
        #[error("timeout: {0}")]
        Timeout(String),
        #[error("network: {0}")]
        Network(String),
        #[error("decode: {0}")]
        Decode(String),
        #[error("canceled")]
        Canceled,
        #[error("other: {0}")]
        Other(String),
    }

    /// Callbacks for one chat invocation. `on_update` fires zero or more
    /// times, in event order; exactly one of `on_finish`/`on_error` fires
    /// afterwards, exactly once.
    pub trait ChatHandler {
        fn on_update(&mut self, _message: &str, _delta: &str) {}
        fn on_finish(&mut self, message: &str);
        fn on_error(&mut self, error: ChatError);
    }
}

#[cfg(test)]
mod tests {
    use super::chat::{ChatMessage, Role};

    #[test]
    fn roles_serialize_as_lowercase_strings() {
        let m = ChatMessage::new(Role::Assistant, "hi");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], "assistant");
        assert_eq!(v["content"], "hi");
    }

    #[test]
    fn role_equality_is_exact() {
        let v: Result<Role, _> = serde_json::from_str("\"System\"");
        assert!(v.is_err());
        let v: Role = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(v, Role::System);
    }
}
