//! Transcript reconstruction from raw context-snapshot log lines.
//!
//! A snapshot line flows through:
//! 1. `parser::parse_messages()`: quasi-literal array → ordered `Message`s
//! 2. `sanitizer::sanitize_user_message()`: strip injected knowledge-base blocks
//! 3. `turns::assemble_turns()`: pair user/assistant messages into numbered turns

pub mod parser;
pub mod sanitizer;
pub mod turns;

pub use parser::parse_messages;
pub use sanitizer::sanitize_user_message;
pub use turns::assemble_turns;

/// Who produced a message inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
    /// Recognised so it can be skipped; never emitted by the parser.
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single role/content message recovered from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
