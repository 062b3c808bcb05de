//! Conversation history and prompt assembly.
//!
//! History belongs to the caller. The core receives a copy per call, never
//! stores the system prompt in it, and hands back an extended copy only when
//! a turn succeeds.

use serde::{Deserialize, Serialize};

/// Fixed system instruction prepended to every text generation.
pub const SYSTEM_PROMPT: &str = "You are OmniLocal, a highly intelligent and concise conversational AI. Keep your answers brief, natural, and easy to read aloud. Do not use asterisks or markdown formatting.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

pub type History = Vec<Message>;

/// `[system] + history + [user_turn]`.
///
/// System entries in `history` are dropped: the system prompt is always the
/// constant, rebuilt for this call.
pub fn build_messages(history: &[Message], user_turn: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(SYSTEM_PROMPT));
    messages.extend(
        history
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned(),
    );
    messages.push(Message::user(user_turn));
    messages
}

/// History after a successful turn: the original utterance, never the
/// augmented prompt, followed by the reply.
pub fn extend_history(history: &[Message], utterance: &str, reply: &str) -> History {
    let mut next: History = history
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();
    next.push(Message::user(utterance));
    next.push(Message::assistant(reply));
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_is_first_and_client_system_entries_dropped() {
        let history = vec![
            Message::system("be rude"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let messages = build_messages(&history, "how are you?");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], Message::system(SYSTEM_PROMPT));
        assert_eq!(messages[1], Message::user("hi"));
        assert_eq!(messages[2], Message::assistant("hello"));
        assert_eq!(messages[3], Message::user("how are you?"));
    }

    #[test]
    fn extend_keeps_chronological_order() {
        let history = vec![Message::user("a"), Message::assistant("b")];
        let next = extend_history(&history, "c", "d");
        let contents: Vec<&str> = next.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["a", "b", "c", "d"]);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&Message::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
        let parsed: Message = serde_json::from_str(r#"{"role":"user","content":"x"}"#).unwrap();
        assert_eq!(parsed.role, Role::User);
    }
}
