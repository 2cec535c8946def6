use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sidebar label used when a session has no user turn yet.
pub const DEFAULT_SESSION_NAME: &str = "New Chat";

const DISPLAY_NAME_MAX_CHARS: usize = 48;

/// Opaque identifier for one chat session.
///
/// Transports echo this value back on every chunk event, so it stays a plain
/// string rather than a parsed UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Mints a time-ordered identifier for a fresh session.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Chat speaker role. The core only ever produces these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Lifecycle status for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Pending,
    #[default]
    Success,
    Error,
}

impl TurnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Status reported by one stream fragment. Fragments never report `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentStatus {
    Success,
    Error,
}

impl From<FragmentStatus> for TurnStatus {
    fn from(value: FragmentStatus) -> Self {
        match value {
            FragmentStatus::Success => Self::Success,
            FragmentStatus::Error => Self::Error,
        }
    }
}

/// Reference material attached to a turn. Carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextItem {
    pub source: String,
    pub excerpt: String,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_content: Option<String>,
    #[serde(default)]
    pub status: TurnStatus,
    #[serde(default)]
    pub context: Vec<ContextItem>,
}

impl Turn {
    /// Creates a settled user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            visible_content: None,
            status: TurnStatus::Success,
            context: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, status: TurnStatus) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            visible_content: None,
            status,
            context: Vec::new(),
        }
    }

    pub fn with_visible_content(mut self, visible_content: impl Into<String>) -> Self {
        self.visible_content = Some(visible_content.into());
        self
    }

    pub fn with_context(mut self, context: Vec<ContextItem>) -> Self {
        self.context = context;
        self
    }

    /// Text a renderer should show: the display override when present, else the content.
    pub fn display_text(&self) -> &str {
        self.visible_content.as_deref().unwrap_or(&self.content)
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

/// Minimal `{role, content}` projection handed back to a provider for context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResubmissionMessage {
    pub role: Role,
    pub content: String,
}

/// Conversation snapshot.
///
/// Snapshots are never mutated after construction; every change produces a new
/// value so readers holding an older snapshot keep a consistent view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    id: SessionId,
    turns: Vec<Turn>,
}

impl ChatSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            turns: Vec::new(),
        }
    }

    /// Rebuilds a session from stored turns.
    pub fn from_turns(id: SessionId, turns: Vec<Turn>) -> Self {
        Self { id, turns }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Returns the assistant turn currently receiving fragments, if any.
    ///
    /// Only a trailing assistant turn is open; any earlier assistant turn is
    /// closed by the user turn that follows it.
    pub fn open_assistant_turn(&self) -> Option<&Turn> {
        self.turns.last().filter(|turn| turn.is_assistant())
    }

    pub fn latest_assistant_turn(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|turn| turn.is_assistant())
    }

    pub fn display_name(&self) -> String {
        let Some(first_prompt) = self
            .turns
            .iter()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.content.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|prompt| !prompt.is_empty())
        else {
            return DEFAULT_SESSION_NAME.to_string();
        };

        if first_prompt.chars().count() <= DISPLAY_NAME_MAX_CHARS {
            return first_prompt;
        }

        let mut shortened = first_prompt
            .chars()
            .take(DISPLAY_NAME_MAX_CHARS)
            .collect::<String>()
            .trim_end()
            .to_string();
        shortened.push('…');
        shortened
    }

    /// Projects every turn to `{role, content}`, dropping display metadata.
    pub fn resubmission_view(&self) -> Vec<ResubmissionMessage> {
        self.turns
            .iter()
            .map(|turn| ResubmissionMessage {
                role: turn.role,
                content: turn.content.clone(),
            })
            .collect()
    }

    /// Returns a new snapshot with one more user turn appended.
    pub fn with_user_turn(&self, prompt: impl Into<String>) -> Self {
        let mut turns = self.turns.clone();
        turns.push(Turn::user(prompt));
        Self {
            id: self.id.clone(),
            turns,
        }
    }

    /// Folds one fragment into a new snapshot.
    ///
    /// Returns `None` when the fragment changes nothing (empty text), so callers
    /// can keep sharing the current snapshot.
    pub fn fold(&self, text: &str, status: FragmentStatus) -> Option<Self> {
        if text.is_empty() {
            return None;
        }

        let mut turns = self.turns.clone();
        match turns.last_mut() {
            Some(open_turn) if open_turn.is_assistant() => {
                open_turn.content.push_str(text);
                open_turn.status = status.into();
            }
            Some(_) | None => turns.push(Turn::assistant(text, status.into())),
        }

        Some(Self {
            id: self.id.clone(),
            turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_prompt(prompt: &str) -> ChatSession {
        ChatSession::new(SessionId::new("s1")).with_user_turn(prompt)
    }

    #[test]
    fn fold_after_user_turn_opens_assistant_turn() {
        let session = session_with_prompt("Summarize X");

        let folded = session
            .fold("Here ", FragmentStatus::Success)
            .expect("non-empty fragment changes the session");

        assert_eq!(folded.turns().len(), 2);
        let open_turn = folded.open_assistant_turn().expect("assistant turn is open");
        assert_eq!(open_turn.content, "Here ");
        assert_eq!(open_turn.status, TurnStatus::Success);
        // The source snapshot is untouched.
        assert_eq!(session.turns().len(), 1);
    }

    #[test]
    fn fold_appends_to_trailing_assistant_turn() {
        let fragments = ["Here ", "it ", "is", "."];
        let mut session = session_with_prompt("Summarize X");
        for fragment in fragments {
            session = session
                .fold(fragment, FragmentStatus::Success)
                .expect("non-empty fragment changes the session");
        }

        assert_eq!(session.turns().len(), 2);
        assert_eq!(session.turns()[1].content, fragments.concat());
    }

    #[test]
    fn empty_fragment_is_a_no_op_for_any_status() {
        let session = session_with_prompt("Summarize X");

        assert!(session.fold("", FragmentStatus::Success).is_none());
        assert!(session.fold("", FragmentStatus::Error).is_none());
    }

    #[test]
    fn error_fragment_keeps_partial_text_and_marks_turn() {
        let session = session_with_prompt("Summarize X")
            .fold("partial", FragmentStatus::Success)
            .and_then(|session| session.fold(" [connection reset]", FragmentStatus::Error))
            .expect("fragments change the session");

        let turn = session.open_assistant_turn().expect("assistant turn is open");
        assert_eq!(turn.content, "partial [connection reset]");
        assert_eq!(turn.status, TurnStatus::Error);
    }

    #[test]
    fn resubmission_view_is_a_pure_projection() {
        let session = session_with_prompt("Summarize X")
            .fold("Here it is.", FragmentStatus::Success)
            .expect("fragment changes the session");
        let mut turns = session.turns().to_vec();
        turns[1] = turns[1].clone().with_visible_content("**Here it is.**");
        let session = ChatSession::from_turns(session.id().clone(), turns);

        let first = session.resubmission_view();
        let second = session.resubmission_view();

        assert_eq!(first, second);
        assert_eq!(first.len(), session.turns().len());
        assert_eq!(
            first[1],
            ResubmissionMessage {
                role: Role::Assistant,
                content: "Here it is.".to_string(),
            }
        );
    }

    #[test]
    fn display_text_prefers_visible_content() {
        let plain = Turn::assistant("raw", TurnStatus::Success);
        let decorated = plain.clone().with_visible_content("shown");

        assert_eq!(plain.display_text(), "raw");
        assert_eq!(decorated.display_text(), "shown");
    }

    #[test]
    fn display_name_uses_first_prompt_and_shortens_long_ones() {
        assert_eq!(
            ChatSession::new(SessionId::new("empty")).display_name(),
            DEFAULT_SESSION_NAME
        );
        assert_eq!(
            session_with_prompt("  fix   my\nnotes ").display_name(),
            "fix my notes"
        );

        let long_name = session_with_prompt(&"word ".repeat(40)).display_name();
        assert!(long_name.ends_with('…'));
        assert!(long_name.chars().count() <= DISPLAY_NAME_MAX_CHARS + 1);
    }

    #[test]
    fn turn_serializes_with_lowercase_role_and_status() {
        let turn = Turn::assistant("hi", TurnStatus::Error);
        let json = serde_json::to_value(&turn).expect("turn serializes");

        assert_eq!(json["role"], "assistant");
        assert_eq!(json["status"], "error");
        assert!(json.get("visible_content").is_none());
    }
}
