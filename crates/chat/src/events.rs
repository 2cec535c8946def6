use crate::session::{FragmentStatus, SessionId};
use crate::wire::{AnthropicEvent, OpenAiChunk};

/// Provider-shaped payload delivered on the chunk-event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPayload {
    OpenAi(OpenAiChunk),
    Anthropic(AnthropicEvent),
    /// Transport-level failure: connection error, non-2xx status, timeout.
    Failed(String),
    /// The provider closed the stream normally.
    Finished,
}

/// Emitted by a transport for every streamed item, keyed by session id.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkEvent {
    pub session_id: SessionId,
    pub payload: ChunkPayload,
}

impl ChunkEvent {
    pub fn new(session_id: SessionId, payload: ChunkPayload) -> Self {
        Self {
            session_id,
            payload,
        }
    }

    pub fn openai(session_id: SessionId, chunk: OpenAiChunk) -> Self {
        Self::new(session_id, ChunkPayload::OpenAi(chunk))
    }

    pub fn anthropic(session_id: SessionId, event: AnthropicEvent) -> Self {
        Self::new(session_id, ChunkPayload::Anthropic(event))
    }

    pub fn failed(session_id: SessionId, message: impl Into<String>) -> Self {
        Self::new(session_id, ChunkPayload::Failed(message.into()))
    }

    pub fn finished(session_id: SessionId) -> Self {
        Self::new(session_id, ChunkPayload::Finished)
    }

    /// True for payloads after which the transport sends nothing more.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            ChunkPayload::Failed(_) | ChunkPayload::Finished
        )
    }
}

/// Provider-agnostic fragment folded into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub session_id: SessionId,
    pub text: String,
    pub status: FragmentStatus,
}

impl Fragment {
    pub fn success(session_id: SessionId, text: impl Into<String>) -> Self {
        Self {
            session_id,
            text: text.into(),
            status: FragmentStatus::Success,
        }
    }

    pub fn error(session_id: SessionId, text: impl Into<String>) -> Self {
        Self {
            session_id,
            text: text.into(),
            status: FragmentStatus::Error,
        }
    }
}
