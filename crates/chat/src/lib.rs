#![deny(unsafe_code)]

//! Streaming chat-session core for the writing assistant.
//!
//! Provider streams are normalized into fragments, folded into immutable
//! [`ChatSession`] snapshots by the [`StreamAggregator`], and driven by the
//! [`WritingAssistant`] controller.

pub mod aggregator;
pub mod assistant;
/// Collaborator contracts: provider config lookup and outbound dispatch.
pub mod dispatch;
pub mod editor;
pub mod error;
/// Chunk events delivered by transports and the fragments they normalize to.
pub mod events;
pub mod normalizer;
pub mod prompt;
/// Conversation model and the pure fold over it.
pub mod session;
pub mod wire;

pub use aggregator::{FoldOutcome, StreamAggregator, StreamPhase};
pub use assistant::WritingAssistant;
pub use dispatch::{
    DispatchRequest, ModelConfig, ModelConfigSource, PromptDispatcher, ProviderKind,
    resolve_model_config,
};
pub use editor::{EditorAction, EditorSurface, apply_to_editor};
pub use error::{AssistantError, AssistantResult};
pub use events::{ChunkEvent, ChunkPayload, Fragment};
pub use normalizer::{decode_wire, normalize};
pub use prompt::{PromptAction, build_prompt};
pub use session::{
    ChatSession, ContextItem, DEFAULT_SESSION_NAME, FragmentStatus, ResubmissionMessage, Role,
    SessionId, Turn, TurnStatus,
};
pub use wire::{AnthropicDelta, AnthropicEvent, OpenAiChunk, WireShape};
