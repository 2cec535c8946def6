//! Single normalization boundary between provider stream shapes and the fold.
//!
//! Adding a provider means adding a wire type and a `normalize_*` function
//! here; the aggregator only ever sees [`Fragment`].

use crate::events::{ChunkEvent, ChunkPayload, Fragment};
use crate::session::SessionId;
use crate::wire::{AnthropicDelta, AnthropicEvent, OpenAiChunk, WireShape};

/// Shown when a transport reports a failure without any message.
pub const STREAM_FAILURE_FALLBACK: &str = "The model provider stream failed.";

const SSE_DATA_PREFIX: &str = "data:";
const SSE_DONE_MARKER: &str = "[DONE]";

/// OpenAI chunks carry no inline error signal, so the status is always success.
pub fn normalize_openai(session_id: &SessionId, chunk: &OpenAiChunk) -> Fragment {
    let text = chunk
        .choices
        .first()
        .and_then(|choice| choice.delta.content.clone())
        .unwrap_or_default();
    Fragment::success(session_id.clone(), text)
}

/// Only text deltas of `content_block_delta` events carry text; every other
/// event kind becomes an empty success fragment.
pub fn normalize_anthropic(session_id: &SessionId, event: &AnthropicEvent) -> Fragment {
    let text = match event {
        AnthropicEvent::ContentBlockDelta {
            delta: AnthropicDelta::TextDelta { text },
            ..
        } => text.clone(),
        _ => String::new(),
    };
    Fragment::success(session_id.clone(), text)
}

pub fn normalize_failure(session_id: &SessionId, message: &str) -> Fragment {
    let message = message.trim();
    let text = if message.is_empty() {
        STREAM_FAILURE_FALLBACK
    } else {
        message
    };
    Fragment::error(session_id.clone(), text)
}

/// Maps one chunk event to a fragment. The end-of-stream marker has none.
pub fn normalize(event: &ChunkEvent) -> Option<Fragment> {
    match &event.payload {
        ChunkPayload::OpenAi(chunk) => Some(normalize_openai(&event.session_id, chunk)),
        ChunkPayload::Anthropic(anthropic) => {
            Some(normalize_anthropic(&event.session_id, anthropic))
        }
        ChunkPayload::Failed(message) => Some(normalize_failure(&event.session_id, message)),
        ChunkPayload::Finished => None,
    }
}

/// Decodes one raw stream payload (an SSE `data:` line or bare JSON) of the
/// given shape into a chunk event.
///
/// Payloads that do not match the expected shape are dropped, never surfaced
/// as errors, so one malformed chunk cannot break the fold.
pub fn decode_wire(shape: WireShape, session_id: &SessionId, raw: &str) -> Option<ChunkEvent> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
        return None;
    }

    let payload = line
        .strip_prefix(SSE_DATA_PREFIX)
        .map(str::trim_start)
        .unwrap_or(line);
    if payload == SSE_DONE_MARKER {
        return Some(ChunkEvent::finished(session_id.clone()));
    }

    let decoded = match shape {
        WireShape::OpenAi => serde_json::from_str::<OpenAiChunk>(payload)
            .map(|chunk| ChunkEvent::openai(session_id.clone(), chunk)),
        WireShape::Anthropic => serde_json::from_str::<AnthropicEvent>(payload)
            .map(|event| ChunkEvent::anthropic(session_id.clone(), event)),
    };

    match decoded {
        Ok(event) => Some(event),
        Err(error) => {
            tracing::warn!(
                session_id = %session_id,
                shape = ?shape,
                error = %error,
                "dropping stream payload with unrecognized shape"
            );
            None
        }
    }
}
