use futures::StreamExt;
use quill_chat::{
    AnthropicEvent, ChunkEvent, DispatchRequest, ModelConfig, OpenAiChunk, PromptDispatcher,
    ProviderKind, ResubmissionMessage, Role, SessionId,
};
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::{anthropic, openai};
use rig::streaming::{StreamedAssistantContent, StreamingCompletionResponse};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::error::{
    CompletionsFailedSnafu, EmptyMessageSetSnafu, HttpClientSnafu, MissingApiKeySnafu,
    NoRuntimeSnafu, TransportError, TransportResult,
};
use super::model::DEFAULT_ANTHROPIC_MAX_TOKENS;

/// Creates the push channel chunk events travel on.
pub fn event_channel() -> (
    mpsc::UnboundedSender<ChunkEvent>,
    mpsc::UnboundedReceiver<ChunkEvent>,
) {
    mpsc::unbounded_channel()
}

/// Prompt dispatcher backed by rig's OpenAI and Anthropic clients.
///
/// Every dispatch spawns one worker on the stored runtime. The worker re-emits
/// streamed text in the provider's own wire shape, followed by either a
/// failure or the end-of-stream marker.
#[derive(Clone)]
pub struct RigTransport {
    events_tx: mpsc::UnboundedSender<ChunkEvent>,
    runtime: Handle,
}

impl RigTransport {
    pub fn new(events_tx: mpsc::UnboundedSender<ChunkEvent>, runtime: Handle) -> Self {
        Self { events_tx, runtime }
    }

    /// Binds the transport to the runtime the caller is running on.
    pub fn on_current_runtime(
        events_tx: mpsc::UnboundedSender<ChunkEvent>,
    ) -> TransportResult<Self> {
        let runtime = Handle::try_current().context(NoRuntimeSnafu {
            stage: "rig-transport-current-runtime",
        })?;
        Ok(Self::new(events_tx, runtime))
    }

    fn build_openai_client(config: &ModelConfig) -> TransportResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if let Some(endpoint) = configured_endpoint(config) {
            builder = builder.base_url(endpoint);
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-openai-client",
        })
    }

    fn build_anthropic_client(config: &ModelConfig) -> TransportResult<anthropic::Client> {
        let mut builder = anthropic::Client::builder().api_key(config.api_key.as_str());
        if let Some(endpoint) = configured_endpoint(config) {
            builder = builder.base_url(endpoint);
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-anthropic-client",
        })
    }

    fn to_rig_message(message: &ResubmissionMessage) -> RigMessage {
        match message.role {
            Role::User => RigMessage::user(message.content.clone()),
            Role::Assistant => RigMessage::assistant(message.content.clone()),
        }
    }

    async fn open_stream<M>(
        model: M,
        config: &ModelConfig,
        request: &DispatchRequest,
    ) -> TransportResult<StreamingCompletionResponse<M::StreamingResponse>>
    where
        M: CompletionModel,
    {
        let mut messages = request
            .messages
            .iter()
            .map(Self::to_rig_message)
            .collect::<Vec<_>>();

        // The newest turn is the prompt; everything before it is history.
        let prompt = messages.pop().context(EmptyMessageSetSnafu {
            stage: "open-stream-pop-prompt",
            session_id: request.session_id.clone(),
        })?;
        let mut builder = model.completion_request(prompt).messages(messages);

        if let Some(temperature) = config.temperature {
            builder = builder.temperature(temperature);
        }

        let max_tokens = match config.provider {
            ProviderKind::Anthropic => config.max_tokens.or(Some(DEFAULT_ANTHROPIC_MAX_TOKENS)),
            ProviderKind::OpenAi => config.max_tokens,
        };
        if let Some(max_tokens) = max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    fn map_stream_item<R>(
        provider: ProviderKind,
        session_id: &SessionId,
        item: StreamedAssistantContent<R>,
    ) -> Option<ChunkEvent>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) => wire_event(provider, session_id, text.text),
            StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => None,
        }
    }

    /// Pumps one provider stream into the channel until it ends.
    ///
    /// Returns `Ok` without the end-of-stream marker when the receiver is gone.
    async fn pump_stream<M>(
        model: M,
        config: &ModelConfig,
        request: &DispatchRequest,
        events_tx: &mpsc::UnboundedSender<ChunkEvent>,
    ) -> TransportResult<()>
    where
        M: CompletionModel,
    {
        let session_id = &request.session_id;
        let mut stream = Self::open_stream(model, config, request).await?;

        while let Some(item) = stream.next().await {
            let item = item.context(CompletionsFailedSnafu {
                stage: "stream-chunk",
            })?;
            let Some(event) = Self::map_stream_item(config.provider, session_id, item) else {
                continue;
            };
            if events_tx.send(event).is_err() {
                tracing::debug!(
                    session_id = %session_id,
                    "chunk receiver dropped; cancelling provider stream"
                );
                stream.cancel();
                return Ok(());
            }
        }

        let _ = events_tx.send(ChunkEvent::finished(session_id.clone()));
        Ok(())
    }

    async fn run_stream_worker(
        model_name: String,
        config: ModelConfig,
        request: DispatchRequest,
        events_tx: mpsc::UnboundedSender<ChunkEvent>,
    ) {
        let outcome = match config.provider {
            ProviderKind::OpenAi => match Self::build_openai_client(&config) {
                Ok(client) => {
                    let model = client.completion_model(model_name.clone());
                    Self::pump_stream(model, &config, &request, &events_tx).await
                }
                Err(error) => Err(error),
            },
            ProviderKind::Anthropic => match Self::build_anthropic_client(&config) {
                Ok(client) => {
                    let model = client.completion_model(model_name.clone());
                    Self::pump_stream(model, &config, &request, &events_tx).await
                }
                Err(error) => Err(error),
            },
        };

        if let Err(error) = outcome {
            tracing::error!(
                session_id = %request.session_id,
                provider = config.provider.as_str(),
                model_name = %model_name,
                error = %error,
                "provider stream failed"
            );
            let _ = events_tx.send(ChunkEvent::failed(
                request.session_id.clone(),
                error.to_string(),
            ));
        }
    }
}

impl PromptDispatcher for RigTransport {
    type Error = TransportError;

    fn send_prompt(
        &self,
        model_name: &str,
        config: &ModelConfig,
        request: DispatchRequest,
    ) -> TransportResult<()> {
        ensure!(
            !config.api_key.trim().is_empty(),
            MissingApiKeySnafu {
                stage: "send-prompt",
                model_name,
            }
        );
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "send-prompt",
                session_id: request.session_id.clone(),
            }
        );

        tracing::debug!(
            session_id = %request.session_id,
            provider = config.provider.as_str(),
            model_name,
            "spawning provider stream worker"
        );
        self.runtime.spawn(Self::run_stream_worker(
            model_name.to_string(),
            config.clone(),
            request,
            self.events_tx.clone(),
        ));
        Ok(())
    }
}

fn configured_endpoint(config: &ModelConfig) -> Option<&str> {
    config
        .endpoint
        .as_deref()
        .map(str::trim)
        .filter(|endpoint| !endpoint.is_empty())
}

/// Wraps one streamed text delta in the wire shape of its provider.
fn wire_event(provider: ProviderKind, session_id: &SessionId, text: String) -> Option<ChunkEvent> {
    if text.is_empty() {
        return None;
    }

    let event = match provider {
        ProviderKind::OpenAi => ChunkEvent::openai(session_id.clone(), OpenAiChunk::text_delta(text)),
        ProviderKind::Anthropic => {
            ChunkEvent::anthropic(session_id.clone(), AnthropicEvent::text_delta(text))
        }
    };
    Some(event)
}
