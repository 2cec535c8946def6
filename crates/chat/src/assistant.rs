use std::sync::Arc;

use snafu::{OptionExt, ensure};

use crate::aggregator::{FoldOutcome, StreamAggregator, StreamPhase};
use crate::dispatch::{DispatchRequest, ModelConfigSource, PromptDispatcher, resolve_model_config};
use crate::editor::{EditorAction, EditorSurface, apply_to_editor};
use crate::error::{
    AssistantError, AssistantResult, EmptyInstructionSnafu, EmptySourceTextSnafu,
    NoActiveSessionSnafu, NothingToRerunSnafu, RequestInFlightSnafu, ResponseNotReadySnafu,
};
use crate::events::ChunkEvent;
use crate::normalizer;
use crate::prompt::{PromptAction, build_prompt};
use crate::session::{ChatSession, SessionId};

/// Writing-assistant controller.
///
/// Ties prompt building, config lookup, dispatch and folding together around
/// one current session. Replacing or dismissing the current session untracks
/// it, so answers still streaming for it are dropped.
pub struct WritingAssistant<C, D> {
    aggregator: StreamAggregator,
    configs: C,
    dispatcher: D,
    current: Option<SessionId>,
    last_prompt: Option<String>,
}

impl<C, D> WritingAssistant<C, D>
where
    C: ModelConfigSource,
    D: PromptDispatcher,
{
    pub fn new(configs: C, dispatcher: D) -> Self {
        Self {
            aggregator: StreamAggregator::new(),
            configs,
            dispatcher,
            current: None,
            last_prompt: None,
        }
    }

    pub fn aggregator(&self) -> &StreamAggregator {
        &self.aggregator
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn current_session_id(&self) -> Option<&SessionId> {
        self.current.as_ref()
    }

    pub fn current_session(&self) -> Option<Arc<ChatSession>> {
        self.current
            .as_ref()
            .and_then(|session_id| self.aggregator.session(session_id))
    }

    pub fn last_prompt(&self) -> Option<&str> {
        self.last_prompt.as_deref()
    }

    /// Builds the prompt for `action` and submits it on the current session.
    pub fn run_action(
        &mut self,
        action: &PromptAction,
        source_text: &str,
    ) -> AssistantResult<SessionId> {
        ensure!(
            !action.has_blank_instruction(),
            EmptyInstructionSnafu {
                stage: "run-action-instruction",
            }
        );
        let prompt = build_prompt(action, source_text).context(EmptySourceTextSnafu {
            stage: "run-action-build-prompt",
            action: action.slug(),
        })?;
        self.submit_prompt(prompt)
    }

    /// Re-issues the last prompt on the current session as a fresh turn.
    pub fn rerun(&mut self) -> AssistantResult<SessionId> {
        let prompt = self.last_prompt.clone().context(NothingToRerunSnafu {
            stage: "rerun-last-prompt",
        })?;
        self.submit_prompt(prompt)
    }

    /// Appends `prompt` as a user turn and hands the conversation to the dispatcher.
    ///
    /// Config lookup precedes any append; when it fails nothing is appended or sent.
    /// The current session must not be streaming: one request per session at a time.
    pub fn submit_prompt(&mut self, prompt: String) -> AssistantResult<SessionId> {
        if let Some(session_id) = &self.current {
            ensure!(
                self.aggregator.phase(session_id) != Some(StreamPhase::Streaming),
                RequestInFlightSnafu {
                    stage: "submit-prompt-phase",
                    session_id: session_id.clone(),
                }
            );
        }
        let (model_name, config) = resolve_model_config(&self.configs)?;

        let session_id = match self.current.clone() {
            Some(session_id) if self.aggregator.is_tracked(&session_id) => session_id,
            _ => {
                let session_id = self.aggregator.open_session();
                self.current = Some(session_id.clone());
                session_id
            }
        };

        self.last_prompt = Some(prompt.clone());
        let snapshot = self.aggregator.start_turn(&session_id, prompt);
        let request = DispatchRequest {
            session_id: session_id.clone(),
            messages: snapshot.resubmission_view(),
        };

        tracing::info!(
            session_id = %session_id,
            model_name = %model_name,
            provider = config.provider.as_str(),
            message_count = request.messages.len(),
            "dispatching prompt"
        );

        if let Err(error) = self.dispatcher.send_prompt(&model_name, &config, request) {
            tracing::warn!(
                session_id = %session_id,
                error = %error,
                "dispatch failed; folding as error fragment"
            );
            let fragment = normalizer::normalize_failure(&session_id, &error.to_string());
            self.aggregator.apply_fragment(&fragment);
            self.aggregator.finish(&session_id);
        }

        Ok(session_id)
    }

    /// Folds one chunk event from the transport channel.
    pub fn handle_event(&mut self, event: &ChunkEvent) -> FoldOutcome {
        self.aggregator.apply_event(event)
    }

    /// Resumes a stored session as the current one.
    pub fn resume(&mut self, session: ChatSession) -> Option<Arc<ChatSession>> {
        let previous = self.dismiss();
        let snapshot = self.aggregator.track(session);
        self.current = Some(snapshot.id().clone());
        previous
    }

    /// Starts a new empty session, abandoning the current one.
    ///
    /// Returns the id of the new session and the final snapshot of the old one.
    pub fn new_session(&mut self) -> (SessionId, Option<Arc<ChatSession>>) {
        let previous = self.dismiss();
        let session_id = self.aggregator.open_session();
        self.current = Some(session_id.clone());
        (session_id, previous)
    }

    /// Drops the current session. Its final snapshot is returned for persistence.
    pub fn dismiss(&mut self) -> Option<Arc<ChatSession>> {
        self.last_prompt = None;
        let session_id = self.current.take()?;
        self.aggregator.abandon(&session_id)
    }

    /// Final displayable text of the current answer.
    pub fn final_response(&self) -> AssistantResult<String> {
        let session_id = self.current.as_ref().context(NoActiveSessionSnafu {
            stage: "final-response-current-session",
        })?;
        self.aggregator
            .final_response(session_id)
            .map(str::to_string)
            .context(ResponseNotReadySnafu {
                stage: "final-response-settled-turn",
                session_id: session_id.clone(),
            })
    }

    /// Applies the final answer to `editor`.
    ///
    /// Insert and replace consume the answer and close the session, returning
    /// its final snapshot; copy keeps the session open.
    pub fn apply_response<E>(
        &mut self,
        editor: &mut E,
        action: EditorAction,
    ) -> AssistantResult<Option<Arc<ChatSession>>>
    where
        E: EditorSurface + ?Sized,
    {
        let text = self.final_response()?;
        apply_to_editor(editor, action, &text).map_err(|error| AssistantError::Editor {
            stage: "apply-response",
            action,
            message: error.to_string(),
        })?;

        if action.closes_session() {
            Ok(self.dismiss())
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fmt;

    use super::*;
    use crate::dispatch::{ModelConfig, ProviderKind};
    use crate::session::{Role, TurnStatus};
    use crate::wire::OpenAiChunk;

    struct Settings {
        default_model: String,
    }

    impl ModelConfigSource for Settings {
        fn default_model_name(&self) -> String {
            self.default_model.clone()
        }

        fn model_configs(&self) -> Vec<ModelConfig> {
            vec![ModelConfig::new("gpt-4o-mini", ProviderKind::OpenAi).with_api_key("sk-test")]
        }
    }

    #[derive(Debug)]
    struct Refused;

    impl fmt::Display for Refused {
        fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("missing API key for provider 'openai'")
        }
    }

    impl std::error::Error for Refused {}

    #[derive(Default)]
    struct RecordingDispatcher {
        refuse: bool,
        sent: RefCell<Vec<(String, DispatchRequest)>>,
    }

    impl PromptDispatcher for RecordingDispatcher {
        type Error = Refused;

        fn send_prompt(
            &self,
            model_name: &str,
            _config: &ModelConfig,
            request: DispatchRequest,
        ) -> Result<(), Self::Error> {
            if self.refuse {
                return Err(Refused);
            }
            self.sent
                .borrow_mut()
                .push((model_name.to_string(), request));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Buffer {
        text: String,
        clipboard: Option<String>,
    }

    impl EditorSurface for Buffer {
        type Error = Refused;

        fn insert_after_selection(&mut self, text: &str) -> Result<(), Self::Error> {
            self.text.push('\n');
            self.text.push_str(text);
            Ok(())
        }

        fn replace_selection(&mut self, text: &str) -> Result<(), Self::Error> {
            self.text = text.to_string();
            Ok(())
        }

        fn copy_to_clipboard(&mut self, text: &str) -> Result<(), Self::Error> {
            self.clipboard = Some(text.to_string());
            Ok(())
        }
    }

    fn assistant() -> WritingAssistant<Settings, RecordingDispatcher> {
        WritingAssistant::new(
            Settings {
                default_model: "gpt-4o-mini".to_string(),
            },
            RecordingDispatcher::default(),
        )
    }

    fn stream_answer(
        assistant: &mut WritingAssistant<Settings, RecordingDispatcher>,
        session_id: &SessionId,
        parts: &[&str],
    ) {
        for part in parts {
            assistant.handle_event(&ChunkEvent::openai(
                session_id.clone(),
                OpenAiChunk::text_delta(*part),
            ));
        }
        assistant.handle_event(&ChunkEvent::finished(session_id.clone()));
    }

    #[test]
    fn run_action_appends_user_turn_and_dispatches_history() {
        let mut assistant = assistant();

        let session_id = assistant
            .run_action(&PromptAction::Simplify, "A long winded note.")
            .expect("action runs");

        let sent = assistant.dispatcher.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "gpt-4o-mini");
        assert_eq!(sent[0].1.session_id, session_id);
        assert_eq!(sent[0].1.messages.len(), 1);
        assert_eq!(sent[0].1.messages[0].role, Role::User);
        assert!(sent[0].1.messages[0].content.contains("A long winded note."));
        assert_eq!(
            assistant.aggregator().phase(&session_id),
            Some(StreamPhase::Streaming)
        );
    }

    #[test]
    fn blank_source_text_is_rejected_before_dispatch() {
        let mut assistant = assistant();

        let error = assistant
            .run_action(&PromptAction::Takeaways, "   ")
            .expect_err("blank text is rejected");

        assert!(matches!(error, AssistantError::EmptySourceText { .. }));
        assert!(assistant.current_session().is_none());
        assert!(assistant.dispatcher.sent.borrow().is_empty());
    }

    #[test]
    fn missing_model_config_appends_nothing() {
        let mut assistant = WritingAssistant::new(
            Settings {
                default_model: "unknown-model".to_string(),
            },
            RecordingDispatcher::default(),
        );

        let error = assistant
            .submit_prompt("hello".to_string())
            .expect_err("config is missing");

        assert!(matches!(error, AssistantError::MissingModelConfig { .. }));
        assert!(assistant.aggregator().is_empty());
        assert!(assistant.dispatcher.sent.borrow().is_empty());
    }

    #[test]
    fn refused_dispatch_settles_turn_as_error() {
        let mut assistant = WritingAssistant::new(
            Settings {
                default_model: "gpt-4o-mini".to_string(),
            },
            RecordingDispatcher {
                refuse: true,
                ..RecordingDispatcher::default()
            },
        );

        assistant
            .submit_prompt("hello".to_string())
            .expect("precondition holds");

        let session = assistant.current_session().expect("session is current");
        let turn = session.open_assistant_turn().expect("error turn exists");
        assert_eq!(turn.status, TurnStatus::Error);
        assert_eq!(turn.content, "missing API key for provider 'openai'");
        assert_eq!(
            assistant.final_response().expect("error answer is settled"),
            turn.content
        );
    }

    #[test]
    fn rerun_reuses_session_and_resends_full_history() {
        let mut assistant = assistant();
        let session_id = assistant
            .run_action(&PromptAction::CopyEdit, "teh note")
            .expect("action runs");
        stream_answer(&mut assistant, &session_id, &["the ", "note"]);

        let rerun_id = assistant.rerun().expect("rerun runs");
        stream_answer(&mut assistant, &session_id, &["The note."]);

        assert_eq!(rerun_id, session_id);
        let session = assistant.current_session().expect("session is current");
        let roles = session.turns().iter().map(|turn| turn.role).collect::<Vec<_>>();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert_eq!(session.turns()[1].content, "the note");
        assert_eq!(session.turns()[3].content, "The note.");
        assert_eq!(session.turns()[0].content, session.turns()[2].content);

        let sent = assistant.dispatcher.sent.borrow();
        assert_eq!(sent[1].1.messages.len(), 3);
    }

    #[test]
    fn rerun_while_streaming_is_refused_until_the_answer_settles() {
        let mut assistant = assistant();
        let session_id = assistant
            .run_action(&PromptAction::Simplify, "a wordy note")
            .expect("action runs");
        assistant.handle_event(&ChunkEvent::openai(
            session_id.clone(),
            OpenAiChunk::text_delta("OLD1 "),
        ));

        let error = assistant.rerun().expect_err("first answer is still streaming");
        assert!(matches!(
            error,
            AssistantError::RequestInFlight { session_id: ref busy, .. } if *busy == session_id
        ));
        assert!(matches!(
            assistant.submit_prompt("another".to_string()),
            Err(AssistantError::RequestInFlight { .. })
        ));
        assert_eq!(assistant.dispatcher.sent.borrow().len(), 1);
        assert_eq!(
            assistant.current_session().map(|session| session.turns().len()),
            Some(2)
        );

        stream_answer(&mut assistant, &session_id, &["OLD2 "]);
        assert_eq!(assistant.final_response().expect("settled"), "OLD1 OLD2 ");

        assistant.rerun().expect("settled session accepts a rerun");
        assistant.handle_event(&ChunkEvent::openai(
            session_id.clone(),
            OpenAiChunk::text_delta("NEW1 "),
        ));

        let session = assistant.current_session().expect("session is current");
        assert_eq!(session.turns().len(), 4);
        assert_eq!(session.turns()[1].content, "OLD1 OLD2 ");
        assert_eq!(session.turns()[3].content, "NEW1 ");
        assert_eq!(
            assistant.aggregator().phase(&session_id),
            Some(StreamPhase::Streaming)
        );
        assert_eq!(assistant.dispatcher.sent.borrow().len(), 2);
    }

    #[test]
    fn blank_custom_instruction_is_rejected_before_dispatch() {
        let mut assistant = assistant();

        let error = assistant
            .run_action(&PromptAction::Custom("  ".to_string()), "a real note")
            .expect_err("blank instruction is rejected");

        assert!(matches!(error, AssistantError::EmptyInstruction { .. }));
        assert!(assistant.current_session().is_none());
        assert!(assistant.last_prompt().is_none());
        assert!(assistant.dispatcher.sent.borrow().is_empty());
    }

    #[test]
    fn rerun_without_prompt_fails() {
        let mut assistant = assistant();
        assert!(matches!(
            assistant.rerun(),
            Err(AssistantError::NothingToRerun { .. })
        ));
    }

    #[test]
    fn dismissed_session_ignores_late_answers() {
        let mut assistant = assistant();
        let first = assistant
            .run_action(&PromptAction::Simplify, "first note")
            .expect("action runs");

        let dismissed = assistant.dismiss().expect("session was current");
        let second = assistant
            .run_action(&PromptAction::Simplify, "second note")
            .expect("action runs");
        let outcome = assistant.handle_event(&ChunkEvent::openai(
            first.clone(),
            OpenAiChunk::text_delta("late text"),
        ));

        assert_ne!(first, second);
        assert_eq!(dismissed.id(), &first);
        assert!(outcome.is_discarded());
        let current = assistant.current_session().expect("second session is current");
        assert_eq!(current.turns().len(), 1);
    }

    #[test]
    fn apply_response_requires_settled_answer() {
        let mut assistant = assistant();
        let mut buffer = Buffer::default();
        assert!(matches!(
            assistant.apply_response(&mut buffer, EditorAction::CopyToClipboard),
            Err(AssistantError::NoActiveSession { .. })
        ));

        let session_id = assistant
            .run_action(&PromptAction::Simplify, "note")
            .expect("action runs");
        assistant.handle_event(&ChunkEvent::openai(
            session_id,
            OpenAiChunk::text_delta("partial"),
        ));

        assert!(matches!(
            assistant.apply_response(&mut buffer, EditorAction::ReplaceSelection),
            Err(AssistantError::ResponseNotReady { .. })
        ));
        assert!(buffer.text.is_empty());
    }

    #[test]
    fn copy_keeps_session_and_insert_closes_it() {
        let mut assistant = assistant();
        let session_id = assistant
            .run_action(&PromptAction::Takeaways, "note")
            .expect("action runs");
        stream_answer(&mut assistant, &session_id, &["- one", "\n- two"]);
        let mut buffer = Buffer {
            text: "note".to_string(),
            clipboard: None,
        };

        let closed = assistant
            .apply_response(&mut buffer, EditorAction::CopyToClipboard)
            .expect("copy succeeds");
        assert!(closed.is_none());
        assert_eq!(buffer.clipboard.as_deref(), Some("- one\n- two"));

        let closed = assistant
            .apply_response(&mut buffer, EditorAction::InsertAfterSelection)
            .expect("insert succeeds");
        assert_eq!(buffer.text, "note\n- one\n- two");
        assert_eq!(closed.map(|session| session.turns().len()), Some(2));
        assert!(assistant.current_session_id().is_none());
        assert!(!assistant.aggregator().is_tracked(&session_id));
    }

    #[test]
    fn new_session_abandons_previous_one() {
        let mut assistant = assistant();
        let first = assistant
            .run_action(&PromptAction::Simplify, "note")
            .expect("action runs");

        let (second, previous) = assistant.new_session();

        assert_ne!(first, second);
        assert_eq!(previous.map(|session| session.id().clone()), Some(first.clone()));
        assert!(!assistant.aggregator().is_tracked(&first));
        assert_eq!(assistant.current_session_id(), Some(&second));
        assert!(assistant.last_prompt().is_none());
    }

    #[test]
    fn resume_tracks_stored_session_as_current() {
        let mut assistant = assistant();
        let stored = ChatSession::new(SessionId::new("stored"))
            .with_user_turn("old prompt")
            .fold("old answer", crate::session::FragmentStatus::Success)
            .expect("fragment changes the session");

        assistant.resume(stored);
        assistant
            .submit_prompt("follow up".to_string())
            .expect("prompt is submitted");

        let sent = assistant.dispatcher.sent.borrow();
        assert_eq!(sent[0].1.session_id, SessionId::new("stored"));
        assert_eq!(sent[0].1.messages.len(), 3);
    }
}
