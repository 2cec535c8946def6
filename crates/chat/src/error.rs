use snafu::Snafu;

use crate::editor::EditorAction;
use crate::session::SessionId;

/// Synchronous failures surfaced to the caller before anything is dispatched.
///
/// Stream failures never show up here; they settle the affected turn instead.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AssistantError {
    #[snafu(display("no model config found for model '{model_name}'"))]
    MissingModelConfig {
        stage: &'static str,
        model_name: String,
    },
    #[snafu(display("{matches} model configs are named '{model_name}', expected exactly one"))]
    AmbiguousModelConfig {
        stage: &'static str,
        model_name: String,
        matches: usize,
    },
    #[snafu(display("cannot run '{action}' on empty source text"))]
    EmptySourceText {
        stage: &'static str,
        action: &'static str,
    },
    #[snafu(display("the custom action needs a non-empty instruction"))]
    EmptyInstruction { stage: &'static str },
    #[snafu(display("session '{session_id}' is still streaming an answer"))]
    RequestInFlight {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("there is no previous prompt to re-run"))]
    NothingToRerun { stage: &'static str },
    #[snafu(display("no chat session is active"))]
    NoActiveSession { stage: &'static str },
    #[snafu(display("session '{session_id}' has no settled assistant response yet"))]
    ResponseNotReady {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("editor rejected {action:?}: {message}"))]
    Editor {
        stage: &'static str,
        action: EditorAction,
        message: String,
    },
}

pub type AssistantResult<T> = Result<T, AssistantError>;
