use std::path::PathBuf;

use quill_chat::{AssistantError, SessionId};
use quill_llm::TransportError;
use quill_storage::StorageError;
use snafu::Snafu;

use crate::buffer::BufferError;
use crate::settings::SettingsError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("failed to read document from {}: {source}", path_label(path)))]
    ReadDocument {
        stage: &'static str,
        path: Option<PathBuf>,
        source: std::io::Error,
    },
    #[snafu(display("failed to write {}: {source}", path_label(path)))]
    WriteOutput {
        stage: &'static str,
        path: Option<PathBuf>,
        source: std::io::Error,
    },
    #[snafu(display("{source}"))]
    Buffer {
        stage: &'static str,
        source: BufferError,
    },
    #[snafu(display("{source}"))]
    Assistant {
        stage: &'static str,
        source: AssistantError,
    },
    #[snafu(display("{source}"))]
    Transport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("{source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("{source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("model '{model_name}' is not configured"))]
    UnknownModel {
        stage: &'static str,
        model_name: String,
    },
    #[snafu(display("session '{session_id}' was not found"))]
    SessionNotFound {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("event channel closed before session '{session_id}' settled"))]
    StreamClosed {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("the model answered with an error: {message}"))]
    AnswerFailed {
        stage: &'static str,
        message: String,
    },
}

pub type CliResult<T> = Result<T, CliError>;

fn path_label(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None => "standard stream".to_string(),
    }
}
