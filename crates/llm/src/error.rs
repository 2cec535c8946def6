use quill_chat::SessionId;
use snafu::Snafu;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("missing API key for model '{model_name}'"))]
    MissingApiKey {
        stage: &'static str,
        model_name: String,
    },
    #[snafu(display("stream request for session '{session_id}' has no messages"))]
    EmptyMessageSet {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("no tokio runtime available on `{stage}`"))]
    NoRuntime {
        stage: &'static str,
        source: tokio::runtime::TryCurrentError,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}
