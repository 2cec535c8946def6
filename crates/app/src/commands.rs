use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quill_chat::{
    ChatSession, ChunkEvent, EditorAction, ModelConfigSource, PromptAction, PromptDispatcher,
    SessionId, StreamPhase, TurnStatus, WritingAssistant,
};
use quill_llm::{RigTransport, event_channel};
use quill_storage::{ChatSessionStore, SqliteChatStore, StorageError};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::sync::mpsc;

use crate::buffer::{ClipboardSink, SystemClipboard, TextBuffer, parse_selection};
use crate::cli::{AssistArgs, Cli, Commands, SessionsAction};
use crate::error::{
    AnswerFailedSnafu, AssistantSnafu, BufferSnafu, CliResult, ReadDocumentSnafu, SessionNotFoundSnafu,
    SettingsSnafu, StorageSnafu, StreamClosedSnafu, TransportSnafu, UnknownModelSnafu,
    WriteOutputSnafu,
};
use crate::settings::{ModelOverride, SettingsStore};

pub async fn run(cli: Cli) -> CliResult<()> {
    let settings = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };
    let database_path = cli.database.unwrap_or_else(|| settings.database_path());

    match cli.command {
        Commands::Assist(args) => assist(args, settings, &database_path).await,
        Commands::Sessions { action } => sessions(action, &database_path).await,
        Commands::Models { set_default } => models(&settings, set_default),
    }
}

/// What one `assist` invocation asks of the assistant.
#[derive(Debug, Clone)]
pub(crate) struct AssistPlan {
    pub action: PromptAction,
    pub reruns: u32,
    pub apply: Option<EditorAction>,
}

async fn assist(args: AssistArgs, settings: SettingsStore, database_path: &Path) -> CliResult<()> {
    let document = read_document(args.file.as_deref())?;
    let mut buffer = TextBuffer::new(document, SystemClipboard::default());
    if let Some(raw) = args.selection.as_deref() {
        let selection = parse_selection(raw).context(BufferSnafu {
            stage: "assist-parse-selection",
        })?;
        buffer = buffer.with_selection(selection).context(BufferSnafu {
            stage: "assist-select",
        })?;
    }

    let plan = AssistPlan {
        action: args.action.into_prompt_action(args.instruction),
        reruns: args.rerun,
        apply: args.apply.map(EditorAction::from),
    };
    let edits_document = plan.apply.is_some_and(EditorAction::closes_session);

    let (events_tx, mut events_rx) = event_channel();
    let transport = RigTransport::on_current_runtime(events_tx).context(TransportSnafu {
        stage: "assist-transport",
    })?;
    let mut assistant = WritingAssistant::new(ModelOverride::new(settings, args.model), transport);

    // Keep stdout for the edited document when one will be printed there.
    let streamed = if edits_document && args.file.is_none() {
        drive_assist(&mut assistant, &mut events_rx, &mut buffer, &plan, &mut std::io::stderr()).await
    } else {
        drive_assist(&mut assistant, &mut events_rx, &mut buffer, &plan, &mut std::io::stdout()).await
    };

    let session = match streamed {
        Ok(session) => session,
        Err(error) => {
            if !args.no_save
                && let Some(session) = assistant.current_session()
            {
                save_session(database_path, &session).await?;
            }
            return Err(error);
        }
    };

    if !args.no_save {
        save_session(database_path, &session).await?;
    }

    if edits_document {
        write_document(args.file.as_deref(), buffer.text())?;
    }
    Ok(())
}

/// Runs the prompt plus any re-runs, streaming each answer to `out`, then
/// applies the final answer to `buffer`.
///
/// Returns the session as it stood before applying, for persistence.
pub(crate) async fn drive_assist<C, D, K, W>(
    assistant: &mut WritingAssistant<C, D>,
    events_rx: &mut mpsc::UnboundedReceiver<ChunkEvent>,
    buffer: &mut TextBuffer<K>,
    plan: &AssistPlan,
    out: &mut W,
) -> CliResult<Arc<ChatSession>>
where
    C: ModelConfigSource,
    D: PromptDispatcher,
    K: ClipboardSink,
    W: Write + ?Sized,
{
    let source_text = buffer.selected_text().to_string();
    let mut session_id = assistant
        .run_action(&plan.action, &source_text)
        .context(AssistantSnafu {
            stage: "assist-run-action",
        })?;
    stream_answer(assistant, events_rx, &session_id, out).await?;

    for attempt in 1..=plan.reruns {
        tracing::info!(attempt, "re-running prompt");
        write_line(out, "")?;
        session_id = assistant.rerun().context(AssistantSnafu {
            stage: "assist-rerun",
        })?;
        stream_answer(assistant, events_rx, &session_id, out).await?;
    }

    let session = assistant
        .current_session()
        .context(SessionNotFoundSnafu {
            stage: "assist-current-session",
            session_id: session_id.clone(),
        })?;

    if let Some(turn) = session.latest_assistant_turn()
        && turn.status == TurnStatus::Error
    {
        return AnswerFailedSnafu {
            stage: "assist-check-answer",
            message: turn.display_text().to_string(),
        }
        .fail();
    }

    if let Some(action) = plan.apply {
        assistant
            .apply_response(buffer, action)
            .context(AssistantSnafu {
                stage: "assist-apply-response",
            })?;
        tracing::info!(?action, "applied answer");
    }

    Ok(session)
}

/// Folds events until `session_id` settles, writing new answer text as it lands.
pub(crate) async fn stream_answer<C, D, W>(
    assistant: &mut WritingAssistant<C, D>,
    events_rx: &mut mpsc::UnboundedReceiver<ChunkEvent>,
    session_id: &SessionId,
    out: &mut W,
) -> CliResult<()>
where
    C: ModelConfigSource,
    D: PromptDispatcher,
    W: Write + ?Sized,
{
    let mut printed = 0_usize;

    loop {
        if let Some(turn) = assistant
            .aggregator()
            .session(session_id)
            .and_then(|snapshot| snapshot.open_assistant_turn().cloned())
            && turn.content.len() > printed
        {
            write_text(out, &turn.content[printed..])?;
            printed = turn.content.len();
        }

        if assistant.aggregator().phase(session_id) != Some(StreamPhase::Streaming) {
            break;
        }

        let event = events_rx.recv().await.context(StreamClosedSnafu {
            stage: "stream-answer-recv",
            session_id: session_id.clone(),
        })?;
        let outcome = assistant.handle_event(&event);
        if outcome.is_discarded() {
            tracing::debug!(session_id = %event.session_id, "dropped event for a closed session");
        }
    }

    write_line(out, "")
}

async fn sessions(action: SessionsAction, database_path: &Path) -> CliResult<()> {
    let store = open_store(database_path).await?;
    let mut out = std::io::stdout();

    match action {
        SessionsAction::List => {
            let summaries = store.list_sessions().context(StorageSnafu {
                stage: "sessions-list",
            })?;
            for summary in summaries {
                write_line(
                    &mut out,
                    &format!(
                        "{}\t{}\t{} turns\t{}",
                        summary.id,
                        summary.updated_at_unix_seconds,
                        summary.turn_count,
                        summary.display_name
                    ),
                )?;
            }
        }
        SessionsAction::Show { id } => {
            let session_id = SessionId::new(id);
            let session = store
                .load_session(&session_id)
                .context(StorageSnafu {
                    stage: "sessions-show",
                })?
                .context(SessionNotFoundSnafu {
                    stage: "sessions-show",
                    session_id: session_id.clone(),
                })?;
            write_line(&mut out, &render_session(&session))?;
        }
        SessionsAction::Delete { id } => {
            let session_id = SessionId::new(id);
            match store.delete_session(&session_id) {
                Ok(()) => tracing::info!(session_id = %session_id, "deleted session"),
                Err(StorageError::NotFound { .. }) => {
                    return SessionNotFoundSnafu {
                        stage: "sessions-delete",
                        session_id,
                    }
                    .fail();
                }
                Err(source) => {
                    return Err(source).context(StorageSnafu {
                        stage: "sessions-delete",
                    });
                }
            }
        }
    }

    Ok(())
}

fn models(settings: &SettingsStore, set_default: Option<String>) -> CliResult<()> {
    if let Some(model_name) = set_default {
        let model_name = model_name.trim().to_string();
        let mut updated = (*settings.settings()).clone();
        ensure!(
            updated
                .models
                .iter()
                .any(|config| config.model_name == model_name),
            UnknownModelSnafu {
                stage: "models-set-default",
                model_name,
            }
        );
        updated.default_model = model_name;
        settings.update(updated).context(SettingsSnafu {
            stage: "models-set-default",
        })?;
    }

    let default_model = settings.default_model_name();
    let mut out = std::io::stdout();
    for config in settings.model_configs() {
        let marker = if config.model_name == default_model { "*" } else { " " };
        let key_state = if config.api_key.is_empty() { "no key" } else { "key set" };
        write_line(
            &mut out,
            &format!(
                "{marker} {}\t{}\t{}\t{key_state}",
                config.model_name,
                config.provider.as_str(),
                config.endpoint.as_deref().unwrap_or("default endpoint"),
            ),
        )?;
    }
    Ok(())
}

fn render_session(session: &ChatSession) -> String {
    let mut rendered = format!("# {} ({})", session.display_name(), session.id());
    for turn in session.turns() {
        let status = match turn.status {
            TurnStatus::Success => String::new(),
            status => format!(" [{}]", status.as_str()),
        };
        rendered.push_str(&format!(
            "\n\n{}{status}:\n{}",
            turn.role.as_str(),
            turn.display_text()
        ));
    }
    rendered
}

async fn open_store(database_path: &Path) -> CliResult<SqliteChatStore> {
    SqliteChatStore::open(&database_path.display().to_string())
        .await
        .context(StorageSnafu {
            stage: "open-session-store",
        })
}

async fn save_session(database_path: &Path, session: &ChatSession) -> CliResult<()> {
    let store = open_store(database_path).await?;
    let summary = store.save_session(session).context(StorageSnafu {
        stage: "save-session",
    })?;
    tracing::info!(
        session_id = %summary.id,
        turn_count = summary.turn_count,
        "saved session"
    );
    Ok(())
}

fn read_document(path: Option<&Path>) -> CliResult<String> {
    match path {
        Some(path) => std::fs::read_to_string(path).context(ReadDocumentSnafu {
            stage: "read-document-file",
            path: Some(path.to_path_buf()),
        }),
        None => {
            let mut document = String::new();
            std::io::stdin()
                .read_to_string(&mut document)
                .context(ReadDocumentSnafu {
                    stage: "read-document-stdin",
                    path: None::<PathBuf>,
                })?;
            Ok(document)
        }
    }
}

fn write_document(path: Option<&Path>, text: &str) -> CliResult<()> {
    match path {
        Some(path) => std::fs::write(path, text).context(WriteOutputSnafu {
            stage: "write-document-file",
            path: Some(path.to_path_buf()),
        }),
        None => write_text(&mut std::io::stdout(), text),
    }
}

fn write_text<W>(out: &mut W, text: &str) -> CliResult<()>
where
    W: Write + ?Sized,
{
    out.write_all(text.as_bytes())
        .and_then(|()| out.flush())
        .context(WriteOutputSnafu {
            stage: "write-output",
            path: None::<PathBuf>,
        })
}

fn write_line<W>(out: &mut W, text: &str) -> CliResult<()>
where
    W: Write + ?Sized,
{
    write_text(out, &format!("{text}\n"))
}
