use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use quill_chat::{EditorAction, PromptAction};

#[derive(Debug, Parser)]
#[command(name = "quill")]
#[command(about = "Streaming writing assistant for highlighted text", long_about = None)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file to read instead of the per-user one.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// SQLite database holding saved sessions.
    #[arg(long, global = true, value_name = "PATH")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a writing action over a document selection and stream the answer
    Assist(AssistArgs),
    /// Inspect saved sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
    /// List configured models
    Models {
        /// Make this configured model the default and save the settings.
        #[arg(long, value_name = "NAME")]
        set_default: Option<String>,
    },
}

#[derive(Debug, clap::Args)]
pub struct AssistArgs {
    #[arg(short, long, value_enum)]
    pub action: ActionKind,

    /// Instruction for the custom action.
    #[arg(short, long, required_if_eq("action", "custom"))]
    pub instruction: Option<String>,

    /// Document to read; stdin when omitted.
    #[arg(short, long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Byte range of the highlighted text, START..END. Defaults to the whole document.
    #[arg(short, long, value_name = "START..END")]
    pub selection: Option<String>,

    /// What to do with the final answer.
    #[arg(long, value_enum)]
    pub apply: Option<ApplyKind>,

    /// Re-run the same prompt this many extra times before applying.
    #[arg(long, default_value_t = 0)]
    pub rerun: u32,

    /// Model to use instead of the configured default.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Skip saving the session.
    #[arg(long)]
    pub no_save: bool,
}

#[derive(Debug, Subcommand)]
pub enum SessionsAction {
    /// List saved sessions, newest first
    List,
    /// Print every turn of one session
    Show { id: String },
    /// Delete one session
    Delete { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActionKind {
    Simplify,
    CopyEdit,
    Takeaways,
    Custom,
}

impl ActionKind {
    pub fn into_prompt_action(self, instruction: Option<String>) -> PromptAction {
        match self {
            Self::Simplify => PromptAction::Simplify,
            Self::CopyEdit => PromptAction::CopyEdit,
            Self::Takeaways => PromptAction::Takeaways,
            Self::Custom => PromptAction::Custom(instruction.unwrap_or_default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ApplyKind {
    Insert,
    Replace,
    Copy,
}

impl From<ApplyKind> for EditorAction {
    fn from(kind: ApplyKind) -> Self {
        match kind {
            ApplyKind::Insert => Self::InsertAfterSelection,
            ApplyKind::Replace => Self::ReplaceSelection,
            ApplyKind::Copy => Self::CopyToClipboard,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_assist_with_custom_instruction() {
        let cli = Cli::try_parse_from([
            "quill",
            "assist",
            "--action",
            "custom",
            "--instruction",
            "Make it formal",
            "--selection",
            "0..12",
            "--apply",
            "replace",
        ])
        .expect("arguments parse");

        let Commands::Assist(args) = cli.command else {
            panic!("expected assist command");
        };
        assert_eq!(
            args.action.into_prompt_action(args.instruction),
            PromptAction::Custom("Make it formal".to_string())
        );
        assert_eq!(args.apply.map(EditorAction::from), Some(EditorAction::ReplaceSelection));
    }

    #[test]
    fn custom_action_requires_an_instruction() {
        assert!(Cli::try_parse_from(["quill", "assist", "--action", "custom"]).is_err());
    }

    #[test]
    fn copy_edit_uses_kebab_case() {
        let cli = Cli::try_parse_from(["quill", "-v", "assist", "-a", "copy-edit"])
            .expect("arguments parse");

        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Assist(AssistArgs {
                action: ActionKind::CopyEdit,
                ..
            })
        ));
    }
}
