/// What to do with a settled assistant answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditorAction {
    InsertAfterSelection,
    ReplaceSelection,
    CopyToClipboard,
}

impl EditorAction {
    /// Whether the action consumes the answer, closing the assistant session.
    pub fn closes_session(self) -> bool {
        matches!(self, Self::InsertAfterSelection | Self::ReplaceSelection)
    }
}

/// Editor surface that receives assistant output.
///
/// Implementations only ever receive the final text of the last answer,
/// never intermediate fragments.
pub trait EditorSurface {
    type Error: std::error::Error;

    fn insert_after_selection(&mut self, text: &str) -> Result<(), Self::Error>;
    fn replace_selection(&mut self, text: &str) -> Result<(), Self::Error>;
    fn copy_to_clipboard(&mut self, text: &str) -> Result<(), Self::Error>;
}

pub fn apply_to_editor<E>(editor: &mut E, action: EditorAction, text: &str) -> Result<(), E::Error>
where
    E: EditorSurface + ?Sized,
{
    match action {
        EditorAction::InsertAfterSelection => editor.insert_after_selection(text),
        EditorAction::ReplaceSelection => editor.replace_selection(text),
        EditorAction::CopyToClipboard => editor.copy_to_clipboard(text),
    }
}
