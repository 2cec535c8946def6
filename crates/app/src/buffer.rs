use std::ops::Range;

use arboard::Clipboard;
use quill_chat::EditorSurface;
use snafu::{ResultExt, Snafu, ensure};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BufferError {
    #[snafu(display("selection '{raw}' is not START..END"))]
    MalformedSelection { stage: &'static str, raw: String },
    #[snafu(display("selection {start}..{end} does not fit a {len}-byte document"))]
    SelectionOutOfBounds {
        stage: &'static str,
        start: usize,
        end: usize,
        len: usize,
    },
    #[snafu(display("clipboard unavailable on `{stage}`: {source}"))]
    Clipboard {
        stage: &'static str,
        source: arboard::Error,
    },
}

pub type BufferResult<T> = Result<T, BufferError>;

/// Destination for copied answers.
pub trait ClipboardSink {
    fn set_text(&mut self, text: &str) -> BufferResult<()>;
}

/// The desktop clipboard, opened lazily on first copy.
#[derive(Default)]
pub struct SystemClipboard {
    clipboard: Option<Clipboard>,
}

impl ClipboardSink for SystemClipboard {
    fn set_text(&mut self, text: &str) -> BufferResult<()> {
        let clipboard = match self.clipboard.take() {
            Some(clipboard) => clipboard,
            None => Clipboard::new().context(ClipboardSnafu {
                stage: "clipboard-open",
            })?,
        };
        let clipboard = self.clipboard.insert(clipboard);
        clipboard.set_text(text).context(ClipboardSnafu {
            stage: "clipboard-set-text",
        })
    }
}

/// A plain-text document with one selection, standing in for a rich editor.
pub struct TextBuffer<K = SystemClipboard> {
    text: String,
    selection: Range<usize>,
    clipboard: K,
}

impl<K> TextBuffer<K>
where
    K: ClipboardSink,
{
    /// Opens `text` with the whole document selected.
    pub fn new(text: String, clipboard: K) -> Self {
        let selection = 0..text.len();
        Self {
            text,
            selection,
            clipboard,
        }
    }

    pub fn with_selection(mut self, selection: Range<usize>) -> BufferResult<Self> {
        let len = self.text.len();
        ensure!(
            selection.start <= selection.end
                && selection.end <= len
                && self.text.is_char_boundary(selection.start)
                && self.text.is_char_boundary(selection.end),
            SelectionOutOfBoundsSnafu {
                stage: "buffer-select",
                start: selection.start,
                end: selection.end,
                len,
            }
        );
        self.selection = selection;
        Ok(self)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn selection(&self) -> Range<usize> {
        self.selection.clone()
    }

    pub fn selected_text(&self) -> &str {
        &self.text[self.selection.clone()]
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl<K> EditorSurface for TextBuffer<K>
where
    K: ClipboardSink,
{
    type Error = BufferError;

    /// Inserts the answer on a new line right after the selection and selects it.
    fn insert_after_selection(&mut self, text: &str) -> BufferResult<()> {
        let at = self.selection.end;
        let inserted = format!("\n{text}");
        self.text.insert_str(at, &inserted);
        self.selection = at + 1..at + inserted.len();
        Ok(())
    }

    fn replace_selection(&mut self, text: &str) -> BufferResult<()> {
        let start = self.selection.start;
        self.text.replace_range(self.selection.clone(), text);
        self.selection = start..start + text.len();
        Ok(())
    }

    fn copy_to_clipboard(&mut self, text: &str) -> BufferResult<()> {
        self.clipboard.set_text(text)
    }
}

/// Parses `START..END` byte offsets.
pub fn parse_selection(raw: &str) -> BufferResult<Range<usize>> {
    let malformed = || MalformedSelectionSnafu {
        stage: "parse-selection",
        raw: raw.to_string(),
    };

    let (start, end) = raw.trim().split_once("..").ok_or_else(|| malformed().build())?;
    let start = start.trim().parse::<usize>().map_err(|_| malformed().build())?;
    let end = end.trim().parse::<usize>().map_err(|_| malformed().build())?;
    Ok(start..end)
}
