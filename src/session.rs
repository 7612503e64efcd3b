use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Research,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Normal, Mode::Research];
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Normal => write!(f, "Normal"),
            Mode::Research => write!(f, "Research"),
        }
    }
}

/// A file held in memory for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub bytes: Arc<[u8]>,
    pub media_type: String,
}

impl Attachment {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>, media_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            media_type: media_type.into(),
        }
    }

    /// Read a file into memory, guessing its media type from the extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let media_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self::new(name, bytes, media_type))
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

/// One message in the chat log. Fields are private so a turn cannot change
/// after it has been appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    sender: Sender,
    message: String,
    attachments: Vec<Attachment>,
    mode: Mode,
}

impl ChatTurn {
    pub fn user(message: impl Into<String>, mode: Mode, attachments: Vec<Attachment>) -> Self {
        Self {
            sender: Sender::User,
            message: message.into(),
            attachments,
            mode,
        }
    }

    pub fn assistant(message: impl Into<String>, mode: Mode, attachments: Vec<Attachment>) -> Self {
        Self {
            sender: Sender::Assistant,
            message: message.into(),
            attachments,
            mode,
        }
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

/// Chat state for one UI session. Nothing here outlives the window.
#[derive(Debug, Default)]
pub struct SessionState {
    history: Vec<ChatTurn>,
    pending_attachments: Vec<Attachment>,
    mode: Mode,
    // Indices of user turns whose model call failed.
    failed: BTreeSet<usize>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn and returns its index in the history.
    pub fn append(&mut self, turn: ChatTurn) -> usize {
        self.history.push(turn);
        self.history.len() - 1
    }

    /// Replaces whatever was staged before.
    pub fn stage(&mut self, files: Vec<Attachment>) {
        self.pending_attachments = files;
    }

    pub fn consume_attachments(&mut self) -> Vec<Attachment> {
        std::mem::take(&mut self.pending_attachments)
    }

    pub fn clear_staged(&mut self) {
        self.pending_attachments.clear();
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn pending_attachments(&self) -> &[Attachment] {
        &self.pending_attachments
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub(crate) fn mark_failed(&mut self, index: usize) {
        if index < self.history.len() {
            self.failed.insert(index);
        }
    }

    pub fn is_failed(&self, index: usize) -> bool {
        self.failed.contains(&index)
    }
}
