//! The GUI-automation seam.
//!
//! The driver never touches the desktop directly; everything it needs
//! from the IDE goes through this trait, implemented by an external
//! automation collaborator in production and by [`ScriptedSurface`] in
//! tests and dry runs.

pub mod scripted;

use std::path::Path;

use async_trait::async_trait;

use crate::errors::GoadError;

pub use scripted::{ScriptedExchange, ScriptedSurface};

/// Outcome choices for the IDE's "save modifications?" dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAction {
    /// Commit the assistant's pending edits.
    Keep,
    /// Revert the assistant's pending edits.
    Undo,
}

/// What the send/stop button pair currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantActivity {
    /// Send button visible: the assistant is idle.
    Idle,
    /// Stop button visible: a response is being generated.
    Generating,
    /// Neither button detected.
    Unknown,
}

#[async_trait]
pub trait IdeSurface: Send + Sync {
    async fn open_project(&self, path: &Path) -> Result<(), GoadError>;

    async fn close_project(&self) -> Result<(), GoadError>;

    async fn focus_chat_input(&self) -> Result<(), GoadError>;

    async fn set_clipboard(&self, text: &str) -> Result<(), GoadError>;

    async fn read_clipboard(&self) -> Result<String, GoadError>;

    /// Select-all, paste the clipboard into the chat input, press Enter.
    async fn paste_and_send(&self) -> Result<(), GoadError>;

    async fn clear_input(&self) -> Result<(), GoadError>;

    async fn activity(&self) -> AssistantActivity;

    /// Click the copy-response affordance, putting the reply on the
    /// clipboard.
    async fn click_copy_response(&self) -> Result<(), GoadError>;

    /// Resolve the pending save dialog with keep or undo.
    async fn resolve_save_dialog(&self, action: SaveAction) -> Result<(), GoadError>;

    /// Re-select the most-recently-used model.
    async fn select_recent_model(&self) -> Result<(), GoadError>;

    /// Open a fresh conversation, clearing assistant memory.
    async fn open_new_conversation(&self) -> Result<(), GoadError>;

    async fn clear_notifications(&self) -> Result<(), GoadError>;
}
