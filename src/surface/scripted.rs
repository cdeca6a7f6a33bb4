//! In-memory IDE surface simulating the assistant for tests and dry
//! runs: scripted replies, real file edits with keep/undo semantics.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::GoadError;

use super::{AssistantActivity, IdeSurface, SaveAction};

/// An edit the simulated assistant applies to the project tree when the
/// scripted exchange fires.
#[derive(Debug, Clone)]
pub struct FileEdit {
    pub path: PathBuf,
    pub content: String,
}

/// One prompt/response exchange of the script.
#[derive(Debug, Clone)]
pub struct ScriptedExchange {
    pub reply: String,
    pub edit: Option<FileEdit>,
}

impl ScriptedExchange {
    pub fn reply(text: &str) -> Self {
        Self { reply: text.to_string(), edit: None }
    }

    pub fn reply_with_edit(text: &str, path: &Path, content: &str) -> Self {
        Self {
            reply: text.to_string(),
            edit: Some(FileEdit { path: path.to_path_buf(), content: content.to_string() }),
        }
    }
}

#[derive(Default)]
struct SurfaceState {
    clipboard: String,
    script: VecDeque<ScriptedExchange>,
    last_reply: String,
    sent_prompts: Vec<String>,
    /// Previous file contents for undo; None means the file was created.
    pending_edits: Vec<(PathBuf, Option<String>)>,
    open_project: Option<PathBuf>,
}

/// A deterministic stand-in for the GUI automation collaborator.
pub struct ScriptedSurface {
    state: Mutex<SurfaceState>,
    /// Reply used when the script runs dry.
    fallback_reply: String,
}

impl ScriptedSurface {
    pub fn new(script: Vec<ScriptedExchange>) -> Self {
        Self {
            state: Mutex::new(SurfaceState { script: script.into(), ..Default::default() }),
            fallback_reply: "已完成回答".to_string(),
        }
    }

    /// A surface that answers every prompt with a bare completion
    /// marker and never edits files — the dry-run driver.
    pub fn echoing() -> Self {
        Self::new(Vec::new())
    }

    pub async fn push_exchange(&self, exchange: ScriptedExchange) {
        self.state.lock().await.script.push_back(exchange);
    }

    pub async fn sent_prompts(&self) -> Vec<String> {
        self.state.lock().await.sent_prompts.clone()
    }

    pub async fn pending_edit_count(&self) -> usize {
        self.state.lock().await.pending_edits.len()
    }
}

#[async_trait]
impl IdeSurface for ScriptedSurface {
    async fn open_project(&self, path: &Path) -> Result<(), GoadError> {
        self.state.lock().await.open_project = Some(path.to_path_buf());
        Ok(())
    }

    async fn close_project(&self) -> Result<(), GoadError> {
        self.state.lock().await.open_project = None;
        Ok(())
    }

    async fn focus_chat_input(&self) -> Result<(), GoadError> {
        Ok(())
    }

    async fn set_clipboard(&self, text: &str) -> Result<(), GoadError> {
        self.state.lock().await.clipboard = text.to_string();
        Ok(())
    }

    async fn read_clipboard(&self) -> Result<String, GoadError> {
        Ok(self.state.lock().await.clipboard.clone())
    }

    async fn paste_and_send(&self) -> Result<(), GoadError> {
        let mut state = self.state.lock().await;
        let prompt = state.clipboard.clone();
        state.sent_prompts.push(prompt);

        let exchange = state
            .script
            .pop_front()
            .unwrap_or_else(|| ScriptedExchange::reply(&self.fallback_reply));

        if let Some(edit) = &exchange.edit {
            let previous = std::fs::read_to_string(&edit.path).ok();
            if let Some(parent) = edit.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&edit.path, &edit.content)?;
            debug!(path = %edit.path.display(), "Scripted edit applied");
            state.pending_edits.push((edit.path.clone(), previous));
        }
        state.last_reply = exchange.reply;
        Ok(())
    }

    async fn clear_input(&self) -> Result<(), GoadError> {
        Ok(())
    }

    async fn activity(&self) -> AssistantActivity {
        AssistantActivity::Idle
    }

    async fn click_copy_response(&self) -> Result<(), GoadError> {
        let mut state = self.state.lock().await;
        state.clipboard = state.last_reply.clone();
        Ok(())
    }

    async fn resolve_save_dialog(&self, action: SaveAction) -> Result<(), GoadError> {
        let mut state = self.state.lock().await;
        let edits = std::mem::take(&mut state.pending_edits);
        if action == SaveAction::Undo {
            // Restore in reverse so stacked edits to one file unwind.
            for (path, previous) in edits.into_iter().rev() {
                match previous {
                    Some(content) => std::fs::write(&path, content)?,
                    None => {
                        let _ = std::fs::remove_file(&path);
                    }
                }
            }
        }
        Ok(())
    }

    async fn select_recent_model(&self) -> Result<(), GoadError> {
        Ok(())
    }

    async fn open_new_conversation(&self) -> Result<(), GoadError> {
        Ok(())
    }

    async fn clear_notifications(&self) -> Result<(), GoadError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_reply_lands_on_clipboard() {
        let surface = ScriptedSurface::new(vec![ScriptedExchange::reply("hello\n已完成回答")]);
        surface.set_clipboard("prompt").await.unwrap();
        surface.paste_and_send().await.unwrap();
        surface.click_copy_response().await.unwrap();
        assert_eq!(surface.read_clipboard().await.unwrap(), "hello\n已完成回答");
        assert_eq!(surface.sent_prompts().await, vec!["prompt"]);
    }

    #[tokio::test]
    async fn test_keep_commits_and_undo_reverts() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.py");
        std::fs::write(&file, "original\n").unwrap();

        let surface = ScriptedSurface::new(vec![
            ScriptedExchange::reply_with_edit("r1", &file, "edited once\n"),
            ScriptedExchange::reply_with_edit("r2", &file, "edited twice\n"),
        ]);

        surface.paste_and_send().await.unwrap();
        surface.resolve_save_dialog(SaveAction::Keep).await.unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "edited once\n");

        surface.paste_and_send().await.unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "edited twice\n");
        surface.resolve_save_dialog(SaveAction::Undo).await.unwrap();
        // Undo restores the kept phase-1 state, not the pristine file.
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "edited once\n");
    }

    #[tokio::test]
    async fn test_echoing_surface_always_completes() {
        let surface = ScriptedSurface::echoing();
        surface.set_clipboard("anything").await.unwrap();
        surface.paste_and_send().await.unwrap();
        surface.click_copy_response().await.unwrap();
        assert!(!crate::response::is_incomplete(&surface.read_clipboard().await.unwrap()));
    }
}
