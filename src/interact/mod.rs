//! The per-line prompt/response contract.
//!
//! Single-threaded, blocking, cooperative: every GUI action is a
//! synchronous step with settling delays, and every wait polls the
//! cancellation token at one-second granularity.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::retry::wait_for_retry;
use crate::errors::GoadError;
use crate::response;
use crate::surface::{AssistantActivity, IdeSurface};

const CLIPBOARD_VERIFY_ATTEMPTS: u32 = 3;

/// Idle-detection polling parameters.
#[derive(Debug, Clone)]
pub struct SmartWait {
    pub enabled: bool,
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for SmartWait {
    fn default() -> Self {
        Self { enabled: true, max_attempts: 30, interval: Duration::from_secs(2) }
    }
}

pub struct AssistantSession {
    surface: Arc<dyn IdeSurface>,
    cancel: CancellationToken,
    /// Guards the system clipboard within this process.
    clipboard_lock: Mutex<()>,
    max_retries_per_line: u32,
    smart_wait: SmartWait,
    /// Fallback response wait when idle detection is disabled.
    fixed_wait: Duration,
    settle: Duration,
    /// Tests disable the real backoff sleeps; attempt accounting stays.
    backoff_enabled: bool,
}

impl AssistantSession {
    pub fn new(surface: Arc<dyn IdeSurface>, cancel: CancellationToken) -> Self {
        Self {
            surface,
            cancel,
            clipboard_lock: Mutex::new(()),
            max_retries_per_line: 10,
            smart_wait: SmartWait::default(),
            fixed_wait: Duration::from_secs(10),
            settle: Duration::from_millis(500),
            backoff_enabled: true,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries_per_line = max_retries;
        self
    }

    pub fn with_smart_wait(mut self, smart_wait: SmartWait) -> Self {
        self.smart_wait = smart_wait;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn without_backoff(mut self) -> Self {
        self.backoff_enabled = false;
        self
    }

    pub fn surface(&self) -> Arc<dyn IdeSurface> {
        self.surface.clone()
    }

    /// Run the full per-line contract: send, wait, capture, validate.
    /// Returns None when the retry ceiling is reached; the caller marks
    /// the line failed and moves on.
    pub async fn exchange(
        &self,
        prompt: &str,
        round: u32,
        line: usize,
    ) -> Result<Option<String>, GoadError> {
        for attempt in 0..self.max_retries_per_line {
            if self.cancel.is_cancelled() {
                return Err(GoadError::Interrupted);
            }
            if attempt > 0 {
                info!(round, line, attempt = attempt + 1, max = self.max_retries_per_line, "Retrying prompt line");
            }

            let result = self.try_exchange(prompt).await;
            match result {
                Ok(reply) => {
                    if response::is_incomplete(&reply) {
                        warn!(round, line, attempt = attempt + 1, "Response incomplete");
                        self.surface.clear_input().await?;
                        self.backoff(attempt, round, line).await?;
                        continue;
                    }
                    if response::is_refusal(&reply) {
                        info!(round, line, "Assistant refused — treated as terminal response");
                    }
                    return Ok(Some(reply));
                }
                Err(e) => {
                    if !e.classify().retryable {
                        return Err(e);
                    }
                    warn!(round, line, attempt = attempt + 1, error = %e, "Exchange failed — retrying");
                    self.backoff(attempt, round, line).await?;
                }
            }
        }
        warn!(
            round,
            line,
            max = self.max_retries_per_line,
            "Retry ceiling reached — abandoning line"
        );
        Ok(None)
    }

    async fn try_exchange(&self, prompt: &str) -> Result<String, GoadError> {
        self.surface.focus_chat_input().await?;
        self.copy_to_clipboard_verified(prompt).await?;
        self.surface.paste_and_send().await?;
        self.sleep_cancellable(self.settle).await?;

        self.wait_for_response().await?;

        self.surface.click_copy_response().await?;
        self.sleep_cancellable(self.settle).await?;
        let reply = self.surface.read_clipboard().await?;
        self.surface.focus_chat_input().await?;
        Ok(reply)
    }

    /// Clipboard write with paste-back verification, retried up to
    /// three times. The in-process lock pairs every write with its
    /// read-back before anyone else touches the clipboard.
    async fn copy_to_clipboard_verified(&self, text: &str) -> Result<(), GoadError> {
        let _guard = self.clipboard_lock.lock().await;
        for attempt in 1..=CLIPBOARD_VERIFY_ATTEMPTS {
            self.surface.set_clipboard(text).await?;
            let read_back = self.surface.read_clipboard().await?;
            if read_back == text {
                return Ok(());
            }
            warn!(attempt, "Clipboard verification mismatch");
            self.sleep_cancellable(Duration::from_millis(200)).await?;
        }
        Err(GoadError::Clipboard(format!(
            "Clipboard content mismatch after {} attempts",
            CLIPBOARD_VERIFY_ATTEMPTS
        )))
    }

    async fn wait_for_response(&self) -> Result<(), GoadError> {
        if !self.smart_wait.enabled {
            return self.sleep_cancellable(self.fixed_wait).await;
        }
        let mut seen_generating = false;
        for _ in 0..self.smart_wait.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(GoadError::Interrupted);
            }
            match self.surface.activity().await {
                AssistantActivity::Idle => {
                    debug!(seen_generating, "Assistant idle");
                    return Ok(());
                }
                AssistantActivity::Generating => {
                    seen_generating = true;
                }
                AssistantActivity::Unknown => {}
            }
            self.sleep_cancellable(self.smart_wait.interval).await?;
        }
        Err(GoadError::Timeout("Assistant never became idle".into()))
    }

    async fn backoff(&self, attempt: u32, round: u32, line: usize) -> Result<(), GoadError> {
        if self.backoff_enabled {
            wait_for_retry(attempt, round, line, &self.cancel).await
        } else if self.cancel.is_cancelled() {
            Err(GoadError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep in ≤1 s slices so a user interrupt unwinds promptly.
    async fn sleep_cancellable(&self, duration: Duration) -> Result<(), GoadError> {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.cancel.is_cancelled() {
                return Err(GoadError::Interrupted);
            }
            let slice = remaining.min(Duration::from_secs(1));
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
        Ok(())
    }
}

/// Persist one captured response as a Markdown artifact. All of a
/// line's artifacts are flushed before the next line begins.
pub fn save_response(path: &Path, response: &str) -> Result<(), GoadError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, response)?;
    debug!(path = %path.display(), bytes = response.len(), "Response saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{ScriptedExchange, ScriptedSurface};

    fn session(surface: ScriptedSurface) -> AssistantSession {
        AssistantSession::new(Arc::new(surface), CancellationToken::new())
            .with_settle(Duration::from_millis(1))
            .without_backoff()
    }

    #[tokio::test]
    async fn test_complete_response_returned_first_try() {
        let surface = ScriptedSurface::new(vec![ScriptedExchange::reply(
            "```python\ndef f(x):\n    y = x * 2\n    # double and clamp the accumulator value\n    return min(y, 100)\n```",
        )]);
        let session = session(surface);
        let reply = session.exchange("implement f", 1, 1).await.unwrap();
        assert!(reply.is_some());
    }

    #[tokio::test]
    async fn test_incomplete_then_complete_retries() {
        let surface = ScriptedSurface::new(vec![
            ScriptedExchange::reply("```python\ndef f():\n"),
            ScriptedExchange::reply("已完成回答"),
        ]);
        let session = session(surface);
        let reply = session.exchange("implement f", 1, 1).await.unwrap();
        assert_eq!(reply.as_deref(), Some("已完成回答"));
    }

    #[tokio::test]
    async fn test_retry_ceiling_abandons_line() {
        let mut script = Vec::new();
        for _ in 0..12 {
            script.push(ScriptedExchange::reply("```python\ndef f():\n"));
        }
        let surface = ScriptedSurface::new(script);
        let session = session(surface).with_max_retries(10);
        let reply = session.exchange("implement f", 1, 1).await.unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_refusal_is_terminal_and_saved() {
        let surface =
            ScriptedSurface::new(vec![ScriptedExchange::reply("Sorry, I can't assist with that.")]);
        let session = session(surface);
        let reply = session.exchange("do something bad", 1, 1).await.unwrap().unwrap();
        assert!(response::is_refusal(&reply));
    }

    #[tokio::test]
    async fn test_cancellation_unwinds() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let session = AssistantSession::new(Arc::new(ScriptedSurface::echoing()), cancel)
            .with_settle(Duration::from_millis(1));
        let err = session.exchange("prompt", 1, 1).await.unwrap_err();
        assert!(matches!(err, GoadError::Interrupted));
    }

    #[tokio::test]
    async fn test_save_response_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("第1輪/第1道/x_第1行.md");
        save_response(&path, "body").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "body");
    }
}
