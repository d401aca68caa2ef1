//! Runs session code on the blocking worker pool under a wall-clock limit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::SandboxConfig;
use crate::error::Result;
use crate::session::{SessionManager, StreamEvent, StreamState};

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("CodeCompileError: {0}")]
    Compile(String),

    #[error("CodeRuntimeError: {0}")]
    Runtime(String),

    #[error("CodeTimeoutError: execution exceeded {limit_secs}s")]
    Timeout { limit_secs: u64 },

    #[error("execution pool unavailable: {0}")]
    Pool(String),
}

/// Outcome of one code submission. Compile, runtime, and timeout failures
/// land in `error` rather than failing the call; only infrastructure faults
/// do that.
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Captured print output, possibly partial after a timeout.
    pub output: String,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl ExecutionOutcome {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Executes code inside session contexts.
///
/// Admission is capped by a semaphore whose permits travel with the worker,
/// so a timed-out execution still counts against the cap until its worker
/// actually finishes.
pub struct CodeExecutor {
    sessions: Arc<SessionManager>,
    admission: Arc<Semaphore>,
    default_timeout: Duration,
}

impl CodeExecutor {
    pub fn new(sessions: Arc<SessionManager>, config: &SandboxConfig) -> Self {
        Self {
            sessions,
            admission: Arc::new(Semaphore::new(config.max_concurrent)),
            default_timeout: Duration::from_secs(config.default_timeout_secs),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Run `code` inside the session's context and wait for the outcome.
    ///
    /// Every invocation emits the start / result / end event triad on the
    /// session stream, whether it succeeds, fails, or times out. On timeout
    /// the caller gets the outcome immediately while the worker may run to
    /// completion in the background; the VM stays locked until it does.
    pub async fn execute(
        &self,
        code: &str,
        session_id: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionOutcome> {
        let session = self.sessions.get_or_create(session_id).await?;
        let permit = Arc::clone(&self.admission)
            .acquire_owned()
            .await
            .map_err(|e| SandboxError::Pool(e.to_string()))?;

        let limit = timeout.unwrap_or(self.default_timeout);
        let code = normalize(code);

        session.emit(StreamEvent::tool_result("", "", StreamState::Start));

        let started = Instant::now();
        let worker_session = Arc::clone(&session);
        let worker = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let lua = match worker_session.lua().lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            // Reset under the VM lock, so late output from a timed-out
            // predecessor cannot bleed into this run's capture.
            worker_session.capture().reset();
            let chunk = lua
                .load(&code)
                .set_name("session")
                .into_function()
                .map_err(|e| SandboxError::Compile(e.to_string()))?;
            chunk
                .call::<()>(())
                .map_err(|e| SandboxError::Runtime(e.to_string()))
        });

        let error = match tokio::time::timeout(limit, worker).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(sandbox_err))) => Some(sandbox_err.to_string()),
            Ok(Err(join_err)) => Some(SandboxError::Runtime(join_err.to_string()).to_string()),
            Err(_) => {
                warn!(session_id, limit_secs = limit.as_secs(), "execution timed out");
                Some(
                    SandboxError::Timeout {
                        limit_secs: limit.as_secs(),
                    }
                    .to_string(),
                )
            }
        };
        let elapsed = started.elapsed();

        let output = session.capture().contents();
        let result_content = error.clone().unwrap_or_else(|| output.clone());
        session.emit(StreamEvent::code_result(result_content, StreamState::Running));
        session.emit(StreamEvent::tool_result("", "", StreamState::End));

        debug!(
            session_id,
            elapsed_ms = elapsed.as_millis() as u64,
            failed = error.is_some(),
            "execution finished"
        );
        Ok(ExecutionOutcome {
            output,
            error,
            elapsed,
        })
    }
}

/// Strip the invisible characters that commonly leak into pasted code.
fn normalize(code: &str) -> String {
    code.chars()
        .filter_map(|c| match c {
            '\u{00a0}' => Some(' '),
            '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{feff}' => None,
            other => Some(other),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_replaces_nbsp_and_strips_zero_width() {
        let code = "print(\u{00a0}1\u{200b} +\u{feff} 1)";
        assert_eq!(normalize(code), "print( 1 + 1)");
    }
}
