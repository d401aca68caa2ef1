//! The session arena.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::config::StubConfig;
use crate::error::{Error, Result};
use crate::provider::ToolManager;
use crate::session::{Session, StreamEvent};

/// Owns every live session, keyed by session id.
///
/// Sessions are created lazily on first use and live until explicitly
/// deleted. The arena is the only owner; everything else holds short-lived
/// `Arc` clones.
pub struct SessionManager {
    tools: Arc<ToolManager>,
    stubs: StubConfig,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(tools: Arc<ToolManager>, stubs: StubConfig) -> Self {
        Self {
            tools,
            stubs,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Fetch a session, building its execution context on first use. Stubs
    /// reflect the registry's tools at creation time.
    pub async fn get_or_create(&self, session_id: &str) -> Result<Arc<Session>> {
        if let Some(session) = self.get(session_id).await {
            return Ok(session);
        }

        let tools = self.tools.get_tools().await;
        let mut sessions = self.sessions.write().await;
        // Another caller may have won the race while we built the tool list.
        if let Some(session) = sessions.get(session_id) {
            return Ok(Arc::clone(session));
        }

        let session = Session::new(
            session_id.to_string(),
            &self.tools,
            tools,
            &self.stubs,
            tokio::runtime::Handle::current(),
        )
        .map_err(|e| Error::configuration(format!("failed to build session context: {e}")))?;
        let session = Arc::new(session);
        sessions.insert(session_id.to_string(), Arc::clone(&session));
        info!(session_id, "session created");
        Ok(session)
    }

    /// Drop a session's context, queue, and variables. Returns false when the
    /// session never existed.
    pub async fn remove(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            info!(session_id, "session deleted");
        }
        removed
    }

    /// Inject an externally produced event into a session's stream, creating
    /// the session if needed.
    pub async fn post_item(&self, session_id: &str, item: StreamEvent) -> Result<()> {
        let session = self.get_or_create(session_id).await?;
        session.emit(item);
        Ok(())
    }
}
