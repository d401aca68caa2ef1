pub mod config;
pub mod error;
pub mod provider;
pub mod sandbox;
pub mod session;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use config::BrokerConfig;
pub use error::{Error, Result};
pub use provider::{Endpoint, ProviderConnection, ToolManager};
pub use sandbox::{CodeExecutor, ExecutionOutcome, SandboxError};
pub use session::{Session, SessionManager, StreamEvent, StreamState, StreamType};
