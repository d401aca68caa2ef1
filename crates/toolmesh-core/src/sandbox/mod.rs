//! Sandboxed code execution.

mod capture;
mod env;
mod executor;

pub use capture::CaptureBuffer;
pub(crate) use env::install as install_env;
pub use executor::{CodeExecutor, ExecutionOutcome, SandboxError};
