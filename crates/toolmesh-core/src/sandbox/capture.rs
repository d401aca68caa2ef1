use std::sync::{Arc, Mutex};

/// Shared stdout buffer for one session's sandbox.
///
/// The print hooks installed into the VM append here while the worker thread
/// runs; the executor reads it from the async side, including mid-run when an
/// execution times out. Reset at the start of every invocation.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<String>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, text: &str) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push_str(text);
    }

    pub fn contents(&self) -> String {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn reset(&self) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_between_invocations() {
        let capture = CaptureBuffer::new();
        capture.push("first\n");
        assert_eq!(capture.contents(), "first\n");
        capture.reset();
        capture.push("second\n");
        assert_eq!(capture.contents(), "second\n");
    }
}
