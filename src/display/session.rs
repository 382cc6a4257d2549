//! Ownership of one virtual display for the lifetime of a process.
//!
//! `DisplaySession` holds the backend and the id it created. `terminate()`
//! removes the display and fires the close callback exactly once, no matter
//! how often it is called; `Drop` calls it too, so leaving the owning scope
//! (signal, error, normal exit) always tears the display down.

use crate::display::error::BackendError;
use crate::display::{DisplayRequest, VirtualDisplayBackend};

/// Invoked once after the display has been torn down.
pub type CloseCallback = Box<dyn FnOnce() + Send>;

pub struct DisplaySession {
    backend: Box<dyn VirtualDisplayBackend>,
    id: String,
    running: bool,
    on_closed: Option<CloseCallback>,
}

impl DisplaySession {
    /// Creates the display. Nothing is torn down or called back on failure.
    pub fn open(
        mut backend: Box<dyn VirtualDisplayBackend>,
        request: &DisplayRequest,
        on_closed: Option<CloseCallback>,
    ) -> Result<Self, BackendError> {
        if !backend.available() {
            return Err(BackendError::BackendUnavailable(format!(
                "{} backend is not available on this desktop",
                backend.kind()
            )));
        }
        let id = backend.create(request)?;
        log::info!("session: virtual display {id} created ({})", request.mode);
        Ok(Self {
            backend,
            id,
            running: true,
            on_closed,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[cfg(test)]
    pub fn backend_mut(&mut self) -> &mut dyn VirtualDisplayBackend {
        self.backend.as_mut()
    }

    /// Removes the display and runs the close callback. Idempotent.
    pub fn terminate(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        if self.backend.remove(&self.id) {
            log::info!("session: virtual display {} removed", self.id);
        } else {
            log::warn!("session: failed to remove virtual display {}", self.id);
        }
        if let Some(on_closed) = self.on_closed.take() {
            on_closed();
        }
    }
}

impl Drop for DisplaySession {
    fn drop(&mut self) {
        self.terminate();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
