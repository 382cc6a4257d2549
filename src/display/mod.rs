//! Virtual display backend abstraction.
//!
//! Defines the `VirtualDisplayBackend` trait and the types shared by every
//! backend. Concrete backends live in child modules:
//!
//! - `xr_manager`: virtual-connector property protocol on the XR-Manager output.
//! - `modeline`: synthesized mode attached to a pre-existing VIRTUAL output.
//! - `session_service`: display-manager service on the session bus.
//!
//! The backend is chosen once at startup from configuration
//! (`create_backend`); calling code only ever sees the trait.
//!
//! Backends are single-owner: the record map is mutated through `&mut self`
//! with no internal locking, so share one across threads only behind a mutex.

pub mod error;
pub mod modeline;
pub mod session;
pub mod session_service;
mod verify;
pub mod xr_manager;
pub mod xrandr;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::config::Config;
use error::BackendError;
use modeline::LegacyModelineBackend;
use session_service::SessionServiceBackend;
use xr_manager::XrManagerBackend;
use xrandr::{ModelineGenerator, SystemRunner, XrandrClient, MAX_REFRESH_RATE, MIN_REFRESH_RATE};

// ---------------------------------------------------------------------------
// Backend kind
// ---------------------------------------------------------------------------

/// Which mechanism a backend drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// XR-Manager virtual-connector property protocol.
    #[default]
    XrManager,
    /// Generated modeline on a pre-existing VIRTUAL output.
    LegacyModeline,
    /// Session-bus display-manager service.
    SessionService,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::XrManager => "xr-manager",
            BackendKind::LegacyModeline => "legacy-modeline",
            BackendKind::SessionService => "session-service",
        })
    }
}

// ---------------------------------------------------------------------------
// Requests and records
// ---------------------------------------------------------------------------

/// Geometry and primary refresh rate of a display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}Hz", self.width, self.height, self.framerate)
    }
}

/// Parameters for `VirtualDisplayBackend::create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayRequest {
    pub mode: DisplayMode,
    /// Requested output name. The XR-Manager backend uses it verbatim.
    pub name: String,
    /// Explicit refresh rates. `None` derives them from the headset connector.
    pub refresh_rates: Option<Vec<u32>>,
    /// Headset connector to query for rates. `None` auto-detects.
    pub physical_connector: Option<String>,
}

/// Default virtual output name.
pub const DEFAULT_OUTPUT_NAME: &str = "XR-0";

impl DisplayRequest {
    pub fn new(width: u32, height: u32, framerate: u32) -> Self {
        Self {
            mode: DisplayMode {
                width,
                height,
                framerate,
            },
            name: DEFAULT_OUTPUT_NAME.into(),
            refresh_rates: None,
            physical_connector: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_refresh_rates(mut self, rates: Vec<u32>) -> Self {
        self.refresh_rates = Some(rates);
        self
    }

    pub fn with_physical_connector(mut self, connector: impl Into<String>) -> Self {
        self.physical_connector = Some(connector.into());
        self
    }

    /// Rejects zero dimensions, framerates outside 1..=1000 Hz and names the
    /// property protocol cannot carry.
    pub fn validate(&self) -> Result<(), BackendError> {
        let DisplayMode {
            width,
            height,
            framerate,
        } = self.mode;
        if width == 0 || height == 0 {
            return Err(BackendError::InvalidRequest(format!(
                "geometry must be non-zero, got {}",
                self.mode
            )));
        }
        if !(MIN_REFRESH_RATE..=MAX_REFRESH_RATE).contains(&framerate) {
            return Err(BackendError::InvalidRequest(format!(
                "framerate must be within {MIN_REFRESH_RATE}..={MAX_REFRESH_RATE} Hz, got {framerate}"
            )));
        }
        if self.name.is_empty() || self.name.contains([':', '|']) || self.name.contains(char::is_whitespace) {
            return Err(BackendError::InvalidRequest(format!(
                "output name {:?} must be non-empty without ':', '|' or whitespace",
                self.name
            )));
        }
        Ok(())
    }
}

/// Surface the session service renders a display into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceHandle {
    pub id: u64,
    pub kind: SurfaceKind,
}

/// Surface type codes reported by the session service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Pixmap,
    DmaBuf,
    PipeWire,
    Other(u32),
}

impl From<u32> for SurfaceKind {
    fn from(code: u32) -> Self {
        match code {
            1 => SurfaceKind::Pixmap,
            2 => SurfaceKind::DmaBuf,
            3 => SurfaceKind::PipeWire,
            other => SurfaceKind::Other(other),
        }
    }
}

/// A virtual display as known to a backend.
///
/// Records for outputs the backend did not create itself carry only `id`:
/// `mode` is `None` and `refresh_rates` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDisplayRecord {
    /// Output name (or service-assigned id) used by the windowing system.
    pub id: String,
    pub mode: Option<DisplayMode>,
    /// Ascending, deduplicated; includes the primary framerate when tracked.
    pub refresh_rates: Vec<u32>,
    pub backend: BackendKind,
    pub surface: Option<SurfaceHandle>,
}

impl VirtualDisplayRecord {
    pub fn tracked(id: impl Into<String>, mode: DisplayMode, refresh_rates: Vec<u32>, backend: BackendKind) -> Self {
        Self {
            id: id.into(),
            mode: Some(mode),
            refresh_rates,
            backend,
            surface: None,
        }
    }

    pub fn untracked(id: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            id: id.into(),
            mode: None,
            refresh_rates: Vec::new(),
            backend,
            surface: None,
        }
    }
}

impl fmt::Display for VirtualDisplayRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        match &self.mode {
            Some(mode) => write!(f, " {mode}")?,
            None => f.write_str(" (untracked)")?,
        }
        if !self.refresh_rates.is_empty() {
            let rates: Vec<String> = self.refresh_rates.iter().map(u32::to_string).collect();
            write!(f, " rates={}", rates.join(","))?;
        }
        if let Some(surface) = &self.surface {
            write!(f, " surface={}:{:?}", surface.id, surface.kind)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Uniform lifecycle over the concrete display mechanisms.
///
/// Only `create` returns an error; everything else reports failure as
/// `false` (or a best-effort listing) and logs, so callers can always fall
/// back to a plain window.
pub trait VirtualDisplayBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Whether the underlying tool or service is usable right now.
    fn available(&mut self) -> bool;

    /// Creates a display and returns its id.
    fn create(&mut self, request: &DisplayRequest) -> Result<String, BackendError>;

    /// Removes a display. Untracked ids are still removed where possible.
    fn remove(&mut self, id: &str) -> bool;

    /// Hides the physical headset output in favour of the virtual ones.
    fn enable_ar_mode(&mut self) -> bool;

    fn disable_ar_mode(&mut self) -> bool;

    fn list(&mut self) -> Vec<VirtualDisplayRecord>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Builds the display tool client configured for this process.
pub fn xrandr_client(config: &Config) -> XrandrClient {
    let runner = Arc::new(SystemRunner::new(config.xrandr.timeout()));
    XrandrClient::new(runner, config.xrandr.program.clone())
}

/// Returns the backend selected by `kind`.
pub fn create_backend(kind: BackendKind, config: &Config) -> Box<dyn VirtualDisplayBackend> {
    match kind {
        BackendKind::XrManager => Box::new(XrManagerBackend::new(
            xrandr_client(config),
            &config.xr_manager,
        )),
        BackendKind::LegacyModeline => {
            let runner = Arc::new(SystemRunner::new(config.xrandr.timeout()));
            let generator = ModelineGenerator::new(runner, config.modeline.generator.clone());
            Box::new(LegacyModelineBackend::new(
                xrandr_client(config),
                generator,
                &config.modeline,
            ))
        }
        BackendKind::SessionService => {
            Box::new(SessionServiceBackend::connect(&config.session_service))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
