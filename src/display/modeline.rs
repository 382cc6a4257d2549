//! Legacy modeline backend for drivers without a virtual connector.
//!
//! Synthesizes a timing mode with the modeline generator, attaches it to a
//! pre-existing `VIRTUAL*` output (as exposed by e.g. the intel or dummy
//! drivers) and activates it. Only activation decides success: defining
//! the mode and attaching it may fail (the tool cannot report "already
//! defined" or "already attached"), and activation is confirmed by the mode
//! showing as current on the target output.
//!
//! Teardown (off, detach, delete) is best-effort at every step so that a
//! half-torn-down output never blocks shutdown. A mode is only deleted by
//! the display that defined it.

use std::collections::BTreeMap;

use crate::config::ModelineConfig;
use crate::display::error::BackendError;
use crate::display::verify::Verifier;
use crate::display::xrandr::{
    mentions_mode, parse_outputs, ModelineGenerator, OutputDescriptor, XrandrClient,
};
use crate::display::{BackendKind, DisplayRequest, VirtualDisplayBackend, VirtualDisplayRecord};

/// Case-insensitive marker of outputs that can host a synthesized mode.
const VIRTUAL_MARKER: &str = "VIRTUAL";

/// A display this backend activated.
#[derive(Debug, Clone)]
struct ModelineDisplay {
    record: VirtualDisplayRecord,
    mode_name: String,
    /// The mode was defined by this display rather than reused.
    owns_mode: bool,
}

// ---------------------------------------------------------------------------
// Public struct
// ---------------------------------------------------------------------------

/// Hosts a generated mode on an existing VIRTUAL output.
pub struct LegacyModelineBackend {
    client: XrandrClient,
    generator: ModelineGenerator,
    preferred_output: Option<String>,
    /// Keyed by target output name.
    displays: BTreeMap<String, ModelineDisplay>,
}

impl LegacyModelineBackend {
    pub fn new(client: XrandrClient, generator: ModelineGenerator, config: &ModelineConfig) -> Self {
        Self {
            client,
            generator,
            preferred_output: config.preferred_output.clone(),
            displays: BTreeMap::new(),
        }
    }

    /// Picks the output to host the mode.
    ///
    /// Explicit names (configured, then requested) win when they are
    /// listed; otherwise the first output containing `VIRTUAL`.
    fn select_target(&self, outputs: &[OutputDescriptor], requested: &str) -> Option<String> {
        let explicit = self
            .preferred_output
            .iter()
            .map(String::as_str)
            .chain([requested])
            .find(|name| outputs.iter().any(|o| o.name == *name));
        if let Some(name) = explicit {
            return Some(name.to_owned());
        }
        outputs
            .iter()
            .find(|o| o.name.to_uppercase().contains(VIRTUAL_MARKER))
            .map(|o| o.name.clone())
    }

    /// Off, detach, and delete when `owns_mode`. Each step continues on failure.
    fn teardown(&self, output: &str, mode_name: &str, owns_mode: bool) {
        if let Err(e) = self.client.output_off(output) {
            log::warn!("modeline: could not turn off {output}: {e}");
        }
        if let Err(e) = self.client.delete_mode(output, mode_name) {
            log::warn!("modeline: could not detach {mode_name} from {output}: {e}");
        }
        if !owns_mode {
            return;
        }
        if let Err(e) = self.client.remove_mode(mode_name) {
            log::warn!("modeline: could not delete mode {mode_name}: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// VirtualDisplayBackend trait impl
// ---------------------------------------------------------------------------

impl VirtualDisplayBackend for LegacyModelineBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LegacyModeline
    }

    fn available(&mut self) -> bool {
        match self.client.query() {
            Ok(_) => true,
            Err(e) => {
                log::error!("modeline: display tool unusable: {e}");
                false
            }
        }
    }

    fn create(&mut self, request: &DisplayRequest) -> Result<String, BackendError> {
        request.validate()?;
        let mode = request.mode;

        let modeline = self
            .generator
            .generate(mode.width, mode.height, mode.framerate)
            .map_err(|e| BackendError::CreationFailed(format!("modeline generation failed: {e}")))?
            .ok_or_else(|| BackendError::CreationFailed("no modeline in generator output".into()))?;

        let screen = self
            .client
            .query()
            .map_err(|e| BackendError::CreationFailed(e.to_string()))?;
        let Some(target) = self.select_target(&parse_outputs(&screen), &request.name) else {
            log::warn!("modeline: no virtual output available; virtual display creation is limited on this driver");
            log::warn!("modeline: consider the dummy video driver or the XR-Manager backend");
            return Err(BackendError::NoVirtualOutput);
        };
        if self.displays.contains_key(&target) {
            return Err(BackendError::CreationFailed(format!(
                "{target} already hosts a virtual display"
            )));
        }

        let owns_mode = if mentions_mode(&screen, &modeline.name) {
            log::info!("modeline: reusing existing mode {}", modeline.name);
            false
        } else {
            match self.client.new_mode(&modeline) {
                Ok(()) => {
                    log::info!("modeline: created mode {}", modeline.name);
                    true
                }
                Err(e) => {
                    log::warn!("modeline: defining {} failed (may already exist): {e}", modeline.name);
                    false
                }
            }
        };

        if let Err(e) = self.client.add_mode(&target, &modeline.name) {
            log::warn!("modeline: attaching {} to {target} failed (may already be attached): {e}", modeline.name);
        }

        let activated = Verifier::new(&self.client).apply_mode(&target, &modeline.name, |c| {
            c.set_mode(&target, &modeline.name)
        });
        if let Err(e) = activated {
            log::error!("modeline: failed to activate {} on {target}: {e}", modeline.name);
            self.teardown(&target, &modeline.name, owns_mode);
            return Err(BackendError::CreationFailed(e.to_string()));
        }

        let record = VirtualDisplayRecord::tracked(
            target.clone(),
            mode,
            vec![mode.framerate],
            BackendKind::LegacyModeline,
        );
        self.displays.insert(
            target.clone(),
            ModelineDisplay {
                record,
                mode_name: modeline.name,
                owns_mode,
            },
        );
        log::info!("modeline: virtual display created: {mode} on {target}");
        Ok(target)
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.displays.remove(id) {
            Some(display) => {
                self.teardown(id, &display.mode_name, display.owns_mode);
                log::info!("modeline: virtual display {id} removed");
                true
            }
            None => {
                log::warn!("modeline: display {id} not tracked, turning output off only");
                match self.client.output_off(id) {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("modeline: could not turn off {id}: {e}");
                        false
                    }
                }
            }
        }
    }

    fn enable_ar_mode(&mut self) -> bool {
        log::warn!("modeline: AR mode is not supported by this backend");
        false
    }

    fn disable_ar_mode(&mut self) -> bool {
        log::warn!("modeline: AR mode is not supported by this backend");
        false
    }

    fn list(&mut self) -> Vec<VirtualDisplayRecord> {
        let outputs = match self.client.query() {
            Ok(text) => parse_outputs(&text),
            Err(e) => {
                log::error!("modeline: failed to list outputs: {e}");
                return self.displays.values().map(|d| d.record.clone()).collect();
            }
        };
        self.displays
            .values()
            .filter(|d| outputs.iter().any(|o| o.name == d.record.id))
            .map(|d| d.record.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
