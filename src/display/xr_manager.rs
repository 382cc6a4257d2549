//! XR-Manager backend: virtual outputs through the virtual-connector driver.
//!
//! The modified display driver exposes an `XR-Manager` output whose
//! properties act as commands:
//!
//! | property           | value                      | target            |
//! |--------------------|----------------------------|-------------------|
//! | `CREATE_XR_OUTPUT` | `name:width:height:rate`   | manager           |
//! | `DELETE_XR_OUTPUT` | `name`                     | manager           |
//! | `XR_MODES`         | `w:h:rate\|w:h:rate\|...`  | new virtual output|
//! | `AR_MODE`          | `0` / `1`                  | manager           |
//!
//! None of them acknowledge anything beyond the tool's exit code, so create
//! and delete are verified by re-listing outputs.
//!
//! Per-output lifecycle: absent -> creating -> present -> removing -> absent.

use std::collections::BTreeMap;

use crate::config::XrManagerConfig;
use crate::display::error::{BackendError, Presence, ToolError};
use crate::display::verify::Verifier;
use crate::display::xrandr::{is_non_desktop, normalize_rates, XrandrClient, FALLBACK_REFRESH_RATE};
use crate::display::{BackendKind, DisplayRequest, VirtualDisplayBackend, VirtualDisplayRecord};

const CREATE_PROPERTY: &str = "CREATE_XR_OUTPUT";
const DELETE_PROPERTY: &str = "DELETE_XR_OUTPUT";
const MODES_PROPERTY: &str = "XR_MODES";
const AR_MODE_PROPERTY: &str = "AR_MODE";

// ---------------------------------------------------------------------------
// Public struct
// ---------------------------------------------------------------------------

/// Creates and removes virtual outputs via the XR-Manager property protocol.
pub struct XrManagerBackend {
    client: XrandrClient,
    manager_output: String,
    output_prefix: String,
    vendor_hints: Vec<String>,
    /// Sticky once positive; a negative probe is retried on the next call.
    manager_seen: bool,
    displays: BTreeMap<String, VirtualDisplayRecord>,
}

impl XrManagerBackend {
    pub fn new(client: XrandrClient, config: &XrManagerConfig) -> Self {
        Self {
            client,
            manager_output: config.manager_output.clone(),
            output_prefix: config.output_prefix.clone(),
            vendor_hints: config
                .vendor_hints
                .iter()
                .map(|h| h.to_lowercase())
                .collect(),
            manager_seen: false,
            displays: BTreeMap::new(),
        }
    }

    /// Checks whether the manager output is listed.
    fn probe(&self) -> bool {
        match self.client.list_outputs() {
            Ok(outputs) => {
                let found = outputs.iter().any(|o| o.name == self.manager_output);
                if !found {
                    log::warn!(
                        "xr: {} output not found; virtual XR connector unavailable",
                        self.manager_output
                    );
                }
                found
            }
            Err(e) if e.is_unavailable() => {
                log::error!("xr: display tool not usable: {e}");
                false
            }
            Err(e) => {
                log::error!("xr: failed to probe for {}: {e}", self.manager_output);
                false
            }
        }
    }

    /// True for outputs this backend manages (`XR-*`, minus the manager).
    fn is_virtual_output(&self, name: &str) -> bool {
        name != self.manager_output && name.starts_with(&self.output_prefix)
    }

    // -----------------------------------------------------------------------
    // Physical connector
    // -----------------------------------------------------------------------

    /// Finds the connected output most likely to be the XR headset.
    ///
    /// Candidates are connected outputs that are neither the manager nor a
    /// virtual output. The first one that is marked `non-desktop` or whose
    /// mode text mentions a known XR vendor wins.
    pub fn detect_physical_connector(&self) -> Option<String> {
        let outputs = match self.client.list_outputs() {
            Ok(outputs) => outputs,
            Err(e) => {
                log::warn!("xr: cannot list outputs for connector detection: {e}");
                return None;
            }
        };

        let found = outputs
            .iter()
            .filter(|o| o.connected && !self.is_virtual_output(&o.name) && o.name != self.manager_output)
            .find(|o| {
                let modes = match self.client.query_output(&o.name) {
                    Ok(text) => text,
                    Err(e) => {
                        log::debug!("xr: skipping {}: {e}", o.name);
                        return false;
                    }
                };
                let props = self.client.query_properties(&o.name);
                let text = format!("{}\n{modes}", o.line).to_lowercase();
                is_non_desktop(&props) || self.vendor_hints.iter().any(|h| text.contains(h.as_str()))
            })
            .map(|o| o.name.clone());

        match &found {
            Some(name) => log::info!("xr: auto-detected XR connector {name}"),
            None => log::debug!("xr: no XR connector among connected outputs"),
        }
        found
    }

    /// Refresh rates of the physical XR connector, ascending.
    ///
    /// `connector` of `None` auto-detects. Returns `[60]` when no connector is
    /// found or its modes cannot be queried.
    pub fn physical_connector_refresh_rates(&self, connector: Option<&str>) -> Vec<u32> {
        let connector = match connector {
            Some(name) => name.to_owned(),
            None => match self.detect_physical_connector() {
                Some(name) => name,
                None => {
                    log::warn!("xr: no XR connector found, using default refresh rate");
                    return vec![FALLBACK_REFRESH_RATE];
                }
            },
        };
        match self.client.query_modes(&connector) {
            Ok(rates) => {
                log::info!("xr: refresh rates for {connector}: {rates:?}");
                rates
            }
            Err(e) => {
                log::warn!("xr: failed to query refresh rates for {connector}: {e}");
                vec![FALLBACK_REFRESH_RATE]
            }
        }
    }

    /// Rates to advertise on a new output; always includes the framerate.
    ///
    /// Without explicit rates the headset connector is queried. When no
    /// connector is known or the query fails, only the framerate is used.
    fn refresh_rates_for(&self, request: &DisplayRequest) -> Vec<u32> {
        let framerate = request.mode.framerate;
        let derived = match &request.refresh_rates {
            Some(rates) => rates.clone(),
            None => {
                let connector = request
                    .physical_connector
                    .clone()
                    .or_else(|| self.detect_physical_connector());
                match connector {
                    Some(name) => self.client.query_modes(&name).unwrap_or_else(|e| {
                        log::warn!("xr: failed to query refresh rates for {name}: {e}");
                        Vec::new()
                    }),
                    None => Vec::new(),
                }
            }
        };
        normalize_rates(derived.into_iter().chain([framerate]))
    }

    fn set_ar_mode(&mut self, enabled: bool) -> bool {
        let state = if enabled { "enable" } else { "disable" };
        if !self.available() {
            log::error!("xr: {} not available, cannot {state} AR mode", self.manager_output);
            return false;
        }
        let value = if enabled { "1" } else { "0" };
        match self
            .client
            .set_property(&self.manager_output, AR_MODE_PROPERTY, value)
        {
            Ok(()) => {
                if enabled {
                    log::info!("xr: AR mode enabled (physical XR hidden, virtual XR shown)");
                } else {
                    log::info!("xr: AR mode disabled (physical XR shown, virtual XR hidden)");
                }
                true
            }
            Err(e) => {
                log::error!("xr: failed to {state} AR mode: {e}");
                false
            }
        }
    }
}

/// `w:h:rate|w:h:rate|...` for every rate.
fn modes_value(width: u32, height: u32, rates: &[u32]) -> String {
    rates
        .iter()
        .map(|rate| format!("{width}:{height}:{rate}"))
        .collect::<Vec<_>>()
        .join("|")
}

// ---------------------------------------------------------------------------
// VirtualDisplayBackend trait impl
// ---------------------------------------------------------------------------

impl VirtualDisplayBackend for XrManagerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::XrManager
    }

    fn available(&mut self) -> bool {
        if !self.manager_seen {
            self.manager_seen = self.probe();
        }
        self.manager_seen
    }

    fn create(&mut self, request: &DisplayRequest) -> Result<String, BackendError> {
        request.validate()?;
        if !self.available() {
            return Err(BackendError::BackendUnavailable(format!(
                "{} output not found",
                self.manager_output
            )));
        }

        let name = request.name.as_str();
        let mode = request.mode;
        let command = format!("{name}:{}:{}:{}", mode.width, mode.height, mode.framerate);

        Verifier::new(&self.client)
            .apply(name, Presence::Present, |c| {
                c.set_property(&self.manager_output, CREATE_PROPERTY, &command)
            })
            .map_err(|e| match e {
                BackendError::Tool(ToolError::Protocol { stderr, .. }) => BackendError::CreationFailed(
                    format!("{CREATE_PROPERTY} rejected: {}", stderr.trim()),
                ),
                BackendError::VerificationMismatch { .. } => {
                    BackendError::CreationFailed(format!("output {name} not created"))
                }
                other => BackendError::CreationFailed(other.to_string()),
            })?;

        let rates = self.refresh_rates_for(request);
        if rates.len() > 1 {
            let value = modes_value(mode.width, mode.height, &rates);
            match self.client.set_property(name, MODES_PROPERTY, &value) {
                Ok(()) => log::info!("xr: set {} refresh rates for {name}: {rates:?}", rates.len()),
                // Older drivers lack the property; single-rate output still works.
                Err(e) => log::warn!("xr: failed to set {MODES_PROPERTY} on {name}: {e}"),
            }
        }

        self.displays.insert(
            name.to_owned(),
            VirtualDisplayRecord::tracked(name, mode, rates.clone(), BackendKind::XrManager),
        );
        log::info!("xr: created virtual display {name}: {mode} (refresh rates: {rates:?})");
        Ok(name.to_owned())
    }

    fn remove(&mut self, id: &str) -> bool {
        if !self.displays.contains_key(id) {
            log::warn!("xr: display {id} not found in tracked displays");
        }
        if !self.available() {
            log::error!("xr: {} not available, cannot remove {id}", self.manager_output);
            return false;
        }

        let result = Verifier::new(&self.client).apply(id, Presence::Absent, |c| {
            c.set_property(&self.manager_output, DELETE_PROPERTY, id)
        });
        match result {
            Ok(()) => {
                self.displays.remove(id);
                log::info!("xr: removed virtual display {id}");
                true
            }
            Err(BackendError::VerificationMismatch { .. }) => {
                log::warn!("xr: virtual output {id} still exists after deletion attempt");
                false
            }
            Err(e) => {
                log::error!("xr: failed to remove virtual display {id}: {e}");
                false
            }
        }
    }

    fn enable_ar_mode(&mut self) -> bool {
        self.set_ar_mode(true)
    }

    fn disable_ar_mode(&mut self) -> bool {
        self.set_ar_mode(false)
    }

    /// Virtual outputs currently listed; untracked ones carry only their id.
    fn list(&mut self) -> Vec<VirtualDisplayRecord> {
        match self.client.list_outputs() {
            Ok(outputs) => outputs
                .iter()
                .filter(|o| self.is_virtual_output(&o.name))
                .map(|o| {
                    self.displays
                        .get(&o.name)
                        .cloned()
                        .unwrap_or_else(|| VirtualDisplayRecord::untracked(&o.name, BackendKind::XrManager))
                })
                .collect(),
            Err(e) => {
                log::error!("xr: failed to list virtual displays: {e}");
                self.displays.values().cloned().collect()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
