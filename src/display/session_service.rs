//! Session-service backend: virtual displays from a desktop display manager.
//!
//! Some desktops ship a display-manager service on the session bus that can
//! create virtual displays itself. Its RPC surface:
//!
//! - `CreateVirtualDisplay(u width, u height, u framerate, s purpose) -> u id`
//! - `GetVirtualDisplaySurface(u id) -> (t surface_id, u surface_type)`
//! - `DestroyVirtualDisplay(u id)`
//!
//! The connection is made once at construction. A service that is not on
//! the bus then stays unavailable for the life of the process: it is
//! expected from session start, not to appear later.

use std::collections::BTreeMap;

use zbus::blocking::fdo::DBusProxy;
use zbus::blocking::Connection;
use zbus::names::BusName;

use crate::config::SessionServiceConfig;
use crate::display::error::BackendError;
use crate::display::xrandr::normalize_rates;
use crate::display::{
    BackendKind, DisplayRequest, SurfaceHandle, SurfaceKind, VirtualDisplayBackend,
    VirtualDisplayRecord,
};

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

/// The display-manager RPCs.
pub trait DisplayService: Send {
    fn create_virtual_display(
        &self,
        width: u32,
        height: u32,
        framerate: u32,
        purpose: &str,
    ) -> zbus::Result<u32>;

    /// Returns `(surface_id, surface_type)`.
    fn virtual_display_surface(&self, id: u32) -> zbus::Result<(u64, u32)>;

    fn destroy_virtual_display(&self, id: u32) -> zbus::Result<()>;
}

/// `DisplayService` over a blocking session-bus connection.
pub struct DbusDisplayService {
    connection: Connection,
    bus_name: String,
    object_path: String,
    interface: String,
}

impl DbusDisplayService {
    /// Connects to the session bus and checks that the service is running.
    pub fn connect(config: &SessionServiceConfig) -> zbus::Result<Self> {
        let connection = Connection::session()?;
        let dbus = DBusProxy::new(&connection)?;
        let name = BusName::try_from(config.bus_name.as_str())?;
        if !dbus.name_has_owner(name)? {
            return Err(zbus::Error::Failure(format!(
                "{} is not running on the session bus",
                config.bus_name
            )));
        }
        Ok(Self {
            connection,
            bus_name: config.bus_name.clone(),
            object_path: config.object_path.clone(),
            interface: config.interface.clone(),
        })
    }

    fn call<B>(&self, method: &str, body: &B) -> zbus::Result<zbus::Message>
    where
        B: serde::Serialize + zbus::zvariant::DynamicType,
    {
        log::debug!("session-service: {}.{method}", self.interface);
        self.connection.call_method(
            Some(self.bus_name.as_str()),
            self.object_path.as_str(),
            Some(self.interface.as_str()),
            method,
            body,
        )
    }
}

impl DisplayService for DbusDisplayService {
    fn create_virtual_display(
        &self,
        width: u32,
        height: u32,
        framerate: u32,
        purpose: &str,
    ) -> zbus::Result<u32> {
        let reply = self.call("CreateVirtualDisplay", &(width, height, framerate, purpose))?;
        reply.body().deserialize()
    }

    fn virtual_display_surface(&self, id: u32) -> zbus::Result<(u64, u32)> {
        let reply = self.call("GetVirtualDisplaySurface", &(id,))?;
        reply.body().deserialize()
    }

    fn destroy_virtual_display(&self, id: u32) -> zbus::Result<()> {
        self.call("DestroyVirtualDisplay", &(id,)).map(drop)
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Delegates display creation to the session display-manager service.
pub struct SessionServiceBackend {
    service: Option<Box<dyn DisplayService>>,
    purpose: String,
    displays: BTreeMap<u32, VirtualDisplayRecord>,
}

impl SessionServiceBackend {
    /// Connects once; an unreachable service leaves the backend unavailable.
    pub fn connect(config: &SessionServiceConfig) -> Self {
        let service = match DbusDisplayService::connect(config) {
            Ok(service) => {
                log::info!("session-service: connected to {}", config.bus_name);
                Some(Box::new(service) as Box<dyn DisplayService>)
            }
            Err(e) => {
                log::warn!("session-service: {} unreachable: {e}", config.bus_name);
                None
            }
        };
        Self::with_service(service, config.purpose.clone())
    }

    pub fn with_service(service: Option<Box<dyn DisplayService>>, purpose: String) -> Self {
        Self {
            service,
            purpose,
            displays: BTreeMap::new(),
        }
    }
}

impl VirtualDisplayBackend for SessionServiceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SessionService
    }

    fn available(&mut self) -> bool {
        self.service.is_some()
    }

    fn create(&mut self, request: &DisplayRequest) -> Result<String, BackendError> {
        request.validate()?;
        let Some(service) = &self.service else {
            return Err(BackendError::BackendUnavailable(
                "display-manager service not on the session bus".into(),
            ));
        };
        let mode = request.mode;

        let id = service
            .create_virtual_display(mode.width, mode.height, mode.framerate, &self.purpose)
            .map_err(|e| BackendError::CreationFailed(format!("CreateVirtualDisplay: {e}")))?;

        let (surface_id, surface_type) = match service.virtual_display_surface(id) {
            Ok(surface) => surface,
            Err(e) => {
                // A display without a surface is useless to the renderer.
                if let Err(destroy_err) = service.destroy_virtual_display(id) {
                    log::warn!("session-service: could not destroy display {id}: {destroy_err}");
                }
                return Err(BackendError::CreationFailed(format!(
                    "GetVirtualDisplaySurface({id}): {e}"
                )));
            }
        };

        let rates = normalize_rates(
            request
                .refresh_rates
                .iter()
                .flatten()
                .copied()
                .chain([mode.framerate]),
        );
        let mut record = VirtualDisplayRecord::tracked(id.to_string(), mode, rates, BackendKind::SessionService);
        record.surface = Some(SurfaceHandle {
            id: surface_id,
            kind: SurfaceKind::from(surface_type),
        });
        log::info!(
            "session-service: created display {id}: {mode}, surface {surface_id} ({:?})",
            SurfaceKind::from(surface_type)
        );
        self.displays.insert(id, record);
        Ok(id.to_string())
    }

    /// Drops the local record even when the destroy call fails.
    ///
    /// A failed destroy of an id that was no longer tracked still succeeds:
    /// the display is already gone as far as this process is concerned.
    fn remove(&mut self, id: &str) -> bool {
        let Ok(numeric) = id.parse::<u32>() else {
            log::warn!("session-service: {id:?} is not a display id");
            return false;
        };
        let tracked = self.displays.remove(&numeric).is_some();
        if !tracked {
            log::warn!("session-service: display {id} not found in tracked displays");
        }
        let Some(service) = &self.service else {
            log::error!("session-service: service unavailable, cannot destroy display {id}");
            return false;
        };
        match service.destroy_virtual_display(numeric) {
            Ok(()) => {
                log::info!("session-service: destroyed display {id}");
                true
            }
            Err(e) if !tracked => {
                log::debug!("session-service: DestroyVirtualDisplay({id}) for untracked display: {e}");
                true
            }
            Err(e) => {
                log::warn!("session-service: DestroyVirtualDisplay({id}) failed: {e}");
                false
            }
        }
    }

    fn enable_ar_mode(&mut self) -> bool {
        log::warn!("session-service: AR mode is not supported by this backend");
        false
    }

    fn disable_ar_mode(&mut self) -> bool {
        log::warn!("session-service: AR mode is not supported by this backend");
        false
    }

    fn list(&mut self) -> Vec<VirtualDisplayRecord> {
        self.displays.values().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::display::DisplayMode;

    #[derive(Default)]
    struct Calls {
        next_id: u32,
        created: Vec<(u32, u32, u32, String)>,
        live: Vec<u32>,
        destroyed: Vec<u32>,
        fail_surface: bool,
        fail_destroy: bool,
    }

    #[derive(Clone, Default)]
    struct FakeService(Arc<Mutex<Calls>>);

    impl DisplayService for FakeService {
        fn create_virtual_display(&self, w: u32, h: u32, fr: u32, purpose: &str) -> zbus::Result<u32> {
            let mut calls = self.0.lock().unwrap();
            calls.next_id += 1;
            calls.created.push((w, h, fr, purpose.to_owned()));
            let id = calls.next_id;
            calls.live.push(id);
            Ok(id)
        }

        fn virtual_display_surface(&self, id: u32) -> zbus::Result<(u64, u32)> {
            if self.0.lock().unwrap().fail_surface {
                return Err(zbus::Error::Failure("no surface".into()));
            }
            Ok((1000 + u64::from(id), 2))
        }

        fn destroy_virtual_display(&self, id: u32) -> zbus::Result<()> {
            let mut calls = self.0.lock().unwrap();
            calls.destroyed.push(id);
            if calls.fail_destroy {
                return Err(zbus::Error::Failure("service gone".into()));
            }
            if !calls.live.contains(&id) {
                return Err(zbus::Error::Failure(format!("no virtual display {id}")));
            }
            calls.live.retain(|l| *l != id);
            Ok(())
        }
    }

    fn backend(fake: &FakeService) -> SessionServiceBackend {
        SessionServiceBackend::with_service(Some(Box::new(fake.clone())), "xr-glasses".into())
    }

    #[test]
    fn create_records_id_and_surface() {
        let fake = FakeService::default();
        let mut backend = backend(&fake);

        let id = backend
            .create(&DisplayRequest::new(1920, 1080, 90).with_refresh_rates(vec![60]))
            .unwrap();
        assert_eq!(id, "1");

        let listed = backend.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(
            listed[0].mode,
            Some(DisplayMode {
                width: 1920,
                height: 1080,
                framerate: 90
            })
        );
        assert_eq!(listed[0].refresh_rates, vec![60, 90]);
        assert_eq!(
            listed[0].surface,
            Some(SurfaceHandle {
                id: 1001,
                kind: SurfaceKind::DmaBuf
            })
        );
        assert_eq!(
            fake.0.lock().unwrap().created,
            vec![(1920, 1080, 90, "xr-glasses".to_owned())]
        );
    }

    #[test]
    fn surface_failure_destroys_remote_display() {
        let fake = FakeService::default();
        fake.0.lock().unwrap().fail_surface = true;
        let mut backend = backend(&fake);

        let err = backend.create(&DisplayRequest::new(1920, 1080, 60)).unwrap_err();
        assert!(matches!(err, BackendError::CreationFailed(_)));
        assert_eq!(fake.0.lock().unwrap().destroyed, vec![1]);
        assert!(backend.list().is_empty());
    }

    #[test]
    fn failed_destroy_still_drops_record() {
        let fake = FakeService::default();
        let mut backend = backend(&fake);
        let id = backend.create(&DisplayRequest::new(1920, 1080, 60)).unwrap();

        fake.0.lock().unwrap().fail_destroy = true;
        assert!(!backend.remove(&id));
        assert!(backend.list().is_empty());
    }

    #[test]
    fn remove_is_repeatable() {
        let fake = FakeService::default();
        let mut backend = backend(&fake);
        let id = backend.create(&DisplayRequest::new(1920, 1080, 60)).unwrap();

        assert!(backend.remove(&id));
        assert!(backend.remove(&id));
        assert!(backend.list().iter().all(|r| r.id != id));
        assert_eq!(fake.0.lock().unwrap().destroyed, vec![1, 1]);
        assert!(fake.0.lock().unwrap().live.is_empty());
    }

    #[test]
    fn remove_after_failed_destroy_succeeds() {
        let fake = FakeService::default();
        let mut backend = backend(&fake);
        let id = backend.create(&DisplayRequest::new(1920, 1080, 60)).unwrap();

        fake.0.lock().unwrap().fail_destroy = true;
        assert!(!backend.remove(&id));
        assert!(backend.remove(&id));
    }

    #[test]
    fn non_numeric_id_is_rejected() {
        let fake = FakeService::default();
        let mut backend = backend(&fake);
        assert!(!backend.remove("XR-0"));
        assert!(fake.0.lock().unwrap().destroyed.is_empty());
    }

    #[test]
    fn missing_service_is_permanently_unavailable() {
        let mut backend = SessionServiceBackend::with_service(None, "xr-glasses".into());
        assert!(!backend.available());
        assert!(matches!(
            backend.create(&DisplayRequest::new(1920, 1080, 60)),
            Err(BackendError::BackendUnavailable(_))
        ));
        assert!(!backend.remove("1"));
        assert!(!backend.enable_ar_mode());
        assert!(!backend.available());
    }
}
