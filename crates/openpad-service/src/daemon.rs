//! Service wiring: settings → managers → arbitrator → control plane.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use openpad_engine::ports::{NullBus, RadioTransport, VirtualBus};
use openpad_engine::{events, HostControllerEngine, SlotArbitrator, UsbSessionManager};
use openpad_hid_sixaxis_protocol::control::{DEFAULT_FEED_PORT, DEFAULT_SERVER_PORT};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::control_plane::ControlPlane;
use crate::settings::SettingsStore;
use crate::usb_hid::HidapiProvider;

/// How often the USB slots are re-enumerated for hotplug and
/// post-quick-disconnect recovery.
const USB_RESCAN_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Control-plane bind address.
    pub bind: SocketAddr,
    /// Endpoint the normalized report stream is mirrored to.
    pub feed: SocketAddr,
    /// Settings store path.
    pub settings_path: std::path::PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], DEFAULT_SERVER_PORT)),
            feed: SocketAddr::from(([127, 0, 0, 1], DEFAULT_FEED_PORT)),
            settings_path: "openpad-settings.json".into(),
        }
    }
}

pub struct Daemon {
    config: ServiceConfig,
    /// Radio transport for the Bluetooth engine, when the embedder has one.
    radio: Option<Arc<dyn RadioTransport>>,
}

impl Daemon {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            radio: None,
        }
    }

    /// Attach a Bluetooth radio transport before [`run`](Self::run).
    pub fn with_radio(mut self, radio: Arc<dyn RadioTransport>) -> Self {
        self.radio = Some(radio);
        self
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let store = Arc::new(SettingsStore::load(&self.config.settings_path));
        let runtime = store.runtime();

        let (tx, rx) = events::channel();
        let bus: Arc<dyn VirtualBus> = Arc::new(NullBus);
        let arbitrator = Arc::new(SlotArbitrator::new(bus, Some(self.config.feed)));
        arbitrator.spawn(rx);

        let engine = match self.radio {
            Some(radio) => {
                let engine = Arc::new(HostControllerEngine::new(
                    radio,
                    tx.clone(),
                    runtime.clone(),
                ));
                engine.open();
                engine.start();
                info!("Bluetooth host controller started");
                Some(engine)
            }
            None => {
                info!("no Bluetooth radio attached, running USB-only");
                None
            }
        };

        let usb = match HidapiProvider::new() {
            Ok(provider) => {
                let manager = Arc::new(UsbSessionManager::new(
                    Arc::new(provider),
                    tx.clone(),
                    runtime.clone(),
                ));
                manager.open();
                manager.start();
                Some(manager)
            }
            Err(e) => {
                warn!("USB subsystem unavailable: {e}");
                None
            }
        };

        // Wired controllers get paired to the dongle so they reconnect over
        // Bluetooth once unplugged.
        if let (Some(engine), Some(usb)) = (&engine, &usb) {
            let engine = Arc::clone(engine);
            let usb = Arc::clone(usb);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    if engine.is_initialized() {
                        let local = engine.local_address_bytes();
                        let mut host = local;
                        host.reverse(); // pairing transfers want msb-first
                        usb.pair_all(&host);
                        break;
                    }
                }
            });
        }

        if let Some(usb) = &usb {
            let usb = Arc::clone(usb);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(USB_RESCAN_PERIOD);
                loop {
                    interval.tick().await;
                    let usb = Arc::clone(&usb);
                    // Enumeration can block; keep it off the runtime workers.
                    let _ = tokio::task::spawn_blocking(move || usb.rescan()).await;
                }
            });
        }

        let control = ControlPlane::new(Arc::clone(&arbitrator), engine.clone(), store);
        let bind = self.config.bind;

        tokio::select! {
            result = control.serve(bind) => {
                warn!("control plane exited: {result:?}");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
            }
        }

        if let Some(usb) = &usb {
            usb.stop();
            usb.close();
        }
        if let Some(engine) = &engine {
            engine.stop();
            engine.close();
        }
        Ok(())
    }
}
