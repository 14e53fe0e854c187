//! Loopback UDP control plane.
//!
//! One datagram per request, opcode at byte 1. The server loop never dies on
//! a bad datagram: unknown opcodes are ignored, malformed ones logged and
//! dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use openpad_engine::{HostControllerEngine, SlotArbitrator};
use openpad_hid_sixaxis_protocol::control::{self, Request};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::settings::SettingsStore;

/// Shown as the dongle line when no Bluetooth radio is attached.
const NO_DONGLE: &str = "Host Address : Disconnected";

pub struct ControlPlane {
    arbitrator: Arc<SlotArbitrator>,
    engine: Option<Arc<HostControllerEngine>>,
    store: Arc<SettingsStore>,
}

impl ControlPlane {
    pub fn new(
        arbitrator: Arc<SlotArbitrator>,
        engine: Option<Arc<HostControllerEngine>>,
        store: Arc<SettingsStore>,
    ) -> Self {
        Self {
            arbitrator,
            engine,
            store,
        }
    }

    /// Serve requests until the task is cancelled.
    pub async fn serve(&self, bind: SocketAddr) -> anyhow::Result<()> {
        let socket = UdpSocket::bind(bind).await?;
        info!(%bind, "control plane listening");
        let mut buf = [0u8; 512];

        loop {
            let (len, peer) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("control plane receive failed: {e}");
                    continue;
                }
            };
            if let Some(reply) = self.handle_datagram(&buf[..len], peer) {
                if let Err(e) = socket.send_to(&reply, peer).await {
                    warn!(%peer, "control plane reply failed: {e}");
                }
            }
        }
    }

    /// Decode and execute one request; returns the reply payload, if any.
    pub fn handle_datagram(&self, datagram: &[u8], peer: SocketAddr) -> Option<Vec<u8>> {
        let request = match Request::parse(datagram)? {
            Ok(request) => request,
            Err(e) => {
                debug!(%peer, "dropping malformed control request: {e}");
                return None;
            }
        };

        match request {
            Request::Status => {
                debug!(%peer, "status request");
                Some(control::status_reply(datagram, self.arbitrator.slot_states()))
            }
            Request::Rumble { slot, left, right } => {
                self.arbitrator.native_rumble(slot, left, right);
                None
            }
            Request::TextStatus => {
                let dongle = match &self.engine {
                    Some(engine) => engine.describe(),
                    None => NO_DONGLE.to_string(),
                };
                Some(control::text_status_reply(
                    &dongle,
                    &self.arbitrator.describe_pads(),
                ))
            }
            Request::SettingsGet => {
                debug!(%peer, "settings request");
                Some(self.store.current().pack().to_vec())
            }
            Request::SettingsSet(settings) => {
                info!(
                    %peer,
                    idle = settings.idle_timeout_min,
                    led_off = settings.disable_led,
                    "settings pushed"
                );
                self.store.update(settings);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openpad_engine::ports::{NullBus, VirtualBus};
    use openpad_hid_sixaxis_protocol::settings::Settings;

    fn plane() -> ControlPlane {
        let bus: Arc<dyn VirtualBus> = Arc::new(NullBus);
        let arbitrator = Arc::new(SlotArbitrator::new(bus, None));
        let store = Arc::new(SettingsStore::load(
            std::env::temp_dir().join(format!("openpad-cp-{}.json", std::process::id())),
        ));
        ControlPlane::new(arbitrator, None, store)
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:9".parse().expect("addr")
    }

    #[test]
    fn status_request_reports_all_slots_disconnected() {
        let plane = plane();
        let reply = plane
            .handle_datagram(&[0x00, 0x00, 0, 0, 0, 0], peer())
            .expect("status reply");
        assert_eq!(&reply[2..6], &[0, 0, 0, 0]);
    }

    #[test]
    fn rumble_request_has_no_reply() {
        let plane = plane();
        assert!(plane.handle_datagram(&[0x00, 0x01, 0x40, 0x01], peer()).is_none());
    }

    #[test]
    fn text_status_lists_dongle_and_pads() {
        let plane = plane();
        let reply = plane
            .handle_datagram(&[0x00, 0x02], peer())
            .expect("text reply");
        let units: Vec<u16> = reply
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let text = String::from_utf16(&units).expect("utf16");
        assert!(text.starts_with("Host Address : Disconnected^"));
        assert!(text.contains("Pad 1 : Disconnected^"));
        assert!(text.contains("Pad 4 : Disconnected^"));
    }

    #[test]
    fn settings_round_trip_over_the_wire() {
        let plane = plane();
        let pushed = Settings {
            idle_timeout_min: 7,
            flip_rx: true,
            ..Settings::default()
        };
        let mut push = pushed.pack();
        push[1] = 0x04;
        assert!(plane.handle_datagram(&push, peer()).is_none());

        let reply = plane
            .handle_datagram(&[0x00, 0x03], peer())
            .expect("settings reply");
        assert_eq!(Settings::unpack(&reply).expect("blob"), pushed);
        let _ = std::fs::remove_file(plane.store.path());
    }

    #[test]
    fn unknown_opcode_is_ignored() {
        let plane = plane();
        assert!(plane.handle_datagram(&[0x00, 0x7E, 0x01], peer()).is_none());
        assert!(plane.handle_datagram(&[], peer()).is_none());
    }
}
