//! OpenPad service daemon library.
//!
//! Wires the engine crate's managers and arbitrator to the outside world:
//! a hidapi-backed USB transport, a JSON settings store, and the loopback
//! UDP control plane.

pub mod control_plane;
pub mod daemon;
pub mod settings;
pub mod usb_hid;

pub use control_plane::ControlPlane;
pub use daemon::{Daemon, ServiceConfig};
pub use settings::SettingsStore;
