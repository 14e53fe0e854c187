//! Shared runtime settings consumed by the session watchdogs.

use std::sync::Arc;
use std::time::Duration;

use openpad_hid_sixaxis_protocol::settings::Settings;
use parking_lot::RwLock;

/// Cheap-to-clone handle on the live settings.
///
/// The control plane writes through it when a settings push arrives; session
/// ticks read it every iteration, so changes apply without restarting
/// anything.
#[derive(Clone)]
pub struct RuntimeSettings {
    inner: Arc<RwLock<Settings>>,
}

impl RuntimeSettings {
    pub fn new(initial: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn get(&self) -> Settings {
        *self.inner.read()
    }

    pub fn set(&self, settings: Settings) {
        *self.inner.write() = settings;
    }

    /// `None` disables the idle watchdog.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.inner.read().idle_timeout()
    }

    pub fn disable_led(&self) -> bool {
        self.inner.read().disable_led
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
