//! hidapi-backed implementation of the engine's USB transport port.
//!
//! The original driver spoke raw control transfers; over hidapi the same
//! exchanges map onto feature reports (`wValue` high byte `0x03`), output
//! reports (`0x02`) and the blocking interrupt read, with the report id in
//! the first payload byte.

use std::ffi::CString;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hidapi::{HidApi, HidDevice};
use openpad_engine::ports::{UsbTransport, UsbTransportProvider};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Sony Computer Entertainment.
pub const SIXAXIS_VID: u16 = 0x054C;
/// DualShock 3 / Sixaxis.
pub const SIXAXIS_PID: u16 = 0x0268;

/// Interrupt-read timeout so the read loop can observe shutdown.
const READ_TIMEOUT_MS: i32 = 1000;

fn hid_err(e: hidapi::HidError) -> io::Error {
    io::Error::other(e.to_string())
}

pub struct HidapiUsbTransport {
    device: Mutex<Option<HidDevice>>,
    path: CString,
    active: AtomicBool,
}

impl HidapiUsbTransport {
    fn new(device: HidDevice, path: CString) -> Self {
        Self {
            device: Mutex::new(Some(device)),
            path,
            active: AtomicBool::new(true),
        }
    }

    pub fn path(&self) -> &CString {
        &self.path
    }

    fn with_device<T>(&self, f: impl FnOnce(&HidDevice) -> io::Result<T>) -> io::Result<T> {
        let guard = self.device.lock();
        match guard.as_ref() {
            Some(device) => f(device),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "device closed")),
        }
    }
}

impl UsbTransport for HidapiUsbTransport {
    fn control_read(&self, value: u16, buf: &mut [u8]) -> io::Result<usize> {
        self.with_device(|device| {
            buf[0] = (value & 0xFF) as u8;
            device.get_feature_report(buf).map_err(hid_err)
        })
    }

    fn control_write(&self, value: u16, data: &[u8]) -> io::Result<usize> {
        self.with_device(|device| {
            let mut report = Vec::with_capacity(1 + data.len());
            report.push((value & 0xFF) as u8);
            report.extend_from_slice(data);
            match value >> 8 {
                // SET_REPORT Feature
                0x03 => device.send_feature_report(&report).map_err(hid_err).map(|()| report.len()),
                // SET_REPORT Output
                0x02 => device.write(&report).map_err(hid_err),
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported report type in value {value:#06x}"),
                )),
            }
        })
    }

    fn read_interrupt(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.with_device(|device| device.read_timeout(buf, READ_TIMEOUT_MS).map_err(hid_err))
    }

    /// Drop the handle and go inactive; the daemon's rescan loop reopens the
    /// device once it re-enumerates.
    fn restart(&self) -> io::Result<()> {
        debug!(path = ?self.path, "releasing device for re-enumeration");
        self.active.store(false, Ordering::SeqCst);
        self.device.lock().take();
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.device.lock().take();
    }
}

/// Enumerates wired controllers by VID/PID into the fixed slot order.
pub struct HidapiProvider {
    api: Mutex<HidApi>,
}

impl HidapiProvider {
    pub fn new() -> io::Result<Self> {
        let api = HidApi::new().map_err(hid_err)?;
        Ok(Self {
            api: Mutex::new(api),
        })
    }
}

impl UsbTransportProvider for HidapiProvider {
    fn open(&self, index: usize) -> Option<Arc<dyn UsbTransport>> {
        let mut api = self.api.lock();
        if let Err(e) = api.refresh_devices() {
            warn!("USB enumeration failed: {e}");
            return None;
        }

        let path = api
            .device_list()
            .filter(|d| d.vendor_id() == SIXAXIS_VID && d.product_id() == SIXAXIS_PID)
            .map(|d| d.path().to_owned())
            .nth(index)?;

        match api.open_path(&path) {
            Ok(device) => {
                debug!(slot = index, path = ?path, "opened wired controller");
                Some(Arc::new(HidapiUsbTransport::new(device, path)))
            }
            Err(e) => {
                warn!(slot = index, "failed to open controller: {e}");
                None
            }
        }
    }
}
