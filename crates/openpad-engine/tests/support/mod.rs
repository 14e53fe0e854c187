//! Scripted transport and bus doubles for driving the engine without
//! hardware.
#![allow(dead_code)] // each test binary uses a different subset

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use openpad_engine::ports::{RadioTransport, UsbTransport, VirtualBus};

#[derive(Default)]
struct Pipe {
    queue: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
}

impl Pipe {
    fn push(&self, frame: Vec<u8>) {
        self.queue.lock().expect("pipe lock").push_back(frame);
        self.ready.notify_all();
    }

    /// Blocking pop; returns `None` once `active` goes false.
    fn pop(&self, active: &AtomicBool) -> Option<Vec<u8>> {
        let mut queue = self.queue.lock().expect("pipe lock");
        loop {
            if let Some(frame) = queue.pop_front() {
                return Some(frame);
            }
            if !active.load(Ordering::SeqCst) {
                return None;
            }
            let (q, _timeout) = self
                .ready
                .wait_timeout(queue, Duration::from_millis(20))
                .expect("pipe wait");
            queue = q;
        }
    }
}

/// A radio whose inbound pipes are fed by the test and whose outbound
/// writes are recorded.
#[derive(Default)]
pub struct VirtualRadio {
    active: AtomicBool,
    events: Pipe,
    acl_in: Pipe,
    commands: Mutex<Vec<Vec<u8>>>,
    acl_out: Mutex<Vec<Vec<u8>>>,
}

impl VirtualRadio {
    pub fn new() -> Self {
        let radio = Self::default();
        radio.active.store(true, Ordering::SeqCst);
        radio
    }

    pub fn push_event(&self, frame: &[u8]) {
        self.events.push(frame.to_vec());
    }

    pub fn push_acl(&self, frame: &[u8]) {
        self.acl_in.push(frame.to_vec());
    }

    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.commands.lock().expect("commands lock").clone()
    }

    pub fn acl_writes(&self) -> Vec<Vec<u8>> {
        self.acl_out.lock().expect("acl lock").clone()
    }

    /// Poll until `count` HCI commands have been written or the timeout
    /// expires; returns the recorded commands either way.
    pub fn wait_commands(&self, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
        self.wait(timeout, || self.commands(), count)
    }

    pub fn wait_acl_writes(&self, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
        self.wait(timeout, || self.acl_writes(), count)
    }

    fn wait(
        &self,
        timeout: Duration,
        snapshot: impl Fn() -> Vec<Vec<u8>>,
        count: usize,
    ) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            let frames = snapshot();
            if frames.len() >= count || Instant::now() >= deadline {
                return frames;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

impl RadioTransport for VirtualRadio {
    fn send_command(&self, frame: &[u8]) -> io::Result<usize> {
        self.commands
            .lock()
            .expect("commands lock")
            .push(frame.to_vec());
        Ok(frame.len())
    }

    fn read_event(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.events.pop(&self.active) {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "radio closed")),
        }
    }

    fn write_acl(&self, frame: &[u8]) -> io::Result<usize> {
        self.acl_out
            .lock()
            .expect("acl lock")
            .push(frame.to_vec());
        Ok(frame.len())
    }

    fn read_acl(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.acl_in.pop(&self.active) {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "radio closed")),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.events.ready.notify_all();
        self.acl_in.ready.notify_all();
    }
}

/// A wired transport with scripted identity replies and recorded writes.
pub struct VirtualUsbTransport {
    active: AtomicBool,
    interrupt: Pipe,
    /// `(value, payload)` pairs of every control write.
    writes: Mutex<Vec<(u16, Vec<u8>)>>,
    restarts: Mutex<u32>,
    paired_host: [u8; 6],
    address: [u8; 6],
}

impl VirtualUsbTransport {
    pub fn new(address: [u8; 6], paired_host: [u8; 6]) -> Self {
        Self {
            active: AtomicBool::new(true),
            interrupt: Pipe::default(),
            writes: Mutex::new(Vec::new()),
            restarts: Mutex::new(0),
            paired_host,
            address,
        }
    }

    pub fn push_report(&self, frame: &[u8]) {
        self.interrupt.push(frame.to_vec());
    }

    pub fn control_writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.writes.lock().expect("writes lock").clone()
    }

    pub fn restart_count(&self) -> u32 {
        *self.restarts.lock().expect("restarts lock")
    }
}

impl UsbTransport for VirtualUsbTransport {
    fn control_read(&self, value: u16, buf: &mut [u8]) -> io::Result<usize> {
        match value {
            0x03F5 => {
                buf[..8].fill(0);
                buf[2..8].copy_from_slice(&self.paired_host);
                Ok(8)
            }
            0x03F2 => {
                buf[..10].fill(0);
                buf[4..10].copy_from_slice(&self.address);
                Ok(10)
            }
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "unknown value")),
        }
    }

    fn control_write(&self, value: u16, data: &[u8]) -> io::Result<usize> {
        self.writes
            .lock()
            .expect("writes lock")
            .push((value, data.to_vec()));
        Ok(data.len())
    }

    fn read_interrupt(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.interrupt.pop(&self.active) {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "device closed")),
        }
    }

    fn restart(&self) -> io::Result<()> {
        *self.restarts.lock().expect("restarts lock") += 1;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.interrupt.ready.notify_all();
    }
}

/// Records bus traffic; rumble feedback can be scripted per submission.
#[derive(Default)]
pub struct RecordingBus {
    pub plugged: Mutex<Vec<u32>>,
    pub unplugged: Mutex<Vec<u32>>,
    pub reports: Mutex<Vec<[u8; 28]>>,
    /// When set, the next `report` call returns this rumble payload.
    pub pending_rumble: Mutex<Option<[u8; 8]>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VirtualBus for RecordingBus {
    fn plugin(&self, unit: u32) -> bool {
        self.plugged.lock().expect("bus lock").push(unit);
        true
    }

    fn unplug(&self, unit: u32) -> bool {
        self.unplugged.lock().expect("bus lock").push(unit);
        true
    }

    fn parse(&self, input: &[u8; 64], output: &mut [u8; 28]) -> usize {
        output[0] = input[0];
        input[0] as usize
    }

    fn report(&self, output: &[u8; 28], rumble: &mut [u8; 8]) -> bool {
        self.reports.lock().expect("bus lock").push(*output);
        if let Some(pending) = self.pending_rumble.lock().expect("bus lock").take() {
            *rumble = pending;
            true
        } else {
            false
        }
    }
}
