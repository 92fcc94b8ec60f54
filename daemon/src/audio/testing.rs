//! In-memory audio backend for the task tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use super::device::{AudioBackend, CaptureStream, DeviceDescriptor, DeviceError, PlaybackStream};

/// Time a fake capture takes to produce one chunk
pub const CAPTURE_PERIOD: Duration = Duration::from_millis(100);

pub fn device(name: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        id: name.into(),
        name: name.into(),
        input_channels: 1,
    }
}

/// Backend whose devices and failures are set by the test
pub struct FakeBackend {
    devices: Mutex<Vec<DeviceDescriptor>>,
    opened: Mutex<Vec<String>>,
    written: mpsc::UnboundedSender<Vec<u8>>,
    /// Captures whose first read fails
    pub capture_failures: AtomicU32,
    /// Playback opens that fail
    pub playback_open_failures: AtomicU32,
    /// Sinks whose first write fails
    pub write_failures: AtomicU32,
    pub playback_opens: AtomicU32,
}

impl FakeBackend {
    pub fn new(devices: Vec<DeviceDescriptor>) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (written, written_rx) = mpsc::unbounded_channel();
        let backend = Self {
            devices: Mutex::new(devices),
            opened: Mutex::new(Vec::new()),
            written,
            capture_failures: AtomicU32::new(0),
            playback_open_failures: AtomicU32::new(0),
            write_failures: AtomicU32::new(0),
            playback_opens: AtomicU32::new(0),
        };
        (backend, written_rx)
    }

    pub fn set_devices(&self, devices: Vec<DeviceDescriptor>) {
        *self.devices.lock().unwrap() = devices;
    }

    /// Device ids passed to `open_capture`, in order
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Produces chunks filled with 1 for the "personal" device and 2 otherwise
pub struct FakeCapture {
    fill: u8,
    fail: bool,
}

impl CaptureStream for FakeCapture {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<(), DeviceError> {
        tokio::time::sleep(CAPTURE_PERIOD).await;
        if self.fail {
            return Err(DeviceError::Stream("device unplugged".into()));
        }
        buf.fill(self.fill);
        Ok(())
    }
}

pub struct FakeSink {
    fail: bool,
    written: mpsc::UnboundedSender<Vec<u8>>,
}

impl PlaybackStream for FakeSink {
    async fn write(&mut self, pcm: &[u8]) -> Result<(), DeviceError> {
        if self.fail {
            return Err(DeviceError::Stream("device unplugged".into()));
        }
        self.written
            .send(pcm.to_vec())
            .map_err(|_| DeviceError::Closed)
    }
}

impl AudioBackend for FakeBackend {
    type Capture = FakeCapture;
    type Playback = FakeSink;

    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn open_capture(&self, device: &DeviceDescriptor) -> Result<FakeCapture, DeviceError> {
        self.opened.lock().unwrap().push(device.id.clone());
        Ok(FakeCapture {
            fill: if device.id == "personal" { 1 } else { 2 },
            fail: take_one(&self.capture_failures),
        })
    }

    async fn open_playback(&self) -> Result<FakeSink, DeviceError> {
        self.playback_opens.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.playback_open_failures) {
            return Err(DeviceError::Open {
                device: "default output".into(),
                reason: "busy".into(),
            });
        }
        Ok(FakeSink {
            fail: take_one(&self.write_failures),
            written: self.written.clone(),
        })
    }
}
