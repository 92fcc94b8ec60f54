//! Capture and playback through the platform audio host (cpal)
//!
//! cpal streams are not `Send`, so each stream is built and kept on its own
//! thread for as long as the async handle exists. PCM crosses between that
//! thread and the daemon's tasks over channels.

use std::collections::VecDeque;
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::device::{AudioBackend, CaptureStream, DeviceDescriptor, DeviceError, PlaybackStream};

/// Sample rate used on both ends of the link
pub const SAMPLE_RATE: u32 = 44_100;

/// Capture callbacks buffered ahead of the sender
const CAPTURE_BACKLOG: usize = 64;

/// Interleaved playback samples held before the oldest are dropped
/// (half a second of stereo)
const PLAYBACK_BACKLOG: usize = SAMPLE_RATE as usize;

type CaptureData = Result<Vec<u8>, DeviceError>;

/// Default cpal host
#[derive(Debug, Clone)]
pub struct CpalBackend {
    sample_rate: u32,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    type Capture = CpalCapture;
    type Playback = CpalPlayback;

    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        tokio::task::spawn_blocking(enumerate_inputs)
            .await
            .map_err(|e| DeviceError::Enumerate(e.to_string()))?
    }

    async fn open_capture(&self, device: &DeviceDescriptor) -> Result<CpalCapture, DeviceError> {
        let name = device.id.clone();
        let config = StreamConfig {
            channels: device.input_channels.max(1),
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let (data_tx, data_rx) = mpsc::channel(CAPTURE_BACKLOG);

        let guard = spawn_stream(format!("capture {name}"), move || {
            build_capture(&name, &config, data_tx)
        })
        .await?;

        Ok(CpalCapture {
            data_rx,
            pending: VecDeque::new(),
            _guard: guard,
        })
    }

    async fn open_playback(&self) -> Result<CpalPlayback, DeviceError> {
        let config = StreamConfig {
            channels: 2,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let samples = Arc::new(SharedPcm::default());
        let failure = Arc::new(Mutex::new(None));

        let guard = {
            let samples = Arc::clone(&samples);
            let failure = Arc::clone(&failure);
            spawn_stream("playback".to_string(), move || {
                build_playback(&config, samples, failure)
            })
            .await?
        };

        Ok(CpalPlayback {
            samples,
            failure,
            _guard: guard,
        })
    }
}

/// Keeps a stream's thread alive; dropping it stops the stream
struct StreamGuard {
    _stop: std_mpsc::Sender<()>,
}

/// Build and start a stream on a dedicated thread, returning once it plays
async fn spawn_stream<F>(label: String, build: F) -> Result<StreamGuard, DeviceError>
where
    F: FnOnce() -> Result<cpal::Stream, DeviceError> + Send + 'static,
{
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    let thread_label = label.clone();

    thread::Builder::new()
        .name(format!("audio {label}"))
        .spawn(move || {
            let started = build().and_then(|stream| {
                stream
                    .play()
                    .map_err(|e| DeviceError::Stream(e.to_string()))?;
                Ok(stream)
            });
            let stream = match started {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Returns once the guard is dropped.
            let _ = stop_rx.recv();
            drop(stream);
            debug!(stream = %thread_label, "audio stream stopped");
        })
        .map_err(|e| DeviceError::Open {
            device: label,
            reason: e.to_string(),
        })?;

    ready_rx.await.map_err(|_| DeviceError::Closed)??;
    Ok(StreamGuard { _stop: stop_tx })
}

fn enumerate_inputs() -> Result<Vec<DeviceDescriptor>, DeviceError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| DeviceError::Enumerate(e.to_string()))?;

    Ok(devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let channels = device
                .default_input_config()
                .map(|config| config.channels())
                .unwrap_or(1);
            Some(DeviceDescriptor {
                id: name.clone(),
                name,
                input_channels: channels.clamp(1, 2),
            })
        })
        .collect())
}

fn find_input(name: &str) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();
    let mut devices = host
        .input_devices()
        .map_err(|e| DeviceError::Enumerate(e.to_string()))?;

    devices
        .find(|device| device.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| DeviceError::Open {
            device: name.to_string(),
            reason: "device not present".into(),
        })
}

fn build_capture(
    name: &str,
    config: &StreamConfig,
    data_tx: mpsc::Sender<CaptureData>,
) -> Result<cpal::Stream, DeviceError> {
    let device = find_input(name)?;
    let format = device
        .default_input_config()
        .map_err(|e| DeviceError::Open {
            device: name.to_string(),
            reason: e.to_string(),
        })?
        .sample_format();

    match format {
        SampleFormat::I16 => input_stream::<i16>(&device, config, data_tx),
        SampleFormat::U16 => input_stream::<u16>(&device, config, data_tx),
        SampleFormat::F32 => input_stream::<f32>(&device, config, data_tx),
        other => Err(DeviceError::Open {
            device: name.to_string(),
            reason: format!("unsupported sample format {other:?}"),
        }),
    }
}

fn input_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    data_tx: mpsc::Sender<CaptureData>,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let error_tx = data_tx.clone();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // A full channel means the sender is behind; drop the block.
                let _ = data_tx.try_send(Ok(encode_samples(data)));
            },
            move |err| {
                let _ = error_tx.try_send(Err(DeviceError::Stream(err.to_string())));
            },
            None,
        )
        .map_err(|e| DeviceError::Stream(e.to_string()))
}

fn build_playback(
    config: &StreamConfig,
    samples: Arc<SharedPcm>,
    failure: Arc<Mutex<Option<String>>>,
) -> Result<cpal::Stream, DeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| DeviceError::Open {
            device: "default output".into(),
            reason: "no output device".into(),
        })?;
    let format = device
        .default_output_config()
        .map_err(|e| DeviceError::Open {
            device: "default output".into(),
            reason: e.to_string(),
        })?
        .sample_format();

    match format {
        SampleFormat::I16 => output_stream::<i16>(&device, config, samples, failure),
        SampleFormat::U16 => output_stream::<u16>(&device, config, samples, failure),
        SampleFormat::F32 => output_stream::<f32>(&device, config, samples, failure),
        other => Err(DeviceError::Open {
            device: "default output".into(),
            reason: format!("unsupported sample format {other:?}"),
        }),
    }
}

fn output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    samples: Arc<SharedPcm>,
    failure: Arc<Mutex<Option<String>>>,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample + FromSample<i16>,
{
    device
        .build_output_stream(
            config,
            move |out: &mut [T], _: &cpal::OutputCallbackInfo| samples.fill(out),
            move |err| {
                warn!(%err, "playback stream error");
                *lock(&failure) = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| DeviceError::Stream(e.to_string()))
}

/// Convert a block of samples to s16le bytes
fn encode_samples<T>(data: &[T]) -> Vec<u8>
where
    T: Sample,
    i16: FromSample<T>,
{
    let mut bytes = Vec::with_capacity(data.len() * 2);
    for &sample in data {
        bytes.extend_from_slice(&i16::from_sample(sample).to_le_bytes());
    }
    bytes
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Interleaved samples waiting for the output callback
#[derive(Default)]
struct SharedPcm {
    samples: Mutex<VecDeque<i16>>,
}

impl SharedPcm {
    /// Append s16le bytes, dropping the oldest samples past the backlog
    fn push(&self, pcm: &[u8]) {
        let mut samples = lock(&self.samples);
        samples.extend(
            pcm.chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );
        let excess = samples.len().saturating_sub(PLAYBACK_BACKLOG);
        samples.drain(..excess);
    }

    /// Fill an output block, padding with silence on underrun
    fn fill<T>(&self, out: &mut [T])
    where
        T: Sample + FromSample<i16>,
    {
        let mut samples = lock(&self.samples);
        for slot in out.iter_mut() {
            *slot = T::from_sample(samples.pop_front().unwrap_or(0));
        }
    }
}

/// Running input stream
pub struct CpalCapture {
    data_rx: mpsc::Receiver<CaptureData>,
    pending: VecDeque<u8>,
    _guard: StreamGuard,
}

impl CaptureStream for CpalCapture {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<(), DeviceError> {
        // Bytes are only taken from `pending` once a whole chunk is there,
        // so a cancelled read loses nothing.
        while self.pending.len() < buf.len() {
            match self.data_rx.recv().await {
                Some(Ok(bytes)) => self.pending.extend(bytes),
                Some(Err(e)) => return Err(e),
                None => return Err(DeviceError::Closed),
            }
        }

        let len = buf.len();
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..len)) {
            *slot = byte;
        }
        Ok(())
    }
}

/// Running output stream
pub struct CpalPlayback {
    samples: Arc<SharedPcm>,
    failure: Arc<Mutex<Option<String>>>,
    _guard: StreamGuard,
}

impl PlaybackStream for CpalPlayback {
    async fn write(&mut self, pcm: &[u8]) -> Result<(), DeviceError> {
        if let Some(reason) = lock(&self.failure).take() {
            return Err(DeviceError::Stream(reason));
        }
        self.samples.push(pcm);
        Ok(())
    }
}
