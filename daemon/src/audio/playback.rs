//! Playback hand-off and PCM channel processing
//!
//! The receive task pushes reordered chunks into a [`PlaybackQueue`]; the
//! playback task pops them, silences the muted channel and writes them to the
//! sink. Pushing never waits: a full queue drops its oldest chunk.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::trace;

use crate::state::Muting;

/// Bytes per interleaved s16 stereo frame
const FRAME_BYTES: usize = 4;

/// Bounded single-producer, single-consumer queue of PCM chunks
#[derive(Debug)]
pub struct PlaybackQueue {
    chunks: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    ready: Notify,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chunks: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            ready: Notify::new(),
        }
    }

    /// Append a chunk, evicting the oldest when full. Returns true if a
    /// chunk was evicted.
    pub fn push(&self, chunk: Vec<u8>) -> bool {
        let evicted = {
            let mut chunks = self.lock();
            let evicted = if chunks.len() >= self.capacity {
                chunks.pop_front();
                true
            } else {
                false
            };
            chunks.push_back(chunk);
            evicted
        };

        if evicted {
            trace!("playback queue full, evicted oldest chunk");
        }
        self.ready.notify_one();
        evicted
    }

    pub fn pop(&self) -> Option<Vec<u8>> {
        self.lock().pop_front()
    }

    /// Wait until a chunk is available and take it
    pub async fn next(&self) -> Vec<u8> {
        loop {
            if let Some(chunk) = self.pop() {
                return chunk;
            }
            self.ready.notified().await;
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Vec<u8>>> {
        // A panic while holding the lock leaves only plain PCM behind.
        self.chunks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Silence one or both channels of interleaved s16le stereo PCM in place
pub fn apply_muting(pcm: &mut [u8], muting: Muting) {
    let range = match muting {
        Muting::Left => 0..2,
        Muting::Right => 2..4,
        Muting::Both => 0..4,
    };

    for frame in pcm.chunks_exact_mut(FRAME_BYTES) {
        frame[range.clone()].fill(0);
    }
}

/// Duplicate mono s16le samples into both stereo channels
pub fn mono_to_stereo(pcm: &[u8]) -> Vec<u8> {
    let mut stereo = Vec::with_capacity(pcm.len() * 2);
    for sample in pcm.chunks_exact(2) {
        stereo.extend_from_slice(sample);
        stereo.extend_from_slice(sample);
    }
    stereo
}
