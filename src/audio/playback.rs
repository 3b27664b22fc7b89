//! Speaker playback
//!
//! A dedicated thread owns the output stream and drains the output queue
//! into a [`SampleRing`]; the device callback reads the ring.

use bytes::Bytes;
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{SampleRing, SharedSampleRing};
use crate::audio::device::resolve_device;
use crate::codec::pcm16_to_f32;
use crate::error::AudioError;
use crate::events::EventSink;
use crate::queue::MediaQueue;

const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while the ring is full
const RING_FULL_BACKOFF: Duration = Duration::from_millis(5);

/// Move one PCM16 buffer into the ring, waiting for room while `running`.
/// Returns the number of samples written.
pub(crate) fn write_to_ring(pcm: &[u8], ring: &SampleRing, running: &AtomicBool) -> usize {
    let samples = match pcm16_to_f32(pcm) {
        Ok(samples) => samples,
        Err(e) => {
            tracing::warn!("Skipping playback buffer: {}", e);
            return 0;
        }
    };

    let mut written = 0;
    while written < samples.len() {
        written += ring.push_slice(&samples[written..]);
        if written < samples.len() {
            if !running.load(Ordering::Relaxed) {
                break;
            }
            thread::sleep(RING_FULL_BACKOFF);
        }
    }
    written
}

/// Feed the ring from `input` until `running` clears or the queue is
/// closed and drained
pub(crate) fn pump(
    input: &MediaQueue<Bytes>,
    ring: &SampleRing,
    running: &AtomicBool,
    pop_timeout: Duration,
    samples_played: &AtomicU64,
) {
    while running.load(Ordering::Relaxed) {
        match input.pop(pop_timeout) {
            Some(pcm) => {
                let written = write_to_ring(&pcm, ring, running);
                samples_played.fetch_add(written as u64, Ordering::Relaxed);
            }
            None if input.is_closed() => {
                tracing::debug!("Playback queue closed");
                break;
            }
            None => {}
        }
    }
}

/// Speaker playback fed from the audio output queue
pub struct AudioPlayback {
    device_id: Option<String>,
    sample_rate: u32,
    pop_timeout: Duration,
    input: Arc<MediaQueue<Bytes>>,
    events: EventSink,
    ring: SharedSampleRing,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    samples_played: Arc<AtomicU64>,
}

impl AudioPlayback {
    pub fn new(
        device_id: Option<&str>,
        sample_rate: u32,
        pop_timeout: Duration,
        input: Arc<MediaQueue<Bytes>>,
        events: EventSink,
    ) -> Self {
        Self {
            device_id: device_id.map(str::to_string),
            sample_rate,
            pop_timeout,
            input,
            events,
            // Half a second of audio
            ring: Arc::new(SampleRing::new((sample_rate as usize / 2).max(1024))),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            samples_played: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open the output device and start the playback loop
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        self.running.store(true, Ordering::SeqCst);

        let device_id = self.device_id.clone();
        let sample_rate = self.sample_rate;
        let pop_timeout = self.pop_timeout;
        let running = self.running.clone();
        let input = self.input.clone();
        let events = self.events.clone();
        let ring = self.ring.clone();
        let ring_for_callback = self.ring.clone();
        let samples_played = self.samples_played.clone();

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let opened = resolve_device(device_id.as_deref(), false).and_then(|device| {
                    let config = device.stream_config(sample_rate)?;
                    let channels = usize::from(config.channels).max(1);
                    tracing::info!(
                        "Opening speaker '{}' at {} Hz ({} channel(s))",
                        device.name,
                        sample_rate,
                        channels
                    );

                    let stream = device
                        .into_inner()
                        .build_output_stream(
                            &config,
                            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                // Mono source duplicated across channels
                                for frame in data.chunks_mut(channels) {
                                    frame.fill(ring_for_callback.pop_or_silence());
                                }
                            },
                            move |err| {
                                events.status(format!("Speaker error: {}", err));
                            },
                            None,
                        )
                        .map_err(|e| AudioError::StreamError(e.to_string()))?;

                    stream
                        .play()
                        .map_err(|e| AudioError::StreamError(e.to_string()))?;
                    Ok(stream)
                });

                let stream = match opened {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                pump(&input, &ring, &running, pop_timeout, &samples_played);

                drop(stream);
                tracing::debug!("Speaker stream released");
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        let result = ready_rx
            .recv_timeout(STREAM_OPEN_TIMEOUT)
            .unwrap_or_else(|_| {
                Err(AudioError::StreamError(
                    "timed out opening output stream".to_string(),
                ))
            });

        if result.is_err() {
            self.stop();
        }
        result
    }

    /// Stop playback. Returns within one pop timeout; blocks until the
    /// playback thread has exited.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!(
                "Speaker stopped after {} samples ({} underruns)",
                self.samples_played(),
                self.ring.underrun_count()
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Samples handed to the device ring since creation
    pub fn samples_played(&self) -> u64 {
        self.samples_played.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::f32_to_pcm16;
    use crate::queue::OverflowPolicy;

    #[test]
    fn test_write_to_ring() {
        let ring = SampleRing::new(8);
        let running = AtomicBool::new(true);

        let pcm = f32_to_pcm16(&[0.25, -0.25, 0.5]);
        assert_eq!(write_to_ring(&pcm, &ring, &running), 3);
        assert_eq!(ring.len(), 3);
        assert!((ring.pop_or_silence() - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_write_to_ring_gives_up_when_stopped() {
        let ring = SampleRing::new(2);
        let running = AtomicBool::new(false);

        let pcm = f32_to_pcm16(&[0.1; 5]);
        assert_eq!(write_to_ring(&pcm, &ring, &running), 2);
    }

    #[test]
    fn test_write_to_ring_skips_odd_buffer() {
        let ring = SampleRing::new(8);
        let running = AtomicBool::new(true);
        assert_eq!(write_to_ring(&[0u8, 1, 2], &ring, &running), 0);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_pump_exits_once_queue_closed_and_drained() {
        let queue = MediaQueue::new(4, OverflowPolicy::Block);
        let ring = SampleRing::new(64);
        let running = AtomicBool::new(true);
        let played = AtomicU64::new(0);

        assert!(queue.push(f32_to_pcm16(&[0.1; 6])));
        queue.close();

        // Long pop timeout: returning at all shows the loop noticed the close
        pump(&queue, &ring, &running, Duration::from_secs(60), &played);

        assert!(running.load(Ordering::SeqCst));
        assert_eq!(played.load(Ordering::SeqCst), 6);
        assert_eq!(ring.len(), 6);
    }

    #[test]
    fn test_playback_without_device_reports_error() {
        let queue = MediaQueue::shared(4, OverflowPolicy::Block);
        let mut playback = AudioPlayback::new(
            Some("output:no-such-device"),
            24_000,
            Duration::from_millis(10),
            queue,
            EventSink::default(),
        );
        assert!(playback.start().is_err());
        assert!(!playback.is_running());
    }
}
