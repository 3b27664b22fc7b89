//! Microphone capture
//!
//! The cpal stream lives on a dedicated thread for its whole lifetime. The
//! hardware callback downmixes to mono, cuts fixed-size frames and hands
//! them to the input queue without ever waiting on it.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::AudioFrame;
use crate::audio::device::resolve_device;
use crate::error::AudioError;
use crate::events::EventSink;
use crate::queue::MediaQueue;

/// How long `start` waits for the device thread to open its stream
const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Cuts mono samples into frames and forwards them to the queue.
///
/// Frames the queue cannot take yet are kept in a backlog and retried on
/// the next callback, so capture order is preserved. The backlog holds at
/// most `max_backlog` frames; past that the oldest frame is dropped.
pub(crate) struct Framer {
    frame_size: usize,
    max_backlog: usize,
    pending: Vec<f32>,
    backlog: VecDeque<AudioFrame>,
    sequence: Arc<AtomicU32>,
    dropped: u64,
}

impl Framer {
    pub(crate) fn new(frame_size: usize, max_backlog: usize, sequence: Arc<AtomicU32>) -> Self {
        let frame_size = frame_size.max(1);
        let max_backlog = max_backlog.max(1);
        Self {
            frame_size,
            max_backlog,
            pending: Vec::with_capacity(frame_size * 2),
            backlog: VecDeque::with_capacity(max_backlog),
            sequence,
            dropped: 0,
        }
    }

    /// Accept one interleaved callback block of `channels` channels.
    /// Returns how many frames were dropped because the backlog was full.
    pub(crate) fn feed(
        &mut self,
        data: &[f32],
        channels: usize,
        output: &MediaQueue<AudioFrame>,
    ) -> usize {
        self.pending
            .extend(data.iter().step_by(channels.max(1)).copied());

        let mut dropped = 0;
        while self.pending.len() >= self.frame_size {
            let frame = AudioFrame::from_f32(
                &self.pending[..self.frame_size],
                self.sequence.fetch_add(1, Ordering::Relaxed),
            );
            self.pending.drain(..self.frame_size);
            if self.backlog.len() >= self.max_backlog {
                self.backlog.pop_front();
                dropped += 1;
            }
            self.backlog.push_back(frame);
        }

        while let Some(frame) = self.backlog.pop_front() {
            if let Err(frame) = output.try_push(frame) {
                self.backlog.push_front(frame);
                break;
            }
        }

        self.dropped += dropped as u64;
        dropped
    }

    pub(crate) fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Frames dropped since creation
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Microphone capture into the audio input queue
pub struct AudioCapture {
    device_id: Option<String>,
    sample_rate: u32,
    frame_size: usize,
    output: Arc<MediaQueue<AudioFrame>>,
    events: EventSink,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sequence: Arc<AtomicU32>,
    samples_captured: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
}

impl AudioCapture {
    pub fn new(
        device_id: Option<&str>,
        sample_rate: u32,
        frame_size: usize,
        output: Arc<MediaQueue<AudioFrame>>,
        events: EventSink,
    ) -> Self {
        Self {
            device_id: device_id.map(str::to_string),
            sample_rate,
            frame_size,
            output,
            events,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            sequence: Arc::new(AtomicU32::new(0)),
            samples_captured: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open the input device and start capturing.
    ///
    /// Returns once the stream is playing, or with the error that kept it
    /// from opening.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        self.sequence.store(0, Ordering::SeqCst);
        self.samples_captured.store(0, Ordering::SeqCst);
        self.frames_dropped.store(0, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let device_id = self.device_id.clone();
        let sample_rate = self.sample_rate;
        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let output = self.output.clone();
        let events = self.events.clone();
        let samples_captured = self.samples_captured.clone();
        let frames_dropped = self.frames_dropped.clone();
        let backlog_events = self.events.clone();
        // Up to one queue's worth of frames waits locally
        let mut framer = Framer::new(self.frame_size, self.output.capacity(), self.sequence.clone());
        let mut overflowing = false;

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let opened = resolve_device(device_id.as_deref(), true).and_then(|device| {
                    let config = device.stream_config(sample_rate)?;
                    let channels = usize::from(config.channels);
                    tracing::info!(
                        "Opening microphone '{}' at {} Hz ({} channel(s))",
                        device.name,
                        sample_rate,
                        channels
                    );

                    let stream = device
                        .into_inner()
                        .build_input_stream(
                            &config,
                            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                                if !running.load(Ordering::Relaxed) {
                                    return;
                                }
                                samples_captured
                                    .fetch_add((data.len() / channels.max(1)) as u64, Ordering::Relaxed);
                                let dropped = framer.feed(data, channels, &output);
                                if dropped > 0 {
                                    frames_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
                                    if !overflowing {
                                        overflowing = true;
                                        backlog_events.status("Microphone backlog full, dropping audio");
                                    }
                                } else if framer.backlog_len() == 0 {
                                    overflowing = false;
                                }
                            },
                            move |err| {
                                events.status(format!("Microphone error: {}", err));
                            },
                            None,
                        )
                        .map_err(|e| AudioError::StreamError(e.to_string()))?;

                    stream
                        .play()
                        .map_err(|e| AudioError::StreamError(e.to_string()))?;
                    Ok(stream)
                });

                match opened {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));

                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }

                        // Dropping the stream releases the device
                        drop(stream);
                        tracing::debug!("Microphone stream released");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        let result = ready_rx
            .recv_timeout(STREAM_OPEN_TIMEOUT)
            .unwrap_or_else(|_| {
                Err(AudioError::StreamError(
                    "timed out opening input stream".to_string(),
                ))
            });

        if result.is_err() {
            self.stop();
        }
        result
    }

    /// Stop capturing and release the device. Blocks until the stream
    /// thread has exited.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!(
                "Microphone stopped after {} frames ({} samples, {} dropped)",
                self.frames_captured(),
                self.samples_captured(),
                self.frames_dropped()
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Frames produced since `start`
    pub fn frames_captured(&self) -> u32 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Frames discarded because the send side fell behind
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Mono samples seen since `start`
    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::pcm16_to_f32;
    use crate::queue::OverflowPolicy;

    #[test]
    fn test_framer_cuts_fixed_frames_in_order() {
        let queue = MediaQueue::new(16, OverflowPolicy::Block);
        let mut framer = Framer::new(4, 16, Arc::new(AtomicU32::new(0)));

        framer.feed(&[0.1, 0.2, 0.3], 1, &queue);
        assert!(queue.is_empty());

        framer.feed(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9], 1, &queue);
        assert_eq!(queue.len(), 2);

        let first = queue.try_pop().unwrap();
        let second = queue.try_pop().unwrap();
        assert_eq!(first.sequence(), 0);
        assert_eq!(second.sequence(), 1);
        assert_eq!(first.sample_count(), 4);

        let samples = pcm16_to_f32(first.pcm()).unwrap();
        assert!((samples[0] - 0.1).abs() < 1e-3);
        assert!((samples[3] - 0.4).abs() < 1e-3);
    }

    #[test]
    fn test_framer_takes_first_channel() {
        let queue = MediaQueue::new(4, OverflowPolicy::Block);
        let mut framer = Framer::new(2, 4, Arc::new(AtomicU32::new(0)));

        // Interleaved stereo: left is 0.5, right is -0.5
        framer.feed(&[0.5, -0.5, 0.5, -0.5], 2, &queue);

        let samples = pcm16_to_f32(queue.try_pop().unwrap().pcm()).unwrap();
        assert!(samples.iter().all(|s| (s - 0.5).abs() < 1e-3));
    }

    #[test]
    fn test_framer_keeps_backlog_when_queue_full() {
        let queue = MediaQueue::new(1, OverflowPolicy::Block);
        let mut framer = Framer::new(1, 4, Arc::new(AtomicU32::new(0)));

        framer.feed(&[0.0, 0.1, 0.2], 1, &queue);
        assert_eq!(queue.len(), 1);
        assert_eq!(framer.backlog_len(), 2);

        let mut sequences = vec![queue.try_pop().unwrap().sequence()];
        framer.feed(&[], 1, &queue);
        sequences.push(queue.try_pop().unwrap().sequence());
        framer.feed(&[], 1, &queue);
        sequences.push(queue.try_pop().unwrap().sequence());

        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(framer.backlog_len(), 0);
    }

    #[test]
    fn test_framer_backlog_is_capped() {
        let queue = MediaQueue::new(4, OverflowPolicy::Block);
        let mut framer = Framer::new(1600, 4, Arc::new(AtomicU32::new(0)));

        // No consumer: ten minutes of 16 kHz input in 1600-sample blocks
        let block = [0.2f32; 1600];
        let mut dropped = 0;
        for _ in 0..6000 {
            dropped += framer.feed(&block, 1, &queue);
            assert!(framer.backlog_len() <= 4);
        }

        assert_eq!(queue.len(), 4);
        assert_eq!(framer.backlog_len(), 4);
        // 6000 frames cut, eight of them held
        assert_eq!(dropped, 6000 - 8);
        assert_eq!(framer.dropped(), dropped as u64);

        // The oldest backlog frames were the ones dropped
        queue.clear();
        framer.feed(&[], 1, &queue);
        let first = queue.try_pop().unwrap().sequence();
        assert_eq!(first, 6000 - 4);
    }

    #[test]
    fn test_capture_without_device_reports_error() {
        // Passes on machines with or without a microphone
        let queue = MediaQueue::shared(4, OverflowPolicy::Block);
        let mut capture = AudioCapture::new(
            Some("input:no-such-device"),
            16_000,
            1024,
            queue,
            EventSink::default(),
        );
        assert!(capture.start().is_err());
        assert!(!capture.is_running());
    }
}
