//! Microphone and speaker lifecycle for one session

use bytes::Bytes;
use std::sync::Arc;

use crate::audio::buffer::AudioFrame;
use crate::audio::capture::AudioCapture;
use crate::audio::playback::AudioPlayback;
use crate::config::AudioConfig;
use crate::events::EventSink;
use crate::queue::MediaQueue;

/// Owns the capture and playback halves.
///
/// Device failures are reported as status events and leave the other half
/// (and the rest of the session) running.
pub struct AudioPipeline {
    config: AudioConfig,
    input: Arc<MediaQueue<AudioFrame>>,
    output: Arc<MediaQueue<Bytes>>,
    events: EventSink,
    capture: Option<AudioCapture>,
    playback: Option<AudioPlayback>,
}

impl AudioPipeline {
    /// `input` receives captured frames; `output` is drained to the speaker
    pub fn new(
        config: AudioConfig,
        input: Arc<MediaQueue<AudioFrame>>,
        output: Arc<MediaQueue<Bytes>>,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            input,
            output,
            events,
            capture: None,
            playback: None,
        }
    }

    /// Open both devices. Never fails; a device that cannot be opened is
    /// reported and skipped.
    pub fn start(&mut self, sample_rate_in: u32, sample_rate_out: u32, frame_size: usize) {
        self.stop();

        let mut capture = AudioCapture::new(
            self.config.input_device.as_deref(),
            sample_rate_in,
            frame_size,
            self.input.clone(),
            self.events.clone(),
        );
        match capture.start() {
            Ok(()) => self.capture = Some(capture),
            Err(e) => {
                tracing::warn!("Microphone unavailable: {}", e);
                self.events.status(format!("Microphone error: {}", e));
            }
        }

        let mut playback = AudioPlayback::new(
            self.config.output_device.as_deref(),
            sample_rate_out,
            self.config.playback_pop_timeout(),
            self.output.clone(),
            self.events.clone(),
        );
        match playback.start() {
            Ok(()) => self.playback = Some(playback),
            Err(e) => {
                tracing::warn!("Speaker unavailable: {}", e);
                self.events.status(format!("Speaker error: {}", e));
            }
        }
    }

    /// Start with the configured rates and frame size
    pub fn start_configured(&mut self) {
        let (rate_in, rate_out, frame_size) = (
            self.config.input_sample_rate,
            self.config.output_sample_rate,
            self.config.frame_size,
        );
        self.start(rate_in, rate_out, frame_size);
    }

    /// Stop and release both streams. Returns once both device threads
    /// have exited.
    pub fn stop(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.as_ref().map(|c| c.is_running()).unwrap_or(false)
    }

    pub fn is_playing(&self) -> bool {
        self.playback.as_ref().map(|p| p.is_running()).unwrap_or(false)
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SessionEvent;
    use crate::queue::OverflowPolicy;

    #[test]
    fn test_missing_devices_become_status_events() {
        let events = EventSink::default();
        let mut rx = events.subscribe();

        let config = AudioConfig {
            input_device: Some("input:no-such-device".into()),
            output_device: Some("output:no-such-device".into()),
            ..AudioConfig::default()
        };
        let mut pipeline = AudioPipeline::new(
            config,
            MediaQueue::shared(4, OverflowPolicy::Block),
            MediaQueue::shared(4, OverflowPolicy::Block),
            events,
        );

        pipeline.start_configured();
        assert!(!pipeline.is_capturing());
        assert!(!pipeline.is_playing());

        let mut messages = Vec::new();
        while let Ok(SessionEvent::Status { message }) = rx.try_recv() {
            messages.push(message);
        }
        assert!(messages.iter().any(|m| m.starts_with("Microphone error")));
        assert!(messages.iter().any(|m| m.starts_with("Speaker error")));

        pipeline.stop();
    }
}
