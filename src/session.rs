//! Session lifecycle
//!
//! [`SessionController`] wires the pipelines, the multiplexer, the tool
//! bridge and the tracking engine together. One session runs at a time.
//! `stop()` clears the shared `running` flag and waits until every loop
//! has exited and both audio devices are released.

use bytes::Bytes;
use image::RgbImage;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::audio::{AudioFrame, AudioPipeline};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::events::{EventSink, SessionEvent};
use crate::network::{ConversationState, ProtocolMultiplexer};
use crate::protocol::AiState;
use crate::queue::{MediaQueue, OverflowPolicy, QueueStats};
use crate::tools::{ObjectDetector, ObjectIdentifier, ToolCallBridge, ToolHandler};
use crate::tracking::{TemplateBackend, TemplateConfig, TrackingEngine};
use crate::video::{FrameSlot, VideoPipeline};

struct ActiveSession {
    session_task: JoinHandle<()>,
    ticker_task: JoinHandle<()>,
    audio_in: Arc<MediaQueue<AudioFrame>>,
    audio_out: Arc<MediaQueue<Bytes>>,
}

/// Snapshot reported by the control API
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub running: bool,
    pub ai_state: AiState,
    pub endpoint: String,
    pub trackers: usize,
    pub active_trackers: usize,
    pub video_queue: QueueStats,
    pub frames_encoded: u64,
}

/// Top-level owner of one live session at a time
pub struct SessionController {
    config: AppConfig,
    events: EventSink,
    tracking: Arc<TrackingEngine>,
    video: Arc<VideoPipeline>,
    tools: Arc<dyn ToolHandler>,
    state: Arc<ConversationState>,
    running: Arc<AtomicBool>,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionController {
    /// Build a controller around the given vision collaborators
    pub fn new(
        config: AppConfig,
        detector: Arc<dyn ObjectDetector>,
        identifier: Arc<dyn ObjectIdentifier>,
    ) -> Self {
        let events = EventSink::default();

        let backend = TemplateBackend {
            config: TemplateConfig {
                search_radius: config.tracking.search_radius,
                max_mean_diff: config.tracking.max_mean_diff,
                ..TemplateConfig::default()
            },
        };
        let tracking = Arc::new(TrackingEngine::new(Arc::new(backend)));
        let video = Arc::new(VideoPipeline::new(&config.video));

        let tools: Arc<dyn ToolHandler> = Arc::new(
            ToolCallBridge::new(
                detector,
                identifier,
                tracking.clone(),
                video.frames(),
                events.clone(),
            )
            .with_match_threshold(config.tracking.match_threshold)
            .with_top_k(config.tracking.top_k),
        );

        Self {
            state: Arc::new(ConversationState::new(events.clone())),
            config,
            events,
            tracking,
            video,
            tools,
            running: Arc::new(AtomicBool::new(false)),
            active: Mutex::new(None),
        }
    }

    /// Replace the tool handler
    pub fn with_tools(mut self, tools: Arc<dyn ToolHandler>) -> Self {
        self.tools = tools;
        self
    }

    /// Start a session against the configured endpoint
    pub async fn start(&self) -> Result<()> {
        let mut active = self.active.lock().await;

        if let Some(previous) = active.as_ref() {
            if !previous.session_task.is_finished() {
                return Err(Error::Session("session already running".to_string()));
            }
        }
        // Reap a session that ended on its own
        if let Some(previous) = active.take() {
            let _ = previous.session_task.await;
            let _ = previous.ticker_task.await;
        }

        tracing::info!("Starting session with {}", self.config.session.endpoint);
        self.running.store(true, Ordering::SeqCst);

        let audio_config = self.config.audio.clone();
        let audio_in = MediaQueue::shared(audio_config.input_queue_capacity, OverflowPolicy::Block);
        let audio_out = MediaQueue::shared(audio_config.output_queue_capacity, OverflowPolicy::Block);

        let audio = if audio_config.enabled {
            let mut pipeline = AudioPipeline::new(
                audio_config,
                audio_in.clone(),
                audio_out.clone(),
                self.events.clone(),
            );
            let pipeline = tokio::task::spawn_blocking(move || {
                pipeline.start_configured();
                pipeline
            })
            .await
            .map_err(|e| Error::Session(format!("audio start panicked: {}", e)))?;

            if !pipeline.is_playing() {
                // Nothing drains the playback queue
                audio_out.close();
            }
            Some(pipeline)
        } else {
            tracing::info!("Audio disabled");
            audio_in.close();
            audio_out.close();
            None
        };

        self.video.activate();

        let mux = ProtocolMultiplexer::new(
            self.config.protocol.clone(),
            self.config.session.api_key.clone(),
            self.running.clone(),
            audio_in.clone(),
            audio_out.clone(),
            self.video.clone(),
            self.tools.clone(),
            self.state.clone(),
            self.events.clone(),
        );

        let endpoint = self.config.session.endpoint.clone();
        let teardown = Teardown {
            running: self.running.clone(),
            audio,
            audio_in: audio_in.clone(),
            audio_out: audio_out.clone(),
            video: self.video.clone(),
            tracking: self.tracking.clone(),
        };
        let session_task = tokio::spawn(async move {
            if let Err(e) = mux.run(&endpoint).await {
                tracing::warn!("Session ended with error: {}", e);
            }
            teardown.run().await;
        });

        let ticker_task = tokio::spawn(tracking_ticker(
            self.running.clone(),
            self.tracking.clone(),
            self.video.frames(),
            self.events.clone(),
            self.config.tracking.tick(),
        ));

        *active = Some(ActiveSession {
            session_task,
            ticker_task,
            audio_in,
            audio_out,
        });
        Ok(())
    }

    /// Stop the session. Returns after all loops have exited and the audio
    /// devices are released. Does nothing if no session is running.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        let Some(session) = active.take() else {
            return;
        };

        tracing::info!("Stopping session");
        self.running.store(false, Ordering::SeqCst);

        // Release anything waiting on a full queue
        session.audio_in.close();
        session.audio_out.close();

        if let Err(e) = session.session_task.await {
            tracing::error!("Session task failed: {}", e);
        }
        if let Err(e) = session.ticker_task.await {
            tracing::error!("Tracking ticker failed: {}", e);
        }
        tracing::info!("Session stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Submit a camera frame; see [`VideoPipeline::submit_frame`]
    pub fn submit_frame(&self, frame: &RgbImage) -> bool {
        self.video.submit_frame(frame)
    }

    pub fn submit_owned_frame(&self, frame: RgbImage) -> bool {
        self.video.submit_owned(frame)
    }

    pub fn ai_state(&self) -> AiState {
        self.state.ai_state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn tracking(&self) -> &Arc<TrackingEngine> {
        &self.tracking
    }

    pub fn frames(&self) -> FrameSlot {
        self.video.frames()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            running: self.is_running(),
            ai_state: self.ai_state(),
            endpoint: self.config.session.endpoint.clone(),
            trackers: self.tracking.len(),
            active_trackers: self.tracking.list_active().len(),
            video_queue: self.video.queue_stats(),
            frames_encoded: self.video.encoder_stats().frames_encoded,
        }
    }
}

/// Cleanup run once the multiplexer has returned, whatever the reason
struct Teardown {
    running: Arc<AtomicBool>,
    audio: Option<AudioPipeline>,
    audio_in: Arc<MediaQueue<AudioFrame>>,
    audio_out: Arc<MediaQueue<Bytes>>,
    video: Arc<VideoPipeline>,
    tracking: Arc<TrackingEngine>,
}

impl Teardown {
    async fn run(self) {
        self.running.store(false, Ordering::SeqCst);
        self.audio_in.close();
        self.audio_out.close();
        self.video.deactivate();

        if let Some(mut audio) = self.audio {
            if let Err(e) = tokio::task::spawn_blocking(move || audio.stop()).await {
                tracing::error!("Audio shutdown failed: {}", e);
            }
        }

        let removed = self.tracking.remove_all();
        if removed > 0 {
            tracing::info!("Removed {} trackers", removed);
        }
    }
}

/// Update every tracker against the latest frame once per tick
async fn tracking_ticker(
    running: Arc<AtomicBool>,
    tracking: Arc<TrackingEngine>,
    frames: FrameSlot,
    events: EventSink,
    tick: std::time::Duration,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_sequence = None;
    let mut passes = 0u64;

    while running.load(Ordering::SeqCst) {
        interval.tick().await;

        if tracking.is_empty() {
            continue;
        }
        let Some(frame) = frames.latest() else {
            continue;
        };
        if last_sequence == Some(frame.sequence) {
            continue;
        }
        last_sequence = Some(frame.sequence);

        let engine = tracking.clone();
        match tokio::task::spawn_blocking(move || engine.update_all(&frame.image)).await {
            Ok(updates) if !updates.is_empty() => {
                passes += 1;
                events.emit(SessionEvent::Tracking { updates });
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Tracking update failed: {}", e),
        }
    }

    tracing::debug!("Tracking ticker exited after {} passes", passes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::DisabledVision;
    use crate::tracking::BoundingBox;
    use image::Rgb;
    use std::time::Duration;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.audio.enabled = false;
        // Nothing listens here
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        config.session.endpoint = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);
        config.protocol.connect_timeout_ms = 500;
        config
    }

    fn controller(config: AppConfig) -> SessionController {
        SessionController::new(config, Arc::new(DisabledVision), Arc::new(DisabledVision))
    }

    #[tokio::test]
    async fn test_connection_failure_reports_status_and_stops() {
        let controller = controller(offline_config());
        let mut rx = controller.subscribe();

        controller.start().await.unwrap();
        controller.stop().await;
        assert!(!controller.is_running());
        assert_eq!(controller.ai_state(), AiState::Idle);

        let mut saw_failure = false;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::Status { message } = event {
                saw_failure |= message.starts_with("Connection failed");
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let controller = controller(offline_config());
        controller.stop().await;
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn test_session_end_removes_trackers() {
        let controller = controller(offline_config());
        let frame = RgbImage::from_fn(64, 48, |x, y| Rgb([x as u8 * 4, y as u8 * 5, 0]));
        controller.submit_frame(&frame);
        controller
            .tracking()
            .create(&frame, BoundingBox::new(0.25, 0.25, 0.5, 0.5), "box")
            .unwrap();

        controller.start().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), controller.stop())
            .await
            .unwrap();

        assert!(controller.tracking().is_empty());
    }

    /// Peer that greets the client, then records every message type until
    /// the client closes
    async fn recording_peer(listener: tokio::net::TcpListener) -> Vec<String> {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        let mut kinds = Vec::new();
        let mut greeted = false;

        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            kinds.push(value["type"].as_str().unwrap_or_default().to_string());

            if !greeted {
                greeted = true;
                let status = r#"{"type":"STATUS","payload":{"status":"connected"}}"#;
                ws.send(Message::Text(status.to_string())).await.unwrap();
            }
        }
        kinds
    }

    #[tokio::test]
    async fn test_stop_joins_live_session() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = offline_config();
        config.session.endpoint = format!("ws://{}", listener.local_addr().unwrap());
        let peer = tokio::spawn(recording_peer(listener));

        let controller = controller(config);
        let mut rx = controller.subscribe();

        let frame = RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 90]));
        controller
            .tracking()
            .create(&frame, BoundingBox::new(0.25, 0.25, 0.5, 0.5), "box")
            .unwrap();

        controller.start().await.unwrap();
        controller.submit_frame(&frame);

        // Wait for the handshake and one tracking pass
        let mut connected = false;
        let mut tracked = false;
        tokio::time::timeout(Duration::from_secs(5), async {
            while !(connected && tracked) {
                match rx.recv().await {
                    Ok(SessionEvent::Status { message }) => {
                        connected |= message == "Connected! You can start talking.";
                    }
                    Ok(SessionEvent::Tracking { .. }) => tracked = true,
                    Ok(_) => {}
                    Err(e) => panic!("event stream ended: {}", e),
                }
            }
        })
        .await
        .unwrap();
        assert!(controller.is_running());
        assert_eq!(controller.ai_state(), AiState::Listening);

        tokio::time::timeout(Duration::from_secs(5), controller.stop())
            .await
            .unwrap();

        assert!(!controller.is_running());
        assert_eq!(controller.ai_state(), AiState::Idle);
        assert!(controller.tracking().is_empty());

        let kinds = tokio::time::timeout(Duration::from_secs(5), peer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kinds.first().map(String::as_str), Some("START_SESSION"));
        assert_eq!(kinds.last().map(String::as_str), Some("STOP_SESSION"));
    }

    #[test]
    fn test_frames_outside_session_only_update_latest() {
        let controller = controller(offline_config());
        assert!(!controller.submit_frame(&RgbImage::new(4, 4)));
        assert!(controller.frames().latest().is_some());
        assert_eq!(controller.status().video_queue.len, 0);
    }
}
