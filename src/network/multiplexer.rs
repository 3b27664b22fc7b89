//! Protocol multiplexer
//!
//! Runs the three session loops over one duplex connection:
//!
//! - send-audio: drains captured frames as `SEND_AUDIO`
//! - send-video: sends at most one encoded frame per interval as `SEND_VIDEO`
//! - receive: decodes peer messages and dispatches them
//!
//! All three stop when the shared `running` flag clears. Each observes it
//! within one of its own timeouts.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use crate::audio::AudioFrame;
use crate::config::ProtocolConfig;
use crate::error::{NetworkError, ProtocolError};
use crate::events::EventSink;
use crate::network::connection::{self, ConnectionWriter};
use crate::network::state::ConversationState;
use crate::protocol::{AiState, ClientMessage, ServerMessage, ToolCall, STATUS_CONNECTED};
use crate::queue::MediaQueue;
use crate::tools::ToolHandler;
use crate::video::VideoPipeline;

/// Pause when the audio queue is empty
const AUDIO_IDLE_YIELD: Duration = Duration::from_millis(10);

/// Log a progress line every this many items
const PROGRESS_EVERY: u64 = 100;

/// Everything the loops share, wired by the session controller
pub struct ProtocolMultiplexer {
    config: ProtocolConfig,
    api_key: String,
    running: Arc<AtomicBool>,
    audio_in: Arc<MediaQueue<AudioFrame>>,
    audio_out: Arc<MediaQueue<Bytes>>,
    video: Arc<VideoPipeline>,
    tools: Arc<dyn ToolHandler>,
    state: Arc<ConversationState>,
    events: EventSink,
}

impl ProtocolMultiplexer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ProtocolConfig,
        api_key: String,
        running: Arc<AtomicBool>,
        audio_in: Arc<MediaQueue<AudioFrame>>,
        audio_out: Arc<MediaQueue<Bytes>>,
        video: Arc<VideoPipeline>,
        tools: Arc<dyn ToolHandler>,
        state: Arc<ConversationState>,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            api_key,
            running,
            audio_in,
            audio_out,
            video,
            tools,
            state,
            events,
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Transport failure: end every loop
    fn fail(&self, message: String) {
        tracing::error!("{}", message);
        self.events.status(message);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Connect to `url` and run the session until `running` clears or the
    /// connection fails
    pub async fn run(&self, url: &str) -> Result<(), NetworkError> {
        self.events.status(format!("Connecting to {}...", url));

        let stream = match connection::connect(url, self.config.connect_timeout()).await {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(format!("Connection failed: {}", e));
                self.state.reset();
                return Err(e);
            }
        };

        self.run_with(stream).await
    }

    /// Run the session over an already-open WebSocket
    pub async fn run_with<T>(&self, stream: WebSocketStream<T>) -> Result<(), NetworkError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = stream.split();
        let (writer, writer_task) = ConnectionWriter::spawn(sink);

        let handshake = writer
            .send_timeout(
                &ClientMessage::StartSession {
                    api_key: self.api_key.clone(),
                },
                self.config.send_timeout(),
            )
            .await;

        let result = match handshake {
            Ok(()) => {
                tracing::info!("Session requested, starting loops");
                tokio::join!(
                    self.send_audio_loop(&writer),
                    self.send_video_loop(&writer),
                    self.receive_loop(stream, &writer),
                );
                Ok(())
            }
            Err(e) => {
                self.fail(format!("Failed to start session: {}", e));
                Err(e)
            }
        };

        // Best effort; the peer may already be gone
        if let Err(e) = writer
            .send_timeout(&ClientMessage::StopSession {}, self.config.send_timeout())
            .await
        {
            tracing::debug!("STOP_SESSION not sent: {}", e);
        }
        writer
            .shutdown(writer_task, self.config.send_timeout())
            .await;

        self.state.reset();
        self.events.status("Session stopped");
        result
    }

    async fn send_audio_loop(&self, writer: &ConnectionWriter) {
        let timeout = self.config.send_timeout();
        let mut sent = 0u64;

        while self.is_running() {
            let Some(frame) = self.audio_in.try_pop() else {
                tokio::time::sleep(AUDIO_IDLE_YIELD).await;
                continue;
            };

            match writer.send_timeout(&ClientMessage::audio(&frame), timeout).await {
                Ok(()) => {
                    sent += 1;
                    if sent % PROGRESS_EVERY == 0 {
                        tracing::debug!("Sent {} audio chunks", sent);
                    }
                }
                Err(NetworkError::Timeout) => {
                    tracing::warn!("Audio chunk {} send timed out, skipping", frame.sequence());
                }
                Err(e) => {
                    self.fail(format!("Connection error: {}", e));
                    break;
                }
            }
        }

        tracing::info!("Audio send loop exited after {} chunks", sent);
    }

    async fn send_video_loop(&self, writer: &ConnectionWriter) {
        let interval = self.video.interval();
        let timeout = self.config.send_timeout();
        let mut sent = 0u64;
        let mut last_sent: Option<Instant> = None;

        while self.is_running() {
            if let Some(at) = last_sent {
                tokio::time::sleep_until(at + interval).await;
                if !self.is_running() {
                    break;
                }
            }

            let jpeg = match self.video.next_encoded(interval).await {
                None => continue,
                Some(Ok(jpeg)) => jpeg,
                Some(Err(e)) => {
                    tracing::warn!("Skipping video frame: {}", e);
                    continue;
                }
            };

            match writer.send_timeout(&ClientMessage::video(&jpeg), timeout).await {
                Ok(()) => {
                    sent += 1;
                    last_sent = Some(Instant::now());
                    if sent % PROGRESS_EVERY == 0 {
                        tracing::debug!("Sent {} video frames", sent);
                    }
                }
                Err(NetworkError::Timeout) => {
                    tracing::warn!("Video frame send timed out, skipping");
                }
                Err(e) => {
                    self.fail(format!("Connection error: {}", e));
                    break;
                }
            }
        }

        tracing::info!("Video send loop exited after {} frames", sent);
    }

    async fn receive_loop<S>(&self, mut stream: S, writer: &ConnectionWriter)
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let timeout = self.config.recv_timeout();
        let mut received = 0u64;

        while self.is_running() {
            let next = match tokio::time::timeout(timeout, stream.next()).await {
                Ok(next) => next,
                Err(_) => continue,
            };

            let text = match next {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(data))) => {
                    tracing::warn!("{}", ProtocolError::UnexpectedBinary(data.len()));
                    continue;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("Peer closed the connection: {:?}", frame);
                    self.fail("Connection closed".to_string());
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.fail(format!("Connection error: {}", e));
                    break;
                }
                None => {
                    self.fail("Connection closed".to_string());
                    break;
                }
            };

            received += 1;
            match ServerMessage::decode(&text) {
                Ok(message) => {
                    if let Err(e) = self.dispatch(message, writer).await {
                        self.fail(format!("Connection error: {}", e));
                        break;
                    }
                }
                Err(e) => tracing::warn!("Skipping message: {}", e),
            }
        }

        tracing::info!("Receive loop exited after {} messages", received);
    }

    async fn dispatch(
        &self,
        message: ServerMessage,
        writer: &ConnectionWriter,
    ) -> Result<(), NetworkError> {
        tracing::trace!("Received {}", message.kind());

        match message {
            ServerMessage::Status { status } => {
                if status == STATUS_CONNECTED {
                    self.events.status("Connected! You can start talking.");
                    self.state.set_ai_state(AiState::Listening);
                } else {
                    self.events.status(status);
                }
            }
            ServerMessage::Error { error } => {
                tracing::error!("Error from peer: {}", error);
                self.events.status(format!("Error: {}", error));
            }
            ServerMessage::Transcription { sender, text } => {
                self.state.on_transcription(sender, &text);
            }
            ServerMessage::TurnComplete => self.state.on_turn_complete(),
            ServerMessage::ModelTurn => self.state.on_model_turn(),
            ServerMessage::AiState { state } => {
                self.state.set_ai_state(state);
            }
            ServerMessage::ToolCall(call) => self.handle_tool_call(call, writer).await?,
            ServerMessage::AudioOutput { data } => {
                self.state.on_audio_output();
                if !self.audio_out.push_async(data).await {
                    tracing::trace!("Playback queue closed, audio output discarded");
                }
            }
        }

        Ok(())
    }

    /// Run one tool call to completion. The receive loop does not read
    /// again until the response is written and the settle delay elapsed.
    async fn handle_tool_call(
        &self,
        call: ToolCall,
        writer: &ConnectionWriter,
    ) -> Result<(), NetworkError> {
        tracing::info!("Tool call '{}' ({})", call.name, call.call_id);
        self.state.set_ai_state(AiState::UsingTool);

        let tools = self.tools.clone();
        let request = call.clone();
        let result = tokio::task::spawn_blocking(move || tools.handle(&request))
            .await
            .unwrap_or_else(|e| format!("Error: tool execution failed: {}", e));

        tracing::info!("Tool call {} -> {}", call.call_id, result);
        let response = ClientMessage::ToolResponse {
            call_id: call.call_id,
            result,
        };
        match writer.send_timeout(&response, self.config.send_timeout()).await {
            Ok(()) => {}
            Err(NetworkError::Timeout) => tracing::warn!("Tool response send timed out"),
            Err(e) => return Err(e),
        }

        tokio::time::sleep(self.config.tool_settle()).await;
        self.state.set_ai_state(AiState::Listening);
        Ok(())
    }
}
