//! Observed conversation state: AI-state transitions and transcript
//! accumulation for the current turn

use parking_lot::Mutex;

use crate::events::EventSink;
use crate::protocol::{AiState, Speaker};

#[derive(Default)]
struct Turn {
    input: String,
    output: String,
}

/// Shared between the receive loop and the session controller.
///
/// Accumulators and AI state sit behind one mutex so a turn boundary is
/// atomic with respect to text for the next turn.
pub struct ConversationState {
    inner: Mutex<Inner>,
    events: EventSink,
}

#[derive(Default)]
struct Inner {
    turn: Turn,
    ai_state: AiState,
}

impl ConversationState {
    pub fn new(events: EventSink) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    pub fn ai_state(&self) -> AiState {
        self.inner.lock().ai_state
    }

    /// Move to `state`, emitting an event only if it changed
    pub fn set_ai_state(&self, state: AiState) -> bool {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, state)
    }

    fn transition(&self, inner: &mut Inner, state: AiState) -> bool {
        if inner.ai_state == state {
            return false;
        }
        tracing::debug!("AI state {} -> {}", inner.ai_state, state);
        inner.ai_state = state;
        self.events.ai_state(state);
        true
    }

    /// Append an incremental transcription fragment
    pub fn on_transcription(&self, sender: Speaker, text: &str) {
        let mut inner = self.inner.lock();
        match sender {
            Speaker::User => {
                inner.turn.input.push_str(text);
                self.transition(&mut inner, AiState::Listening);
            }
            Speaker::Model => {
                inner.turn.output.push_str(text);
                self.transition(&mut inner, AiState::Speaking);
            }
        }
    }

    /// Finalize the turn: emit each non-blank accumulator once, user first,
    /// then reset both and return to listening
    pub fn on_turn_complete(&self) {
        let mut inner = self.inner.lock();
        let turn = std::mem::take(&mut inner.turn);

        if !turn.input.trim().is_empty() {
            self.events.transcript(Speaker::User, turn.input);
        }
        if !turn.output.trim().is_empty() {
            self.events.transcript(Speaker::Model, turn.output);
        }

        self.transition(&mut inner, AiState::Listening);
    }

    /// The model started a turn. Processing until its words arrive.
    pub fn on_model_turn(&self) {
        let mut inner = self.inner.lock();
        if inner.turn.output.is_empty() {
            self.transition(&mut inner, AiState::Processing);
        }
    }

    pub fn on_audio_output(&self) {
        self.set_ai_state(AiState::Speaking);
    }

    /// Session edge: drop any partial turn and go idle
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.turn = Turn::default();
        self.transition(&mut inner, AiState::Idle);
    }

    /// Text accumulated so far in the current turn, `(input, output)`
    pub fn pending(&self) -> (String, String) {
        let inner = self.inner.lock();
        (inner.turn.input.clone(), inner.turn.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SessionEvent;
    use tokio::sync::broadcast;

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn transcripts(events: &[SessionEvent]) -> Vec<(Speaker, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Transcript(u) => Some((u.speaker, u.text.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_turn_complete_emits_joined_utterance() {
        let sink = EventSink::default();
        let mut rx = sink.subscribe();
        let state = ConversationState::new(sink);

        state.on_transcription(Speaker::User, "Hi");
        state.on_transcription(Speaker::User, " there");
        state.on_turn_complete();

        let events = drain(&mut rx);
        assert_eq!(
            transcripts(&events),
            vec![(Speaker::User, "Hi there".to_string())]
        );
        assert_eq!(state.pending(), (String::new(), String::new()));
    }

    #[test]
    fn test_both_speakers_user_first_and_blank_skipped() {
        let sink = EventSink::default();
        let mut rx = sink.subscribe();
        let state = ConversationState::new(sink);

        state.on_transcription(Speaker::Model, "Sure.");
        state.on_transcription(Speaker::User, "Find my mug");
        state.on_turn_complete();
        state.on_transcription(Speaker::User, "   ");
        state.on_turn_complete();

        assert_eq!(
            transcripts(&drain(&mut rx)),
            vec![
                (Speaker::User, "Find my mug".to_string()),
                (Speaker::Model, "Sure.".to_string()),
            ]
        );
    }

    #[test]
    fn test_state_transitions_emit_only_on_change() {
        let sink = EventSink::default();
        let mut rx = sink.subscribe();
        let state = ConversationState::new(sink);

        assert!(state.set_ai_state(AiState::Listening));
        assert!(!state.set_ai_state(AiState::Listening));

        state.on_model_turn();
        assert_eq!(state.ai_state(), AiState::Processing);

        state.on_transcription(Speaker::Model, "Hello");
        assert_eq!(state.ai_state(), AiState::Speaking);

        // Output text already attached: a model turn does not go back
        state.on_model_turn();
        assert_eq!(state.ai_state(), AiState::Speaking);

        state.on_audio_output();
        state.on_turn_complete();
        assert_eq!(state.ai_state(), AiState::Listening);

        state.reset();
        assert_eq!(state.ai_state(), AiState::Idle);

        let states: Vec<AiState> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::AiState { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                AiState::Listening,
                AiState::Processing,
                AiState::Speaking,
                AiState::Listening,
                AiState::Idle,
            ]
        );
    }
}
