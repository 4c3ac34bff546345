//! The turn-taking coordinator.
//!
//! One task consumes every event (user intents, capture and synthesis events,
//! resolution results, deadlines) in arrival order, so transitions never
//! overlap. Stale events are recognized by id: capture ids from the capture
//! adapter, utterance ids from the synthesis adapter and resolution ids
//! issued here.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kiska_core::auth::CredentialService;
use kiska_core::config::AssistantConfig;
use kiska_core::transcript::{Origin, TranscriptSnapshot, TranscriptStore};
use kiska_media::{
    CaptureAdapter, CaptureEvent, CaptureEventKind, SynthesisAdapter, SynthesisEvent,
    SynthesisEventKind,
};
use kiska_providers::ResolverClient;

use crate::clock::{Clock, SystemClock};
use crate::events::{CoordinatorEvent, Deadline, Intent, Notice, TurnState};
use crate::intents::{Intercept, InterceptTable};

/// Assistant entry recorded when the resolver fails.
pub const APOLOGY: &str = "I'm sorry, I encountered an error processing your request.";

const NOTICE_CAPACITY: usize = 32;

/// Generous per-word allowance at rate 1.0 when sizing a speech deadline.
const WORD_ALLOWANCE: Duration = Duration::from_millis(500);

struct PendingCapture {
    /// `None` until the adapter has issued an id.
    id: Option<u64>,
    partial: String,
    released: bool,
    ended: bool,
    deadline: (Instant, Deadline),
}

struct PendingResolution {
    id: u64,
    cancel: CancellationToken,
}

struct PendingSpeech {
    utterance: u64,
    deadline: Instant,
}

/// First candidate with any non-whitespace text.
fn best_candidate(candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .map(|c| c.trim())
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

/// How long `text` may take to speak at `rate`, never less than `floor`.
fn speech_budget(text: &str, rate: f32, floor: Duration) -> Duration {
    let words = text.split_whitespace().count() as u32;
    let estimate = (WORD_ALLOWANCE * words).div_f32(rate.max(0.1));
    estimate.max(floor)
}

pub struct Coordinator {
    config: AssistantConfig,
    state: TurnState,
    transcript: TranscriptStore,

    capture: Arc<CaptureAdapter>,
    synthesis: Arc<SynthesisAdapter>,
    resolver: Arc<ResolverClient>,
    credentials: Arc<dyn CredentialService>,
    clock: Arc<dyn Clock>,
    intercepts: InterceptTable,

    pending_capture: Option<PendingCapture>,
    pending_resolution: Option<PendingResolution>,
    speaking: Option<PendingSpeech>,
    sign_out_at: Option<Instant>,
    next_resolution: u64,

    state_tx: watch::Sender<TurnState>,
    transcript_tx: watch::Sender<TranscriptSnapshot>,
    notices: broadcast::Sender<Notice>,
    completions_tx: mpsc::UnboundedSender<CoordinatorEvent>,
    completions_rx: mpsc::UnboundedReceiver<CoordinatorEvent>,
}

impl Coordinator {
    pub fn new(
        config: AssistantConfig,
        capture: Arc<CaptureAdapter>,
        synthesis: Arc<SynthesisAdapter>,
        resolver: Arc<ResolverClient>,
        credentials: Arc<dyn CredentialService>,
    ) -> Self {
        let transcript = TranscriptStore::new();
        let (state_tx, _) = watch::channel(TurnState::Idle);
        let (transcript_tx, _) = watch::channel(transcript.snapshot());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        Self {
            config,
            state: TurnState::Idle,
            transcript,
            capture,
            synthesis,
            resolver,
            credentials,
            clock: Arc::new(SystemClock),
            intercepts: InterceptTable::standard(),
            pending_capture: None,
            pending_resolution: None,
            speaking: None,
            sign_out_at: None,
            next_resolution: 1,
            state_tx,
            transcript_tx,
            notices,
            completions_tx,
            completions_rx,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start the coordinator task.
    ///
    /// The task ends on [`Intent::Shutdown`] or once every handle is dropped,
    /// destroying the capture engine on the way out.
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle {
            intents: intent_tx,
            state: self.state_tx.subscribe(),
            transcript: self.transcript_tx.subscribe(),
            notices: self.notices.clone(),
        };
        let task = tokio::spawn(self.run(intent_rx));
        (handle, task)
    }

    async fn run(mut self, mut intents: mpsc::UnboundedReceiver<Intent>) {
        let mut capture_rx = self.capture.subscribe();
        let mut synthesis_rx = self.synthesis.subscribe();
        info!(capture = self.capture.engine_id(), synthesis = self.synthesis.engine_id(), resolver = self.resolver.resolver_id(), "Coordinator started");

        loop {
            let deadline = self.next_deadline();
            let timer = async move {
                match deadline {
                    Some((at, kind)) => {
                        tokio::time::sleep_until(at).await;
                        kind
                    }
                    None => std::future::pending().await,
                }
            };

            let event = tokio::select! {
                intent = intents.recv() => match intent {
                    Some(Intent::Shutdown) | None => break,
                    Some(intent) => CoordinatorEvent::Intent(intent),
                },
                Some(event) = self.completions_rx.recv() => event,
                Some(event) = capture_rx.recv() => CoordinatorEvent::Capture(event),
                Some(event) = synthesis_rx.recv() => CoordinatorEvent::Synthesis(event),
                kind = timer => CoordinatorEvent::DeadlineElapsed(kind),
            };
            self.handle(event).await;
        }

        self.teardown().await;
        info!("Coordinator stopped");
    }

    async fn handle(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Intent(intent) => self.on_intent(intent).await,
            CoordinatorEvent::Capture(event) => self.on_capture(event).await,
            CoordinatorEvent::Synthesis(event) => self.on_synthesis(event),
            CoordinatorEvent::ResolutionFinished { id, result } => {
                let current = self.pending_resolution.as_ref().map(|p| p.id);
                if current != Some(id) {
                    debug!(resolution = id, ?current, "Discarding stale resolution");
                    return;
                }
                self.pending_resolution = None;
                match result {
                    Ok(reply) => {
                        if self.append(Origin::Assistant, &reply) {
                            self.speak(&reply).await;
                        } else {
                            self.set_state(TurnState::Idle);
                        }
                    }
                    Err(e) => {
                        warn!(resolution = id, error = %e, "Reply resolution failed");
                        self.append(Origin::Assistant, APOLOGY);
                        self.set_state(TurnState::Idle);
                    }
                }
            }
            CoordinatorEvent::SignOutFinished(result) => match result {
                Ok(()) => {
                    self.reset_session().await;
                    self.notify(Notice::SignedOut);
                }
                Err(e) => {
                    warn!(error = %e, "Sign-out failed");
                    self.notify(Notice::SignOutFailed(e.to_string()));
                }
            },
            CoordinatorEvent::DeadlineElapsed(deadline) => self.on_deadline(deadline).await,
        }
    }

    async fn on_intent(&mut self, intent: Intent) {
        match intent {
            Intent::PressTalk => self.press_talk().await,
            Intent::ReleaseTalk => self.release_talk().await,
            Intent::SubmitText(text) => {
                if self.state != TurnState::Idle {
                    debug!(state = %self.state, "Ignoring text while busy");
                    return;
                }
                let text = text.trim();
                if text.is_empty() {
                    debug!("Ignoring blank submission");
                    return;
                }
                self.begin_turn(text.to_string()).await;
            }
            Intent::Greet => {
                if self.state != TurnState::Idle {
                    debug!(state = %self.state, "Ignoring greeting while busy");
                    return;
                }
                let greeting = self.config.greeting.clone();
                if self.append(Origin::Assistant, &greeting) {
                    self.speak(&greeting).await;
                }
            }
            Intent::ResetSession => self.reset_session().await,
            // Handled by the run loop.
            Intent::Shutdown => {}
        }
    }

    async fn press_talk(&mut self) {
        if self.state != TurnState::Idle {
            debug!(state = %self.state, "Ignoring talk press while busy");
            return;
        }
        if !self.capture.is_supported() {
            self.notify(Notice::CaptureUnsupported);
            return;
        }

        self.set_state(TurnState::Listening);
        self.pending_capture = Some(PendingCapture {
            id: None,
            partial: String::new(),
            released: false,
            ended: false,
            deadline: (
                Instant::now() + Duration::from_millis(self.config.capture_timeout_ms),
                Deadline::CaptureTimeout,
            ),
        });

        match self.capture.start(&self.config.locale).await {
            Ok(Some(id)) => {
                if let Some(pending) = self.pending_capture.as_mut() {
                    pending.id = Some(id);
                }
            }
            Ok(None) => {
                self.pending_capture = None;
                self.set_state(TurnState::Idle);
                self.notify(Notice::CaptureUnsupported);
            }
            Err(e) => {
                self.pending_capture = None;
                self.set_state(TurnState::Idle);
                self.notify(Notice::CaptureFailed(e.to_string()));
            }
        }
    }

    async fn release_talk(&mut self) {
        let grace = self.grace_deadline();
        let Some(pending) = self.pending_capture.as_mut() else {
            debug!(state = %self.state, "Ignoring talk release with no capture");
            return;
        };
        if pending.released {
            return;
        }
        pending.released = true;
        // Engines may only begin recognizing once stopped, so the result gets
        // a full capture timeout of its own.
        pending.deadline = if pending.ended {
            (grace, Deadline::ReleaseGrace)
        } else {
            (
                Instant::now() + Duration::from_millis(self.config.capture_timeout_ms),
                Deadline::CaptureTimeout,
            )
        };
        let ended = pending.ended;

        debug!(capture = ?pending.id, "Talk released");
        if !ended {
            if let Err(e) = self.capture.stop().await {
                warn!(error = %e, "Failed to stop capture");
            }
        }
    }

    async fn on_capture(&mut self, event: CaptureEvent) {
        let current = self.pending_capture.as_ref().and_then(|p| p.id);
        if self.state != TurnState::Listening || current != Some(event.capture) {
            debug!(capture = event.capture, ?current, kind = ?event.kind, "Discarding late capture event");
            return;
        }
        let grace = self.grace_deadline();
        let Some(pending) = self.pending_capture.as_mut() else {
            return;
        };

        match event.kind {
            CaptureEventKind::Started => debug!(capture = event.capture, "Capture started"),
            CaptureEventKind::PartialResults(candidates) => {
                if let Some(text) = best_candidate(&candidates) {
                    pending.partial = text;
                }
            }
            CaptureEventKind::Results(candidates) => {
                self.finish_capture(best_candidate(&candidates)).await;
            }
            CaptureEventKind::Ended => {
                // Some engines report the end of speech before the final results.
                pending.ended = true;
                if pending.deadline.1 == Deadline::CaptureTimeout {
                    pending.deadline = (grace, Deadline::ReleaseGrace);
                }
            }
            CaptureEventKind::Error(message) => {
                warn!(capture = event.capture, %message, "Capture failed");
                self.pending_capture = None;
                self.set_state(TurnState::Idle);
                self.notify(Notice::CaptureFailed(message));
            }
        }
    }

    /// Close the capture and either start a turn or return to idle.
    ///
    /// Without a final result, the latest partial text counts only if the
    /// user released the talk button.
    async fn finish_capture(&mut self, result: Option<String>) {
        let Some(pending) = self.pending_capture.take() else {
            return;
        };
        if !pending.released && !pending.ended {
            if let Err(e) = self.capture.stop().await {
                warn!(error = %e, "Failed to stop capture");
            }
        }

        let text = result.or_else(|| {
            (pending.released && !pending.partial.is_empty()).then_some(pending.partial)
        });
        match text {
            Some(text) => {
                self.set_state(TurnState::Idle);
                self.begin_turn(text).await;
            }
            None => {
                debug!(capture = ?pending.id, "Capture produced no text");
                self.set_state(TurnState::Idle);
            }
        }
    }

    /// Record the user's input, then answer it from an intercept or the resolver.
    async fn begin_turn(&mut self, text: String) {
        if !self.append(Origin::User, &text) {
            return;
        }

        if let Some(hit) = self.intercepts.detect(&text, self.clock.as_ref()) {
            info!(intercept = ?hit.intercept, "Answering without resolver");
            if hit.intercept == Intercept::SignOut {
                self.sign_out_at = Some(Instant::now() + Duration::from_millis(self.config.sign_out_grace_ms));
            }
            self.append(Origin::Assistant, &hit.reply);
            self.speak(&hit.reply).await;
            return;
        }

        let id = self.next_resolution;
        self.next_resolution += 1;
        let cancel = CancellationToken::new();
        self.pending_resolution = Some(PendingResolution {
            id,
            cancel: cancel.clone(),
        });
        self.set_state(TurnState::Resolving);

        let resolver = Arc::clone(&self.resolver);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => debug!(resolution = id, "Resolution cancelled"),
                result = resolver.resolve(&text) => {
                    let _ = completions.send(CoordinatorEvent::ResolutionFinished { id, result });
                }
            }
        });
    }

    async fn speak(&mut self, text: &str) {
        self.set_state(TurnState::Speaking);
        let budget = speech_budget(
            text,
            self.synthesis.rate(),
            Duration::from_millis(self.config.speech_timeout_ms),
        );
        match self.synthesis.speak(text, &self.config.locale).await {
            Ok(utterance) => {
                debug!(utterance, ?budget, "Speaking");
                self.speaking = Some(PendingSpeech {
                    utterance,
                    deadline: Instant::now() + budget,
                });
            }
            Err(e) => {
                warn!(error = %e, "Could not speak reply");
                self.speaking = None;
                self.set_state(TurnState::Idle);
            }
        }
    }

    fn on_synthesis(&mut self, event: SynthesisEvent) {
        let current = self.speaking.as_ref().map(|s| s.utterance);
        if current != Some(event.utterance) {
            debug!(utterance = event.utterance, ?current, "Discarding stale synthesis event");
            return;
        }
        match event.kind {
            SynthesisEventKind::Started => debug!(utterance = event.utterance, "Speech started"),
            SynthesisEventKind::Done => {
                self.speaking = None;
                self.set_state(TurnState::Idle);
            }
            SynthesisEventKind::Error(message) => {
                warn!(utterance = event.utterance, %message, "Speech failed");
                self.speaking = None;
                self.set_state(TurnState::Idle);
            }
        }
    }

    async fn on_deadline(&mut self, deadline: Deadline) {
        match deadline {
            Deadline::CaptureTimeout => {
                let Some(pending) = self.pending_capture.take() else {
                    return;
                };
                warn!(capture = ?pending.id, released = pending.released, "Capture timed out");
                if !pending.released && !pending.ended {
                    if let Err(e) = self.capture.stop().await {
                        warn!(error = %e, "Failed to stop capture");
                    }
                }
                self.set_state(TurnState::Idle);
                if pending.released && !pending.partial.is_empty() {
                    self.begin_turn(pending.partial).await;
                } else {
                    self.notify(Notice::CaptureTimedOut);
                }
            }
            Deadline::ReleaseGrace => self.finish_capture(None).await,
            Deadline::SpeechTimeout => {
                warn!("Speech timed out");
                self.speaking = None;
                if let Err(e) = self.synthesis.stop().await {
                    warn!(error = %e, "Failed to stop speech");
                }
                self.set_state(TurnState::Idle);
            }
            Deadline::SignOut => {
                self.sign_out_at = None;
                let credentials = Arc::clone(&self.credentials);
                let completions = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = credentials.sign_out().await;
                    let _ = completions.send(CoordinatorEvent::SignOutFinished(result));
                });
            }
        }
    }

    /// Clear the transcript and abandon whatever is in flight.
    ///
    /// A scheduled sign-out is kept.
    async fn reset_session(&mut self) {
        info!(entries = self.transcript.len(), "Resetting session");
        if let Some(pending) = self.pending_capture.take() {
            if !pending.ended {
                if let Err(e) = self.capture.stop().await {
                    warn!(error = %e, "Failed to stop capture");
                }
            }
        }
        if let Some(pending) = self.pending_resolution.take() {
            pending.cancel.cancel();
        }
        if self.speaking.take().is_some() {
            if let Err(e) = self.synthesis.stop().await {
                warn!(error = %e, "Failed to stop speech");
            }
        }

        self.transcript.clear();
        self.resolver.clear_history();
        self.transcript_tx.send_replace(self.transcript.snapshot());
        self.set_state(TurnState::Idle);
    }

    async fn teardown(&mut self) {
        if let Some(pending) = self.pending_resolution.take() {
            pending.cancel.cancel();
        }
        if self.speaking.take().is_some() {
            if let Err(e) = self.synthesis.stop().await {
                warn!(error = %e, "Failed to stop speech");
            }
        }
        self.pending_capture = None;
        if let Err(e) = self.capture.destroy().await {
            warn!(error = %e, "Failed to destroy capture engine");
        }
        self.set_state(TurnState::Idle);
    }

    fn next_deadline(&self) -> Option<(Instant, Deadline)> {
        [
            self.pending_capture.as_ref().map(|p| p.deadline),
            self.speaking
                .as_ref()
                .map(|s| (s.deadline, Deadline::SpeechTimeout)),
            self.sign_out_at.map(|at| (at, Deadline::SignOut)),
        ]
        .into_iter()
        .flatten()
        .min_by_key(|(at, _)| *at)
    }

    fn grace_deadline(&self) -> Instant {
        Instant::now() + Duration::from_millis(self.config.release_grace_ms)
    }

    /// Append and publish a transcript entry. Returns false for blank text.
    fn append(&mut self, origin: Origin, text: &str) -> bool {
        match self.transcript.append(origin, text) {
            Ok(entry) => {
                debug!(sequence = entry.sequence, ?origin, "Transcript entry");
                self.transcript_tx.send_replace(self.transcript.snapshot());
                true
            }
            Err(e) => {
                debug!(error = %e, ?origin, "Transcript entry rejected");
                false
            }
        }
    }

    fn set_state(&mut self, state: TurnState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Turn state");
            self.state = state;
        }
        self.state_tx.send_replace(state);
    }

    fn notify(&self, notice: Notice) {
        info!(notice = %notice, "Notice");
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }
}

/// Cheap, cloneable control surface for a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    intents: mpsc::UnboundedSender<Intent>,
    state: watch::Receiver<TurnState>,
    transcript: watch::Receiver<TranscriptSnapshot>,
    notices: broadcast::Sender<Notice>,
}

impl CoordinatorHandle {
    /// Queue an intent. Returns false once the coordinator has stopped.
    pub fn send(&self, intent: Intent) -> bool {
        self.intents.send(intent).is_ok()
    }

    pub fn press_talk(&self) -> bool {
        self.send(Intent::PressTalk)
    }

    pub fn release_talk(&self) -> bool {
        self.send(Intent::ReleaseTalk)
    }

    pub fn submit_text(&self, text: impl Into<String>) -> bool {
        self.send(Intent::SubmitText(text.into()))
    }

    pub fn greet(&self) -> bool {
        self.send(Intent::Greet)
    }

    pub fn reset_session(&self) -> bool {
        self.send(Intent::ResetSession)
    }

    pub fn shutdown(&self) -> bool {
        self.send(Intent::Shutdown)
    }

    pub fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    pub fn transcript(&self) -> TranscriptSnapshot {
        self.transcript.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<TurnState> {
        self.state.clone()
    }

    pub fn watch_transcript(&self) -> watch::Receiver<TranscriptSnapshot> {
        self.transcript.clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Wait until the transcript satisfies `done` and the turn is back to idle.
    pub async fn settle(&self, done: impl Fn(&TranscriptSnapshot) -> bool) -> TranscriptSnapshot {
        let mut transcript = self.watch_transcript();
        let mut state = self.watch_state();
        loop {
            let snapshot = transcript.borrow_and_update().clone();
            if done(&snapshot) && *state.borrow_and_update() == TurnState::Idle {
                return snapshot;
            }
            tokio::select! {
                changed = transcript.changed() => if changed.is_err() { return snapshot },
                changed = state.changed() => if changed.is_err() { return snapshot },
            }
        }
    }
}
