//! Synthesis adapter: wraps a text-to-speech engine.
//!
//! At most one utterance is active. Speaking while an utterance is playing
//! stops it first; once an utterance has been superseded or stopped, its
//! terminal event is never delivered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kiska_core::config::{
    VoiceConfig, clamp_voice_setting, default_pitch, default_rate,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{EventHub, MediaError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEventKind {
    Started,
    Done,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisEvent {
    pub utterance: u64,
    pub kind: SynthesisEventKind,
}

impl SynthesisEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, SynthesisEventKind::Started)
    }
}

/// One request to speak, with the voice settings in force when it was made.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
    pub locale: String,
    pub rate: f32,
    pub pitch: f32,
    pub voice: Option<String>,
}

/// A voice offered by an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

/// Handle an engine uses to report progress for one utterance.
///
/// Events for an utterance that is no longer current are dropped, and only
/// the first terminal event for the current utterance is delivered.
#[derive(Clone)]
pub struct SynthesisEmitter {
    utterance: u64,
    current: Arc<Mutex<Option<u64>>>,
    hub: Arc<EventHub<SynthesisEvent>>,
}

impl SynthesisEmitter {
    pub fn utterance_id(&self) -> u64 {
        self.utterance
    }

    /// Whether this utterance is still the one the adapter is waiting on.
    pub fn is_current(&self) -> bool {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) == Some(self.utterance)
    }

    pub fn started(&self) {
        if self.is_current() {
            self.publish(SynthesisEventKind::Started);
        }
    }

    pub fn done(&self) {
        self.finish(SynthesisEventKind::Done);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.finish(SynthesisEventKind::Error(message.into()));
    }

    fn finish(&self, kind: SynthesisEventKind) {
        {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            if *current != Some(self.utterance) {
                debug!(utterance = self.utterance, ?kind, "Dropping event for superseded utterance");
                return;
            }
            *current = None;
        }
        self.publish(kind);
    }

    fn publish(&self, kind: SynthesisEventKind) {
        self.hub.publish(SynthesisEvent {
            utterance: self.utterance,
            kind,
        });
    }
}

/// A text-to-speech engine.
///
/// `speak` should return once playback has been queued; completion is
/// reported through the emitter.
#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    fn id(&self) -> &str;

    fn is_supported(&self) -> bool {
        true
    }

    async fn speak(&self, utterance: Utterance, emitter: SynthesisEmitter) -> anyhow::Result<()>;

    /// Halt playback. Must be safe to call when nothing is playing.
    async fn stop(&self) -> anyhow::Result<()>;

    async fn voices(&self) -> anyhow::Result<Vec<VoiceInfo>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
struct VoiceSettings {
    rate: f32,
    pitch: f32,
    voice: Option<String>,
}

pub struct SynthesisAdapter {
    engine: Arc<dyn SynthesisEngine>,
    hub: Arc<EventHub<SynthesisEvent>>,
    current: Arc<Mutex<Option<u64>>>,
    next_utterance: AtomicU64,
    settings: Mutex<VoiceSettings>,
}

impl SynthesisAdapter {
    pub fn new(engine: Arc<dyn SynthesisEngine>) -> Self {
        Self {
            engine,
            hub: Arc::new(EventHub::new()),
            current: Arc::new(Mutex::new(None)),
            next_utterance: AtomicU64::new(1),
            settings: Mutex::new(VoiceSettings {
                rate: default_rate(),
                pitch: default_pitch(),
                voice: None,
            }),
        }
    }

    /// Build an adapter with rate, pitch and voice taken from config.
    pub fn with_config(engine: Arc<dyn SynthesisEngine>, config: &VoiceConfig) -> Self {
        let adapter = Self::new(engine);
        adapter.set_rate(config.rate);
        adapter.set_pitch(config.pitch);
        adapter.set_voice(config.voice.clone());
        adapter
    }

    pub fn engine_id(&self) -> &str {
        self.engine.id()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SynthesisEvent> {
        self.hub.subscribe()
    }

    pub fn is_speaking(&self) -> bool {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn rate(&self) -> f32 {
        self.lock_settings().rate
    }

    pub fn pitch(&self) -> f32 {
        self.lock_settings().pitch
    }

    /// Set the speech rate, clamped to 0.5–2.0.
    pub fn set_rate(&self, rate: f32) {
        self.lock_settings().rate = clamp_voice_setting(rate, default_rate());
    }

    /// Set the speech pitch, clamped to 0.5–2.0.
    pub fn set_pitch(&self, pitch: f32) {
        self.lock_settings().pitch = clamp_voice_setting(pitch, default_pitch());
    }

    pub fn set_voice(&self, voice: Option<String>) {
        self.lock_settings().voice = voice;
    }

    /// Speak `text`, stopping any utterance in progress first.
    ///
    /// Returns the new utterance id. Engine failures are reported as an
    /// [`SynthesisEventKind::Error`] event for that id.
    pub async fn speak(&self, text: &str, locale: &str) -> Result<u64, MediaError> {
        if !self.engine.is_supported() {
            return Err(MediaError::Unsupported(self.engine.id().to_string()));
        }
        if self.is_speaking() {
            self.stop().await?;
        }

        let id = self.next_utterance.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);

        let settings = self.lock_settings().clone();
        let utterance = Utterance {
            id,
            text: text.to_string(),
            locale: locale.to_string(),
            rate: settings.rate,
            pitch: settings.pitch,
            voice: settings.voice,
        };
        let emitter = SynthesisEmitter {
            utterance: id,
            current: Arc::clone(&self.current),
            hub: Arc::clone(&self.hub),
        };

        info!(utterance = id, chars = text.len(), engine = self.engine.id(), "Speaking");
        emitter.started();
        if let Err(e) = self.engine.speak(utterance, emitter.clone()).await {
            warn!(utterance = id, %e, "Synthesis engine failed");
            emitter.error(e.to_string());
        }
        Ok(id)
    }

    /// Halt the current utterance. A no-op when nothing is playing.
    pub async fn stop(&self) -> Result<(), MediaError> {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(id) = current else {
            return Ok(());
        };
        debug!(utterance = id, "Stopping speech");
        self.engine.stop().await?;
        Ok(())
    }

    pub async fn voices(&self) -> Result<Vec<VoiceInfo>, MediaError> {
        Ok(self.engine.voices().await?)
    }

    fn lock_settings(&self) -> std::sync::MutexGuard<'_, VoiceSettings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Records utterances and keeps their emitters so tests decide when they finish.
    #[derive(Default)]
    struct ScriptedEngine {
        spoken: Mutex<Vec<Utterance>>,
        emitters: Mutex<Vec<SynthesisEmitter>>,
        stops: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SynthesisEngine for ScriptedEngine {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn speak(&self, utterance: Utterance, emitter: SynthesisEmitter) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("no audio device");
            }
            self.spoken.lock().unwrap().push(utterance);
            self.emitters.lock().unwrap().push(emitter);
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_rate_and_pitch_are_clamped() {
        let adapter = SynthesisAdapter::new(Arc::new(ScriptedEngine::default()));
        assert_eq!(adapter.rate(), 0.9);
        assert_eq!(adapter.pitch(), 1.0);

        adapter.set_rate(3.0);
        adapter.set_pitch(0.1);
        assert_eq!(adapter.rate(), 2.0);
        assert_eq!(adapter.pitch(), 0.5);

        adapter.set_rate(f32::INFINITY);
        assert_eq!(adapter.rate(), 2.0);
        adapter.set_pitch(f32::NEG_INFINITY);
        assert_eq!(adapter.pitch(), 0.5);
        adapter.set_rate(f32::NAN);
        assert_eq!(adapter.rate(), 0.9);
    }

    #[tokio::test]
    async fn test_speak_emits_started_then_done() {
        let engine = Arc::new(ScriptedEngine::default());
        let adapter = SynthesisAdapter::new(engine.clone());
        let mut rx = adapter.subscribe();

        let id = adapter.speak("Hello", "en-US").await.unwrap();
        assert!(adapter.is_speaking());
        assert_eq!(engine.spoken.lock().unwrap()[0].rate, 0.9);

        engine.emitters.lock().unwrap()[0].done();
        assert!(!adapter.is_speaking());

        let started = rx.recv().await.unwrap();
        assert_eq!(started, SynthesisEvent { utterance: id, kind: SynthesisEventKind::Started });
        let done = rx.recv().await.unwrap();
        assert_eq!(done.kind, SynthesisEventKind::Done);
        assert!(done.is_terminal());
    }

    #[tokio::test]
    async fn test_new_speak_supersedes_previous_utterance() {
        let engine = Arc::new(ScriptedEngine::default());
        let adapter = SynthesisAdapter::new(engine.clone());
        let mut rx = adapter.subscribe();

        let first = adapter.speak("one", "en-US").await.unwrap();
        let second = adapter.speak("two", "en-US").await.unwrap();
        assert_eq!(engine.stops.load(Ordering::SeqCst), 1);

        // The first utterance finishing late must not surface.
        engine.emitters.lock().unwrap()[0].done();
        engine.emitters.lock().unwrap()[1].done();

        let events: Vec<SynthesisEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.iter().all(|e| !(e.utterance == first && e.is_terminal())));
        assert_eq!(
            events.last(),
            Some(&SynthesisEvent { utterance: second, kind: SynthesisEventKind::Done })
        );
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_suppresses_terminal() {
        let engine = Arc::new(ScriptedEngine::default());
        let adapter = SynthesisAdapter::new(engine.clone());
        let mut rx = adapter.subscribe();

        adapter.speak("long story", "en-US").await.unwrap();
        adapter.stop().await.unwrap();
        adapter.stop().await.unwrap();
        assert_eq!(engine.stops.load(Ordering::SeqCst), 1);

        engine.emitters.lock().unwrap()[0].done();
        assert_eq!(rx.recv().await.unwrap().kind, SynthesisEventKind::Started);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_engine_failure_becomes_error_event() {
        let adapter = SynthesisAdapter::new(Arc::new(ScriptedEngine {
            fail: true,
            ..Default::default()
        }));
        let mut rx = adapter.subscribe();

        let id = adapter.speak("hi", "en-US").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, SynthesisEventKind::Started);
        assert_eq!(
            rx.recv().await.unwrap(),
            SynthesisEvent { utterance: id, kind: SynthesisEventKind::Error("no audio device".into()) }
        );
        assert!(!adapter.is_speaking());
    }

    #[test]
    fn test_with_config_applies_voice_settings() {
        let config = VoiceConfig {
            rate: 1.5,
            pitch: 9.0,
            voice: Some("aria".into()),
            ..Default::default()
        };
        let adapter = SynthesisAdapter::with_config(Arc::new(ScriptedEngine::default()), &config);
        assert_eq!(adapter.rate(), 1.5);
        assert_eq!(adapter.pitch(), 2.0);
    }
}
