//! Terminal engines: typed dictation stands in for a microphone and speech is
//! printed, paced roughly like spoken audio.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::capture::{CaptureEmitter, CaptureEngine, CaptureEventKind};
use crate::synthesis::{SynthesisEmitter, SynthesisEngine, Utterance, VoiceInfo};

struct Dictation {
    emitter: CaptureEmitter,
    text: String,
}

/// Capture engine fed by typed text while the talk button is held.
///
/// `dictate` reports interim text; releasing (`stop`) turns the dictated text
/// into the capture's final result.
#[derive(Default)]
pub struct DictationEngine {
    active: Mutex<Option<Dictation>>,
}

impl DictationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add text to the open capture. Returns false when nothing is listening.
    pub fn dictate(&self, text: &str) -> bool {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let Some(dictation) = active.as_mut() else {
            return false;
        };
        let text = text.trim();
        if !text.is_empty() {
            if !dictation.text.is_empty() {
                dictation.text.push(' ');
            }
            dictation.text.push_str(text);
            dictation
                .emitter
                .emit(CaptureEventKind::PartialResults(vec![dictation.text.clone()]));
        }
        true
    }

    pub fn is_listening(&self) -> bool {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

#[async_trait]
impl CaptureEngine for DictationEngine {
    fn id(&self) -> &str {
        "console"
    }

    async fn start(&self, _locale: &str, emitter: CaptureEmitter) -> anyhow::Result<()> {
        emitter.emit(CaptureEventKind::Started);
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(Dictation {
            emitter,
            text: String::new(),
        });
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let dictation = self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(Dictation { emitter, text }) = dictation {
            if !text.is_empty() {
                emitter.emit(CaptureEventKind::Results(vec![text]));
            }
            emitter.emit(CaptureEventKind::Ended);
        }
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }
}

/// Synthesis engine that prints utterances to stdout.
pub struct ConsoleSpeaker {
    speaker: String,
    per_word: Duration,
    echo: bool,
    playing: Mutex<Option<CancellationToken>>,
}

impl ConsoleSpeaker {
    pub fn new(speaker: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            per_word: Duration::from_millis(280),
            echo: true,
            playing: Mutex::new(None),
        }
    }

    /// Time each word "takes" at rate 1.0.
    pub fn with_pace(mut self, per_word: Duration) -> Self {
        self.per_word = per_word;
        self
    }

    /// Keep the pacing but print nothing, for hosts that render the transcript themselves.
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    fn playback_time(&self, utterance: &Utterance) -> Duration {
        let words = utterance.text.split_whitespace().count().max(1) as u32;
        (self.per_word * words).div_f32(utterance.rate.max(0.1))
    }
}

#[async_trait]
impl SynthesisEngine for ConsoleSpeaker {
    fn id(&self) -> &str {
        "console"
    }

    async fn speak(&self, utterance: Utterance, emitter: SynthesisEmitter) -> anyhow::Result<()> {
        if self.echo {
            println!("{}: {}", self.speaker, utterance.text);
        }

        let cancel = CancellationToken::new();
        if let Some(previous) = self
            .playing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(cancel.clone())
        {
            previous.cancel();
        }

        let playback = self.playback_time(&utterance);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => debug!(utterance = emitter.utterance_id(), "Playback cut short"),
                _ = tokio::time::sleep(playback) => emitter.done(),
            }
        });
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(playing) = self.playing.lock().unwrap_or_else(|e| e.into_inner()).take() {
            playing.cancel();
        }
        Ok(())
    }

    async fn voices(&self) -> anyhow::Result<Vec<VoiceInfo>> {
        Ok(vec![VoiceInfo {
            id: "console".into(),
            name: "Terminal".into(),
            locale: None,
        }])
    }
}
