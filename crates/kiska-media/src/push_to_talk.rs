//! Push-to-talk capture engine.
//!
//! The host feeds raw microphone audio (16-bit little-endian PCM, mono) while
//! the talk button is held. On `stop` the buffered audio is sent to a
//! Whisper-compatible endpoint and the transcription is reported as the
//! capture's final result.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use kiska_core::config::TranscriptionConfig;

use crate::capture::{CaptureEmitter, CaptureEngine, CaptureEventKind};
use crate::transcription::WhisperTranscriber;

pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Recordings shorter than this are treated as an accidental tap.
const MIN_UTTERANCE_MS: u64 = 250;

struct Recording {
    emitter: CaptureEmitter,
    locale: String,
    samples: Vec<i16>,
}

impl Recording {
    fn duration_ms(&self, sample_rate: u32) -> u64 {
        (self.samples.len() as u64 * 1000) / sample_rate as u64
    }
}

pub struct PushToTalkEngine {
    id: String,
    transcriber: Arc<WhisperTranscriber>,
    sample_rate: u32,
    recording: Mutex<Option<Recording>>,
}

impl PushToTalkEngine {
    pub fn from_config(config: &TranscriptionConfig) -> anyhow::Result<Self> {
        Ok(Self {
            id: config.provider.clone(),
            transcriber: Arc::new(WhisperTranscriber::from_config(config)?),
            sample_rate: DEFAULT_SAMPLE_RATE,
            recording: Mutex::new(None),
        })
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Append raw audio to the open recording. Returns false when not recording.
    pub fn push_audio(&self, raw: &[u8]) -> bool {
        let mut recording = self.recording.lock().unwrap_or_else(|e| e.into_inner());
        let Some(recording) = recording.as_mut() else {
            return false;
        };
        recording.samples.extend(
            raw.chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );
        true
    }
}

#[async_trait]
impl CaptureEngine for PushToTalkEngine {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self, locale: &str, emitter: CaptureEmitter) -> anyhow::Result<()> {
        let previous = self.recording.lock().unwrap_or_else(|e| e.into_inner()).replace(Recording {
            emitter: emitter.clone(),
            locale: locale.to_string(),
            samples: Vec::new(),
        });
        if let Some(previous) = previous {
            debug!(capture = previous.emitter.capture_id(), "Discarding unfinished recording");
        }
        emitter.emit(CaptureEventKind::Started);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let recording = self.recording.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(recording) = recording else {
            return Ok(());
        };

        let duration_ms = recording.duration_ms(self.sample_rate);
        if duration_ms < MIN_UTTERANCE_MS {
            debug!(duration_ms, "Recording too short to transcribe");
            recording.emitter.emit(CaptureEventKind::Ended);
            return Ok(());
        }

        info!(capture = recording.emitter.capture_id(), duration_ms, "Transcribing utterance");
        let transcriber = Arc::clone(&self.transcriber);
        let sample_rate = self.sample_rate;
        tokio::spawn(async move {
            let Recording { emitter, locale, samples } = recording;
            match transcriber.transcribe(&samples, sample_rate, &locale).await {
                Ok(text) if !text.is_empty() => {
                    emitter.emit(CaptureEventKind::Results(vec![text]));
                }
                Ok(_) => debug!("Transcription was empty"),
                Err(e) => {
                    warn!(%e, "Transcription failed");
                    emitter.emit(CaptureEventKind::Error(e.to_string()));
                    return;
                }
            }
            emitter.emit(CaptureEventKind::Ended);
        });
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.recording.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }
}
