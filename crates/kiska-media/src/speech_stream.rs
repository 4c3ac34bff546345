//! ElevenLabs streaming synthesis engine.
//!
//! Audio arrives as raw PCM (16-bit, 16kHz, mono) and is forwarded chunk by
//! chunk to an audio sink owned by the host. The utterance is done when the
//! stream ends.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use kiska_core::config::VoiceConfig;

use crate::synthesis::{SynthesisEmitter, SynthesisEngine, Utterance, VoiceInfo};

const API_BASE: &str = "https://api.elevenlabs.io/v1";
const DEFAULT_VOICE: &str = "Rachel";
const DEFAULT_MODEL: &str = "eleven_turbo_v2";

pub fn stream_url(voice: &str) -> String {
    format!("{API_BASE}/text-to-speech/{voice}/stream")
}

/// ElevenLabs accepts speeds between 0.7 and 1.2; map the adapter's 0.5–2.0 range onto it.
pub fn provider_speed(rate: f32) -> f32 {
    (rate.clamp(0.5, 2.0) * 0.85 + 0.15).clamp(0.7, 1.2)
}

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    voices: Vec<VoiceEntry>,
}

#[derive(Debug, Deserialize)]
struct VoiceEntry {
    voice_id: String,
    name: String,
    #[serde(default)]
    labels: std::collections::HashMap<String, String>,
}

pub struct ElevenLabsEngine {
    client: reqwest::Client,
    api_key: String,
    model: String,
    default_voice: String,
    audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    playing: Mutex<Option<CancellationToken>>,
}

impl ElevenLabsEngine {
    /// Create the engine. Audio chunks are delivered to `audio_tx`.
    pub fn from_config(
        config: &VoiceConfig,
        audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    ) -> anyhow::Result<Self> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| anyhow::anyhow!("No ElevenLabs API key configured"))?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.into()),
            default_voice: config.voice.clone().unwrap_or_else(|| DEFAULT_VOICE.into()),
            audio_tx,
            playing: Mutex::new(None),
        })
    }

    fn replace_playback(&self, token: Option<CancellationToken>) {
        let previous = std::mem::replace(
            &mut *self.playing.lock().unwrap_or_else(|e| e.into_inner()),
            token,
        );
        if let Some(previous) = previous {
            previous.cancel();
        }
    }
}

async fn stream_utterance(
    request: reqwest::RequestBuilder,
    audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let resp = request.send().await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("TTS API error {status}: {body}");
    }

    let mut stream = resp.bytes_stream();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    if audio_tx.send(bytes.to_vec()).is_err() {
                        debug!("Audio sink dropped, ending stream");
                        return Ok(());
                    }
                }
                Some(Err(e)) => anyhow::bail!("TTS stream error: {e}"),
                None => return Ok(()),
            }
        }
    }
}

#[async_trait]
impl SynthesisEngine for ElevenLabsEngine {
    fn id(&self) -> &str {
        "elevenlabs"
    }

    async fn speak(&self, utterance: Utterance, emitter: SynthesisEmitter) -> anyhow::Result<()> {
        let voice = utterance.voice.as_deref().unwrap_or(&self.default_voice);
        let request = self
            .client
            .post(stream_url(voice))
            .header("xi-api-key", &self.api_key)
            .json(&serde_json::json!({
                "text": utterance.text,
                "model_id": self.model,
                "output_format": "pcm_16000",
                "voice_settings": { "speed": provider_speed(utterance.rate) },
            }));

        let cancel = CancellationToken::new();
        self.replace_playback(Some(cancel.clone()));

        debug!(utterance = utterance.id, voice, "Starting TTS stream");
        let audio_tx = self.audio_tx.clone();
        tokio::spawn(async move {
            match stream_utterance(request, audio_tx, cancel.clone()).await {
                Ok(()) if cancel.is_cancelled() => {}
                Ok(()) => emitter.done(),
                Err(e) => {
                    warn!(utterance = emitter.utterance_id(), %e, "TTS stream failed");
                    emitter.error(e.to_string());
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.replace_playback(None);
        Ok(())
    }

    async fn voices(&self) -> anyhow::Result<Vec<VoiceInfo>> {
        let resp = self
            .client
            .get(format!("{API_BASE}/voices"))
            .header("xi-api-key", &self.api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("Voice list request failed: {}", resp.status());
        }
        let body: VoicesResponse = resp.json().await?;
        Ok(body
            .voices
            .into_iter()
            .map(|v| VoiceInfo {
                locale: v.labels.get("accent").cloned(),
                id: v.voice_id,
                name: v.name,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url() {
        let url = stream_url("Rachel");
        assert!(url.starts_with("https://api.elevenlabs.io"));
        assert!(url.ends_with("/Rachel/stream"));
    }

    #[test]
    fn test_provider_speed_stays_in_range() {
        assert!((provider_speed(1.0) - 1.0).abs() < 1e-6);
        assert_eq!(provider_speed(2.0), 1.2);
        assert_eq!(provider_speed(0.5), 0.7);
    }

    #[test]
    fn test_requires_api_key() {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(ElevenLabsEngine::from_config(&VoiceConfig::default(), tx.clone()).is_err());

        let config = VoiceConfig {
            engine: "elevenlabs".into(),
            api_key: Some("xi-test".into()),
            ..Default::default()
        };
        let engine = ElevenLabsEngine::from_config(&config, tx).unwrap();
        assert_eq!(engine.default_voice, DEFAULT_VOICE);
    }

    #[test]
    fn test_voice_list_parsing() {
        let body: VoicesResponse = serde_json::from_str(
            r#"{"voices":[{"voice_id":"21m00","name":"Rachel","labels":{"accent":"american"}}]}"#,
        )
        .unwrap();
        assert_eq!(body.voices[0].voice_id, "21m00");
        assert_eq!(body.voices[0].labels["accent"], "american");
    }
}
