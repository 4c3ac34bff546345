//! Whisper-compatible speech-to-text over HTTP (Groq, OpenAI).

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use kiska_core::config::TranscriptionConfig;

const DEFAULT_MODEL: &str = "whisper-large-v3-turbo";

/// Transcription endpoint for a provider name, if it is one we speak to.
pub fn endpoint_for(provider: &str) -> Option<&'static str> {
    match provider {
        "groq" => Some("https://api.groq.com/openai/v1/audio/transcriptions"),
        "openai" => Some("https://api.openai.com/v1/audio/transcriptions"),
        _ => None,
    }
}

/// Encode mono 16-bit PCM as a WAV file.
pub fn encode_wav(pcm: &[i16], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS: u16 = 16;

    let data_len = (pcm.len() * 2) as u32;
    let block_align = CHANNELS * BITS / 8;
    let byte_rate = sample_rate * block_align as u32;

    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // linear PCM
    wav.extend_from_slice(&CHANNELS.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&BITS.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend(pcm.iter().flat_map(|s| s.to_le_bytes()));
    wav
}

/// "en-US" → "en". Whisper wants an ISO-639-1 language, not a full locale.
pub fn language_hint(locale: &str) -> Option<String> {
    let language = locale.split(['-', '_']).next()?.trim().to_ascii_lowercase();
    (language.len() == 2).then_some(language)
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

pub struct WhisperTranscriber {
    client: reqwest::Client,
    endpoint: &'static str,
    api_key: String,
    model: String,
}

impl WhisperTranscriber {
    pub fn from_config(config: &TranscriptionConfig) -> Result<Self> {
        let endpoint = endpoint_for(&config.provider).with_context(|| {
            format!("'{}' is not an HTTP transcription provider", config.provider)
        })?;
        let api_key = config
            .resolve_api_key()
            .context("No transcription API key configured")?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.into()),
        })
    }

    /// Transcribe one utterance. Returns the trimmed text, which may be empty.
    pub async fn transcribe(&self, pcm: &[i16], sample_rate: u32, locale: &str) -> Result<String> {
        let wav = encode_wav(pcm, sample_rate);
        debug!(endpoint = self.endpoint, model = %self.model, wav_bytes = wav.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "json")
            .part("file", part);
        if let Some(language) = language_hint(locale) {
            form = form.text("language", language);
        }

        let resp = self
            .client
            .post(self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Transcription API error {status}: {body}");
        }

        let body: TranscriptionResponse = resp.json().await?;
        Ok(body.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_layout() {
        let wav = encode_wav(&[0i16; 8_000], 16_000);
        assert_eq!(wav.len(), 44 + 16_000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[36..40], b"data");

        let rate = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(rate, 16_000);
        let data_len = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(data_len, 16_000);
    }

    #[test]
    fn test_language_hint() {
        assert_eq!(language_hint("en-US").as_deref(), Some("en"));
        assert_eq!(language_hint("pt_BR").as_deref(), Some("pt"));
        assert_eq!(language_hint(""), None);
    }

    #[test]
    fn test_from_config_rejects_console_and_missing_key() {
        let console = TranscriptionConfig::default();
        assert!(WhisperTranscriber::from_config(&console).is_err());

        let groq = TranscriptionConfig {
            provider: "groq".into(),
            ..Default::default()
        };
        let err = WhisperTranscriber::from_config(&groq).err().unwrap();
        assert!(err.to_string().contains("API key"));

        let keyed = TranscriptionConfig {
            provider: "openai".into(),
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        let transcriber = WhisperTranscriber::from_config(&keyed).unwrap();
        assert!(transcriber.endpoint.contains("openai.com"));
        assert_eq!(transcriber.model, DEFAULT_MODEL);
    }
}
