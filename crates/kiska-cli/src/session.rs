//! Composition root: picks engines and services from config and wires a coordinator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use kiska_agent::{Coordinator, CoordinatorHandle};
use kiska_core::auth::{CredentialService, LocalCredentialService};
use kiska_core::config::{Config, VoiceConfig, data_dir};
use kiska_media::console::{ConsoleSpeaker, DictationEngine};
use kiska_media::push_to_talk::PushToTalkEngine;
use kiska_media::speech_stream::ElevenLabsEngine;
use kiska_media::{CaptureAdapter, CaptureEngine, SynthesisAdapter, SynthesisEngine};
use kiska_providers::identity::FirebaseCredentialService;
use kiska_providers::{ResolverClient, resolver_from_config};

/// How the capture side is fed from the terminal.
pub enum CaptureInput {
    /// Typed lines stand in for recognized speech.
    Dictation(Arc<DictationEngine>),
    /// Raw 16-bit mono PCM is uploaded to a transcription service.
    Recording(Arc<PushToTalkEngine>),
}

pub struct Session {
    pub handle: CoordinatorHandle,
    pub task: JoinHandle<()>,
    pub input: CaptureInput,
    pub synthesis: Arc<SynthesisAdapter>,
    pub credentials: Arc<dyn CredentialService>,
}

/// Options the command line layers over the config file.
#[derive(Default)]
pub struct SessionOptions {
    /// Skip speech pacing so one-shot commands return promptly.
    pub instant_speech: bool,
}

pub fn credentials_from_config(config: &Config) -> anyhow::Result<Arc<dyn CredentialService>> {
    match config.auth_provider().as_str() {
        "local" => Ok(Arc::new(LocalCredentialService::new())),
        "firebase" => {
            let api_key = config
                .auth_api_key()
                .context("Auth provider 'firebase' requires an API key")?;
            Ok(Arc::new(FirebaseCredentialService::new(api_key)))
        }
        other => anyhow::bail!("Unknown auth provider '{other}'"),
    }
}

pub fn synthesis_engine(
    voice: &VoiceConfig,
    speaker: &str,
    options: &SessionOptions,
) -> anyhow::Result<Arc<dyn SynthesisEngine>> {
    match voice.engine.as_str() {
        "console" => {
            let mut engine = ConsoleSpeaker::new(speaker).quiet();
            if options.instant_speech {
                engine = engine.with_pace(Duration::ZERO);
            }
            Ok(Arc::new(engine))
        }
        "elevenlabs" => {
            let (audio_tx, audio_rx) = mpsc::unbounded_channel();
            spawn_audio_sink(audio_rx);
            Ok(Arc::new(ElevenLabsEngine::from_config(voice, audio_tx)?))
        }
        other => anyhow::bail!("Unknown voice engine '{other}'"),
    }
}

fn capture_input(config: &Config) -> anyhow::Result<CaptureInput> {
    let transcription = config.transcription();
    match transcription.provider.as_str() {
        "console" => Ok(CaptureInput::Dictation(Arc::new(DictationEngine::new()))),
        "groq" | "openai" => Ok(CaptureInput::Recording(Arc::new(
            PushToTalkEngine::from_config(&transcription)?,
        ))),
        other => anyhow::bail!("Unknown transcription provider '{other}'"),
    }
}

/// Write streamed speech audio to `~/.kiska/speech.mp3`.
fn spawn_audio_sink(mut audio_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    tokio::spawn(async move {
        let path = data_dir().join("speech.mp3");
        if let Err(e) = tokio::fs::create_dir_all(data_dir()).await {
            warn!(error = %e, "Cannot create data directory; discarding speech audio");
        }
        let mut file = match tokio::fs::File::create(&path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot open speech audio file");
                while audio_rx.recv().await.is_some() {}
                return;
            }
        };
        while let Some(chunk) = audio_rx.recv().await {
            debug!(bytes = chunk.len(), "Speech audio");
            if let Err(e) = file.write_all(&chunk).await {
                warn!(error = %e, "Failed to write speech audio");
                break;
            }
        }
    });
}

impl Session {
    pub fn build(config: &Config, options: SessionOptions) -> anyhow::Result<Self> {
        let assistant = config.assistant();
        let credentials = credentials_from_config(config)?;

        let input = capture_input(config)?;
        let capture_engine: Arc<dyn CaptureEngine> = match &input {
            CaptureInput::Dictation(engine) => engine.clone(),
            CaptureInput::Recording(engine) => engine.clone(),
        };
        let capture = Arc::new(CaptureAdapter::new(capture_engine));

        let voice = config.voice();
        let synthesis = Arc::new(SynthesisAdapter::with_config(
            synthesis_engine(&voice, &assistant.name, &options)?,
            &voice,
        ));

        let resolver_config = config.resolver();
        let resolver = Arc::new(ResolverClient::from_config(
            resolver_from_config(&resolver_config)?,
            &resolver_config,
        ));

        info!(
            capture = capture.engine_id(),
            voice = synthesis.engine_id(),
            resolver = resolver.resolver_id(),
            "Session assembled"
        );

        let coordinator = Coordinator::new(
            assistant,
            capture,
            synthesis.clone(),
            resolver,
            credentials.clone(),
        );
        let (handle, task) = coordinator.spawn();

        Ok(Self {
            handle,
            task,
            input,
            synthesis,
            credentials,
        })
    }

    /// Stop the coordinator and wait for it to release its engines.
    pub async fn close(self) {
        self.handle.shutdown();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Coordinator task ended abnormally");
        }
    }
}
