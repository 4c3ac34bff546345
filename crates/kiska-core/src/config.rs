//! Configuration loading, validation, and dotted-path access.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KiskaError, Result};

static ENV_REF_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("static env pattern is valid"));

/// Lower bound for speech rate and pitch.
pub const MIN_VOICE_SETTING: f32 = 0.5;
/// Upper bound for speech rate and pitch.
pub const MAX_VOICE_SETTING: f32 = 2.0;

/// Top-level KISKA configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant: Option<AssistantConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolver: Option<ResolverConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather: Option<WeatherConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Turn-taking behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_assistant_name")]
    pub name: String,

    /// Spoken once when a session opens. Empty disables the greeting.
    #[serde(default = "default_greeting")]
    pub greeting: String,

    #[serde(default = "default_locale")]
    pub locale: String,

    /// Delay between the sign-out acknowledgement and the actual sign-out.
    #[serde(default = "default_sign_out_grace_ms")]
    pub sign_out_grace_ms: u64,

    /// Longest a capture may stay open without a terminal event.
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,

    /// How long to wait for final results after the talk button is released.
    #[serde(default = "default_release_grace_ms")]
    pub release_grace_ms: u64,

    /// Longest an utterance may play before the turn is released anyway.
    #[serde(default = "default_speech_timeout_ms")]
    pub speech_timeout_ms: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: default_assistant_name(),
            greeting: default_greeting(),
            locale: default_locale(),
            sign_out_grace_ms: default_sign_out_grace_ms(),
            capture_timeout_ms: default_capture_timeout_ms(),
            release_grace_ms: default_release_grace_ms(),
            speech_timeout_ms: default_speech_timeout_ms(),
        }
    }
}

fn default_assistant_name() -> String {
    "KISKA".into()
}

fn default_greeting() -> String {
    "Hello, I'm KISKA. How can I assist you today?".into()
}

fn default_locale() -> String {
    "en-US".into()
}

fn default_sign_out_grace_ms() -> u64 {
    2_000
}

fn default_capture_timeout_ms() -> u64 {
    30_000
}

fn default_release_grace_ms() -> u64 {
    1_500
}

fn default_speech_timeout_ms() -> u64 {
    120_000
}

/// Text-to-speech settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Synthesis engine: "console" (default) or "elevenlabs".
    #[serde(default = "default_voice_engine")]
    pub engine: String,

    #[serde(default = "default_rate")]
    pub rate: f32,

    #[serde(default = "default_pitch")]
    pub pitch: f32,

    /// Voice identifier understood by the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Engine model (e.g. "eleven_turbo_v2").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            engine: default_voice_engine(),
            rate: default_rate(),
            pitch: default_pitch(),
            voice: None,
            api_key: None,
            api_key_env: None,
            model: None,
        }
    }
}

fn default_voice_engine() -> String {
    "console".into()
}

/// Default speech rate.
pub fn default_rate() -> f32 {
    0.9
}

/// Default speech pitch.
pub fn default_pitch() -> f32 {
    1.0
}

impl VoiceConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Speech-to-text settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Capture engine: "console" (default), "groq" or "openai".
    #[serde(default = "default_transcription_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model name (e.g. "whisper-large-v3-turbo").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_transcription_provider(),
            api_key: None,
            api_key_env: None,
            model: None,
        }
    }
}

fn default_transcription_provider() -> String {
    "console".into()
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Reply resolver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// "sample" (default), "openai", "openrouter" or "ollama".
    #[serde(default = "default_resolver_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Messages of context kept by the resolver client.
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default = "default_resolver_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            provider: default_resolver_provider(),
            api_key: None,
            api_key_env: None,
            base_url: None,
            model: None,
            system_prompt: None,
            max_history: default_max_history(),
            max_tokens: default_max_tokens(),
            temperature: None,
            timeout_ms: default_resolver_timeout_ms(),
        }
    }
}

fn default_resolver_provider() -> String {
    "sample".into()
}

fn default_max_history() -> usize {
    20
}

fn default_max_tokens() -> u32 {
    512
}

fn default_resolver_timeout_ms() -> u64 {
    30_000
}

impl ResolverConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Weather indicator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_weather_location")]
    pub location: String,

    /// "imperial" (default) or "metric".
    #[serde(default = "default_weather_units")]
    pub units: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: None,
            location: default_weather_location(),
            units: default_weather_units(),
        }
    }
}

fn default_weather_location() -> String {
    "London".into()
}

fn default_weather_units() -> String {
    "imperial".into()
}

impl WeatherConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Credential service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// "local" (default) or "firebase".
    #[serde(default = "default_auth_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

fn default_auth_provider() -> String {
    "local".into()
}

impl AuthConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "kiska_agent=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    ENV_REF_RE
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Clamp a rate or pitch into the supported range.
///
/// Infinities clamp to the nearest bound; NaN yields `fallback`.
pub fn clamp_voice_setting(value: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        return fallback;
    }
    value.clamp(MIN_VOICE_SETTING, MAX_VOICE_SETTING)
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse config text (JSON5) after env substitution.
    pub fn parse(raw: &str) -> Result<Self> {
        let substituted = substitute_env_vars(raw);
        json5::from_str(&substituted).map_err(|e| KiskaError::Config(e.to_string()))
    }

    /// Default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn assistant(&self) -> AssistantConfig {
        self.assistant.clone().unwrap_or_default()
    }

    pub fn voice(&self) -> VoiceConfig {
        self.voice.clone().unwrap_or_default()
    }

    pub fn transcription(&self) -> TranscriptionConfig {
        self.transcription.clone().unwrap_or_default()
    }

    pub fn resolver(&self) -> ResolverConfig {
        self.resolver.clone().unwrap_or_default()
    }

    pub fn weather(&self) -> WeatherConfig {
        self.weather.clone().unwrap_or_default()
    }

    pub fn auth_provider(&self) -> String {
        self.auth
            .as_ref()
            .map(|a| a.provider.clone())
            .unwrap_or_else(default_auth_provider)
    }

    /// API key for the configured credential provider, if any.
    pub fn auth_api_key(&self) -> Option<String> {
        self.auth.as_ref().and_then(|a| a.resolve_api_key())
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    pub fn locale(&self) -> String {
        self.assistant
            .as_ref()
            .map(|a| a.locale.clone())
            .unwrap_or_else(default_locale)
    }

    pub fn sign_out_grace(&self) -> Duration {
        Duration::from_millis(self.assistant().sign_out_grace_ms)
    }

    /// Get a config value by dotted path (e.g. "voice.rate", "resolver.provider").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Set a config value by dotted path.
    pub fn set_path(&mut self, path: &str, value: serde_json::Value) -> anyhow::Result<()> {
        let mut json = serde_json::to_value(&*self)
            .map_err(|e| anyhow::anyhow!("Config serialization error: {e}"))?;

        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            anyhow::bail!("Empty path");
        };

        let mut current = &mut json;
        for segment in parents {
            if current.get(*segment).is_none() {
                current[*segment] = serde_json::json!({});
            }
            current = current
                .get_mut(*segment)
                .ok_or_else(|| anyhow::anyhow!("Cannot descend into '{segment}'"))?;
        }
        current[*last] = value;

        *self = serde_json::from_value(json)
            .map_err(|e| anyhow::anyhow!("Config deserialization error: {e}"))?;
        Ok(())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let resolver = self.resolver();
        match resolver.provider.as_str() {
            "sample" | "ollama" => {}
            "openai" | "openrouter" => {
                if resolver.resolve_api_key().is_none() {
                    warnings.push(format!(
                        "Resolver '{}' has no API key configured",
                        resolver.provider
                    ));
                }
            }
            other => errors.push(format!("Unknown resolver provider '{other}'")),
        }
        if resolver.max_history == 0 {
            warnings.push("resolver.max_history is 0; replies will carry no context".into());
        }

        let voice = self.voice();
        for (name, value) in [("rate", voice.rate), ("pitch", voice.pitch)] {
            if !(MIN_VOICE_SETTING..=MAX_VOICE_SETTING).contains(&value) {
                warnings.push(format!(
                    "voice.{name} {value} is outside {MIN_VOICE_SETTING}-{MAX_VOICE_SETTING} and will be clamped"
                ));
            }
        }
        if voice.engine == "elevenlabs" && voice.resolve_api_key().is_none() {
            warnings.push("Voice engine 'elevenlabs' has no API key configured".into());
        }

        let transcription = self.transcription();
        match transcription.provider.as_str() {
            "console" => {}
            "groq" | "openai" => {
                if transcription.resolve_api_key().is_none() {
                    warnings.push(format!(
                        "Transcription provider '{}' has no API key configured",
                        transcription.provider
                    ));
                }
            }
            other => errors.push(format!("Unknown transcription provider '{other}'")),
        }

        match self.auth_provider().as_str() {
            "local" => {}
            "firebase" => {
                if self.auth.as_ref().and_then(|a| a.resolve_api_key()).is_none() {
                    errors.push("Auth provider 'firebase' requires an API key".into());
                }
            }
            other => errors.push(format!("Unknown auth provider '{other}'")),
        }

        let assistant = self.assistant();
        for (name, value) in [
            ("capture_timeout_ms", assistant.capture_timeout_ms),
            ("release_grace_ms", assistant.release_grace_ms),
            ("speech_timeout_ms", assistant.speech_timeout_ms),
        ] {
            if value == 0 {
                errors.push(format!("assistant.{name} cannot be 0"));
            }
        }
        if assistant.locale.trim().is_empty() {
            errors.push("assistant.locale cannot be empty".into());
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for KISKA data: `~/.kiska/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kiska")
}
