mod account;
mod chat;
mod logging;
mod session;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use kiska_core::config::Config;
use kiska_core::transcript::Origin;
use kiska_media::SynthesisAdapter;
use kiska_providers::weather::WeatherClient;

use crate::account::AccountAction;
use crate::session::{Session, SessionOptions, credentials_from_config, synthesis_engine};

#[derive(Parser)]
#[command(
    name = "kiska",
    about = "KISKA voice assistant: talk, listen and reply from the terminal",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive conversation
    Chat {
        /// Skip the spoken greeting
        #[arg(long)]
        no_greeting: bool,
    },

    /// Ask a single question and print the reply
    Ask {
        /// The question
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Sign in to an existing account
    Login {
        #[arg(long)]
        email: Option<String>,
    },

    /// Create an account
    Signup {
        #[arg(long)]
        email: Option<String>,
    },

    /// Send a password reset email
    ResetPassword {
        #[arg(long)]
        email: Option<String>,
    },

    /// Show current weather conditions
    Weather {
        /// City name (defaults to the configured location)
        location: Option<String>,
    },

    /// List voices offered by the synthesis engine
    Voices,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show configured engines and providers
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// Check the configuration for problems
    Validate,
}

/// Interpret a command-line value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    logging::init(&config.logging(), cli.verbose);
    tracing::debug!(path = %config_path.display(), "Config loaded");

    match cli.command {
        Commands::Chat { no_greeting } => {
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("{w}");
            }
            if let Some(first) = errors.first() {
                anyhow::bail!("Invalid config: {first}");
            }

            let session = Session::build(&config, SessionOptions::default())?;
            if config.auth_provider() != "local" {
                let user = account::sign_in_interactive(&session.credentials).await?;
                println!("Signed in as {}", user.email);
            }
            let name = config.assistant().name;
            chat::run(session, &name, !no_greeting).await?;
        }
        Commands::Ask { text } => {
            let question = text.join(" ");
            let session = Session::build(&config, SessionOptions { instant_speech: true })?;
            session.handle.submit_text(question.as_str());

            let budget = Duration::from_millis(config.resolver().timeout_ms) + Duration::from_secs(5);
            let transcript = tokio::time::timeout(
                budget,
                session.handle.settle(|t| t.iter().any(|e| e.origin == Origin::Assistant)),
            )
            .await;
            session.close().await;

            let transcript = transcript.map_err(|_| anyhow::anyhow!("No reply within {budget:?}"))?;
            match transcript.iter().rev().find(|e| e.origin == Origin::Assistant) {
                Some(reply) => println!("{}", reply.text),
                None => anyhow::bail!("Nothing to answer in '{question}'"),
            }
        }
        Commands::Login { email } => {
            account::run(credentials_from_config(&config)?, AccountAction::SignIn, email).await?;
        }
        Commands::Signup { email } => {
            account::run(credentials_from_config(&config)?, AccountAction::SignUp, email).await?;
        }
        Commands::ResetPassword { email } => {
            account::run(credentials_from_config(&config)?, AccountAction::ResetPassword, email)
                .await?;
        }
        Commands::Weather { location } => {
            let client = WeatherClient::new(config.weather());
            let report = client.current_or_placeholder(location.as_deref()).await;
            println!("{}: {}, {}", report.location, report.temperature, report.condition);
            println!("  feels like {}", report.feels_like);
            println!("  humidity {}, wind {}", report.humidity, report.wind_speed);
            println!("  {}", report.icon_url());
        }
        Commands::Voices => {
            let voice = config.voice();
            let engine = synthesis_engine(&voice, &config.assistant().name, &SessionOptions::default())?;
            let adapter = SynthesisAdapter::with_config(engine, &voice);
            let voices = adapter.voices().await?;
            if voices.is_empty() {
                println!("Engine '{}' offers no voice list", adapter.engine_id());
            }
            for v in voices {
                match v.locale {
                    Some(locale) => println!("{}  {} ({locale})", v.id, v.name),
                    None => println!("{}  {}", v.id, v.name),
                }
            }
        }
        Commands::Status => {
            let assistant = config.assistant();
            let voice = config.voice();
            let resolver = config.resolver();
            println!("KISKA v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Assistant: {} ({})", assistant.name, assistant.locale);
            println!(
                "Voice: {} (rate {}, pitch {})",
                voice.engine, voice.rate, voice.pitch
            );
            println!("Transcription: {}", config.transcription().provider);
            match &resolver.model {
                Some(model) => println!("Resolver: {} ({model})", resolver.provider),
                None => println!("Resolver: {}", resolver.provider),
            }
            println!("Auth: {}", config.auth_provider());

            let (warnings, errors) = config.validate();
            println!("Config check: {} warning(s), {} error(s)", warnings.len(), errors.len());
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No value at '{key}'"),
            },
            ConfigAction::Set { key, value } => {
                let mut config = config;
                config.set_path(&key, parse_value(&value))?;
                let (_, errors) = config.validate();
                if let Some(first) = errors.first() {
                    anyhow::bail!("Refusing to save: {first}");
                }
                config.save(&config_path)?;
                println!("Set {key} in {}", config_path.display());
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} config error(s)", errors.len());
                }
                println!("Config OK");
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("0.8"), serde_json::json!(0.8));
        assert_eq!(parse_value("true"), serde_json::json!(true));
        assert_eq!(parse_value("openai"), serde_json::json!("openai"));
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["kiska", "-v", "ask", "what", "time", "is", "it"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Ask { ref text } if text.len() == 4));

        let cli = Cli::try_parse_from(["kiska", "config", "set", "voice.rate", "1.2"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { action: ConfigAction::Set { .. } }));
    }
}
