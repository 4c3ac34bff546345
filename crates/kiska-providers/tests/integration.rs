//! Provider integration tests: real API calls.
//!
//! These tests are skipped when the corresponding API key env var is not set.
//! Run with: `cargo test -p kiska-providers --test integration`

use kiska_core::config::{ResolverConfig, WeatherConfig};
use kiska_providers::weather::WeatherClient;
use kiska_providers::{ResolverClient, resolver_from_config};

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.is_empty())
}

#[tokio::test]
async fn test_openai_resolver_replies() {
    let Some(api_key) = env_key("OPENAI_API_KEY") else {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    };

    let config = ResolverConfig {
        provider: "openai".into(),
        api_key: Some(api_key),
        system_prompt: Some("You are a helpful assistant. Follow instructions exactly.".into()),
        temperature: Some(0.0),
        max_tokens: 20,
        ..Default::default()
    };
    let client = ResolverClient::from_config(resolver_from_config(&config).unwrap(), &config);

    let reply = client
        .resolve("Reply with exactly the word 'hello'.")
        .await
        .expect("resolve failed");
    assert!(reply.to_lowercase().contains("hello"), "got: {reply}");
    assert_eq!(client.history().len(), 2);
}

#[tokio::test]
async fn test_openrouter_resolver_replies() {
    let Some(api_key) = env_key("OPENROUTER_API_KEY") else {
        eprintln!("Skipping: OPENROUTER_API_KEY not set");
        return;
    };

    let config = ResolverConfig {
        provider: "openrouter".into(),
        api_key: Some(api_key),
        max_tokens: 20,
        ..Default::default()
    };
    let client = ResolverClient::new(resolver_from_config(&config).unwrap());
    let reply = client.resolve("Say hi in one word.").await.expect("resolve failed");
    assert!(!reply.is_empty());
}

#[tokio::test]
async fn test_bad_key_is_a_resolve_error() {
    let Some(_) = env_key("KISKA_NETWORK_TESTS") else {
        eprintln!("Skipping: KISKA_NETWORK_TESTS not set");
        return;
    };

    let config = ResolverConfig {
        provider: "openai".into(),
        api_key: Some("sk-invalid".into()),
        ..Default::default()
    };
    let client = ResolverClient::new(resolver_from_config(&config).unwrap());
    assert!(client.resolve("hello").await.is_err());
    assert!(client.history().is_empty());
}

#[tokio::test]
async fn test_openweathermap_current_conditions() {
    let Some(api_key) = env_key("OPENWEATHER_API_KEY") else {
        eprintln!("Skipping: OPENWEATHER_API_KEY not set");
        return;
    };

    let client = WeatherClient::new(WeatherConfig {
        api_key: Some(api_key),
        ..Default::default()
    });
    let report = client.current(Some("London")).await.expect("weather fetch failed");
    assert_eq!(report.location, "London");
    assert_ne!(report.temperature, "--");
}
