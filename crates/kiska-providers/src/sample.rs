//! Offline resolver answering from a fixed keyword table.

use async_trait::async_trait;

use crate::{HistoryMessage, ReplyResolver};

/// Checked in order; the first keyword contained in the lowercased input wins.
const SAMPLE_REPLIES: &[(&str, &str)] = &[
    ("hello", "Hello! How can I assist you today?"),
    ("hi", "Hi there! What can I do for you?"),
    ("how are you", "I'm functioning perfectly. How can I help you?"),
    ("what time is it", "I'll check the current time for you."),
    ("weather", "I'll get the current weather information for you."),
    (
        "who are you",
        "I am KISKA, your personal AI assistant. I'm designed to help you with information, tasks, and more.",
    ),
    (
        "what can you do",
        "I can provide information, check the weather, tell you the time, help manage your tasks, and much more. Just ask!",
    ),
    ("thank you", "You're welcome! Is there anything else I can help with?"),
    ("thanks", "You're welcome! Need anything else?"),
    ("goodbye", "Goodbye! Have a great day!"),
    ("bye", "Bye! Feel free to ask for help anytime."),
];

pub const FALLBACK_REPLY: &str =
    "I'm not sure how to respond to that. Is there something specific you'd like to know?";

#[derive(Debug, Default)]
pub struct SampleResolver;

impl SampleResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn lookup(text: &str) -> &'static str {
        let lower = text.to_lowercase();
        SAMPLE_REPLIES
            .iter()
            .find(|(keyword, _)| lower.contains(keyword))
            .map(|(_, reply)| *reply)
            .unwrap_or(FALLBACK_REPLY)
    }
}

#[async_trait]
impl ReplyResolver for SampleResolver {
    fn id(&self) -> &str {
        "sample"
    }

    async fn resolve(&self, text: &str, _history: &[HistoryMessage]) -> anyhow::Result<String> {
        Ok(Self::lookup(text).to_string())
    }
}
