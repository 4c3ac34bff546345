//! Inputs answered without the reply resolver.
//!
//! Rules are checked in order against the lowercased text and the first match
//! wins, so "what time should I log out" is a time question.

use chrono::{NaiveTime, Timelike};

use crate::clock::Clock;

pub const WEATHER_REPLY: &str =
    "I'm checking the current weather for you. You can see it in the top right corner of the screen.";

pub const SIGN_OUT_REPLY: &str = "Signing you out. Goodbye!";

const SIGN_OUT_KEYWORDS: &[&str] = &["logout", "log out", "sign out", "signout"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intercept {
    Time,
    Weather,
    SignOut,
}

/// Reply chosen by an intercept rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptReply {
    pub intercept: Intercept,
    pub reply: String,
}

struct Rule {
    intercept: Intercept,
    matches: fn(&str) -> bool,
    reply: fn(&dyn Clock) -> String,
}

pub struct InterceptTable {
    rules: Vec<Rule>,
}

impl Default for InterceptTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl InterceptTable {
    /// Time, then weather, then sign-out.
    pub fn standard() -> Self {
        Self {
            rules: vec![
                Rule {
                    intercept: Intercept::Time,
                    matches: |text| text.contains("time"),
                    reply: |clock| format_clock_reply(clock.time_of_day()),
                },
                Rule {
                    intercept: Intercept::Weather,
                    matches: |text| text.contains("weather"),
                    reply: |_| WEATHER_REPLY.to_string(),
                },
                Rule {
                    intercept: Intercept::SignOut,
                    matches: |text| SIGN_OUT_KEYWORDS.iter().any(|k| text.contains(k)),
                    reply: |_| SIGN_OUT_REPLY.to_string(),
                },
            ],
        }
    }

    pub fn detect(&self, text: &str, clock: &dyn Clock) -> Option<InterceptReply> {
        let lower = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| (rule.matches)(&lower))
            .map(|rule| InterceptReply {
                intercept: rule.intercept,
                reply: (rule.reply)(clock),
            })
    }
}

/// "It's currently 3:07 PM.": 12-hour clock, zero-padded minutes.
pub fn format_clock_reply(time: NaiveTime) -> String {
    let (pm, hour) = time.hour12();
    let suffix = if pm { "PM" } else { "AM" };
    format!("It's currently {hour}:{:02} {suffix}.", time.minute())
}
