//! Resolver client: history, timeout and error normalization around a resolver.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use kiska_core::config::ResolverConfig;

use crate::{HistoryMessage, ReplyResolver, ResolveError};

const DEFAULT_MAX_HISTORY: usize = 20;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ResolverClient {
    resolver: Arc<dyn ReplyResolver>,
    history: Mutex<VecDeque<HistoryMessage>>,
    max_history: usize,
    timeout: Duration,
}

impl ResolverClient {
    pub fn new(resolver: Arc<dyn ReplyResolver>) -> Self {
        Self {
            resolver,
            history: Mutex::new(VecDeque::new()),
            max_history: DEFAULT_MAX_HISTORY,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(resolver: Arc<dyn ReplyResolver>, config: &ResolverConfig) -> Self {
        Self::new(resolver)
            .with_max_history(config.max_history)
            .with_timeout(Duration::from_millis(config.timeout_ms))
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn resolver_id(&self) -> &str {
        self.resolver.id()
    }

    /// Resolve a reply for `text`.
    ///
    /// On success both the input and the reply join the history. Failures,
    /// blank replies and timeouts all come back as [`ResolveError`].
    pub async fn resolve(&self, text: &str) -> Result<String, ResolveError> {
        let history = self.history();
        let resolver = self.resolver.id().to_string();
        debug!(resolver = %resolver, context = history.len(), "Resolving reply");

        let reply = match tokio::time::timeout(self.timeout, self.resolver.resolve(text, &history)).await {
            Err(_) => {
                warn!(resolver = %resolver, timeout = ?self.timeout, "Resolver timed out");
                return Err(ResolveError::Timeout {
                    resolver,
                    after: self.timeout,
                });
            }
            Ok(Err(e)) => {
                warn!(resolver = %resolver, error = %e, "Resolver failed");
                return Err(ResolveError::Failed {
                    resolver,
                    message: e.to_string(),
                });
            }
            Ok(Ok(reply)) => reply,
        };

        let reply = reply.trim().to_string();
        if reply.is_empty() {
            return Err(ResolveError::EmptyReply(resolver));
        }

        self.remember(HistoryMessage::user(text));
        self.remember(HistoryMessage::assistant(reply.clone()));
        Ok(reply)
    }

    /// Context currently kept, oldest first.
    pub fn history(&self) -> Vec<HistoryMessage> {
        self.lock_history().iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        self.lock_history().clear();
    }

    fn remember(&self, message: HistoryMessage) {
        let mut history = self.lock_history();
        history.push_back(message);
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, VecDeque<HistoryMessage>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kiska_core::transcript::Origin;

    struct Echo;

    #[async_trait]
    impl ReplyResolver for Echo {
        fn id(&self) -> &str {
            "echo"
        }

        async fn resolve(&self, text: &str, history: &[HistoryMessage]) -> anyhow::Result<String> {
            match text {
                "fail" => anyhow::bail!("upstream 500"),
                "blank" => Ok("   ".into()),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok("late".into())
                }
                _ => Ok(format!("{text} ({} before)", history.len())),
            }
        }
    }

    #[tokio::test]
    async fn test_success_records_history() {
        let client = ResolverClient::new(Arc::new(Echo));
        assert_eq!(client.resolve("one").await.unwrap(), "one (0 before)");
        assert_eq!(client.resolve("two").await.unwrap(), "two (2 before)");

        let history = client.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], HistoryMessage::user("one"));
        assert_eq!(history[3].origin, Origin::Assistant);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let client = ResolverClient::new(Arc::new(Echo)).with_max_history(3);
        for text in ["a", "b", "c"] {
            client.resolve(text).await.unwrap();
        }
        let history = client.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0], HistoryMessage::assistant("b (2 before)"));

        client.clear_history();
        assert!(client.history().is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_normalized() {
        let client = ResolverClient::new(Arc::new(Echo)).with_timeout(Duration::from_millis(20));

        assert!(matches!(
            client.resolve("fail").await,
            Err(ResolveError::Failed { ref message, .. }) if message == "upstream 500"
        ));
        assert!(matches!(client.resolve("blank").await, Err(ResolveError::EmptyReply(_))));
        assert!(matches!(client.resolve("slow").await, Err(ResolveError::Timeout { .. })));
        assert!(client.history().is_empty());
    }
}
