use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{error, info, warn};

use crate::providers::{ChatMessage, ChatRole, LlmProvider, LlmRequest, ProviderError};

pub const QUOTA_FALLBACK: &str = "OpenAI quota/billing issue — check API billing.";
pub const RATE_LIMIT_FALLBACK: &str = "I'm rate-limited — try again in a minute.";
pub const AUTH_FALLBACK: &str = "OpenAI auth failed. Check OPENAI_API_KEY.";
pub const ERROR_FALLBACK: &str = "Something went wrong calling OpenAI.";

/// Reply used when the model returns nothing.
pub const EMPTY_REPLY: &str = "…";

/// Exponential backoff for rate-limited completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_millis(750),
            max_backoff: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Delay after `attempt`, scaled by a uniform factor in `[0.8, 1.2)`.
    pub fn jittered_backoff_for(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::rng().random_range(0.8..1.2);
        self.backoff_for(attempt).mul_f64(jitter)
    }
}

/// Bounded chat history plus the retry loop around one provider.
///
/// `chat` never fails: terminal provider errors become a short fallback
/// string that can be sent to the chat as-is.
pub struct Conversation {
    provider: Arc<dyn LlmProvider>,
    model: String,
    history: Vec<ChatMessage>,
    max_context_messages: usize,
    retry: RetryPolicy,
}

impl Conversation {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        max_context_messages: usize,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            history: Vec::new(),
            max_context_messages,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Set or replace the leading system turn.
    pub fn set_system_message(&mut self, content: impl Into<String>) {
        let message = ChatMessage::system(content);
        match self.history.first_mut() {
            Some(first) if first.role == ChatRole::System => *first = message,
            _ => self.history.insert(0, message),
        }
    }

    /// Drop the oldest non-system turns beyond `max_context_messages`.
    pub fn trim_history(&mut self) {
        let start = usize::from(
            self.history
                .first()
                .is_some_and(|m| m.role == ChatRole::System),
        );
        let turns = self.history.len() - start;
        if turns > self.max_context_messages {
            let excess = turns - self.max_context_messages;
            self.history.drain(start..start + excess);
        }
    }

    /// Ask the model for a reply to `user_text`.
    pub async fn chat(&mut self, user_text: &str) -> String {
        self.history.push(ChatMessage::user(user_text));
        self.trim_history();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let request = LlmRequest {
                model: self.model.clone(),
                messages: self.history.clone(),
                max_tokens: None,
                temperature: None,
            };

            match self.provider.complete(&request).await {
                Ok(response) => {
                    let text = response.text.unwrap_or_default();
                    let reply = match text.trim() {
                        "" => EMPTY_REPLY.to_string(),
                        trimmed => trimmed.to_string(),
                    };
                    self.history.push(ChatMessage::assistant(reply.clone()));
                    self.trim_history();
                    return reply;
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    warn!(
                        "{} rate-limited (attempt {attempt}): {e}",
                        self.provider.provider_id()
                    );
                    let delay = self.retry.jittered_backoff_for(attempt);
                    info!("rate limited, sleeping {:.2}s", delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return self.fallback_for(&e),
            }
        }
    }

    /// Reply text for a failure that will not be retried.
    fn fallback_for(&self, err: &ProviderError) -> String {
        let provider = self.provider.provider_id();
        let text = match err {
            ProviderError::RateLimited(_) => {
                error!(
                    "{provider} still rate-limited after {} attempts: {err}",
                    self.retry.max_attempts
                );
                RATE_LIMIT_FALLBACK
            }
            ProviderError::QuotaExhausted(_) => {
                error!("{provider} insufficient quota: {err}");
                QUOTA_FALLBACK
            }
            ProviderError::Authentication(_) => {
                error!("{provider} auth failed: {err}");
                AUTH_FALLBACK
            }
            ProviderError::Other(_) => {
                warn!("{provider} completion failed: {err}");
                ERROR_FALLBACK
            }
        };
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::LlmResponse;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<LlmResponse, ProviderError>>>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<LlmResponse, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn provider_id(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Other("script exhausted".into())))
        }
    }

    fn text(reply: &str) -> Result<LlmResponse, ProviderError> {
        Ok(LlmResponse {
            text: Some(reply.to_string()),
            model: "test".into(),
            usage: None,
            stop_reason: Some("stop".into()),
        })
    }

    fn instant_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn conversation(provider: Arc<ScriptedProvider>, max: usize) -> Conversation {
        Conversation::new(provider, "gpt-test", max).with_retry_policy(instant_retry(8))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(750));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(1500));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(3000));
        assert_eq!(policy.backoff_for(6), Duration::from_secs(20));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(20));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.jittered_backoff_for(1);
            assert!(d >= Duration::from_millis(600), "{d:?}");
            assert!(d <= Duration::from_millis(900), "{d:?}");
        }
    }

    #[test]
    fn system_message_is_replaced_not_duplicated() {
        let mut convo = conversation(ScriptedProvider::new(vec![]), 20);
        convo.set_system_message("first");
        convo.set_system_message("second");
        assert_eq!(convo.history(), &[ChatMessage::system("second")]);
    }

    #[test]
    fn trim_keeps_system_turn_first() {
        let mut convo = conversation(ScriptedProvider::new(vec![]), 3);
        convo.set_system_message("sys");
        for i in 0..6 {
            convo.history.push(ChatMessage::user(format!("m{i}")));
        }
        convo.trim_history();

        let contents: Vec<&str> = convo.history().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["sys", "m3", "m4", "m5"]);
        assert_eq!(convo.history()[0].role, ChatRole::System);
    }

    #[test]
    fn trim_without_system_turn() {
        let mut convo = conversation(ScriptedProvider::new(vec![]), 2);
        for i in 0..4 {
            convo.history.push(ChatMessage::user(format!("m{i}")));
        }
        convo.trim_history();
        let contents: Vec<&str> = convo.history().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3"]);
    }

    #[tokio::test]
    async fn reply_is_trimmed_and_recorded() {
        let provider = ScriptedProvider::new(vec![text("  hello there \n")]);
        let mut convo = conversation(provider.clone(), 20);
        convo.set_system_message("sys");

        assert_eq!(convo.chat("hi").await, "hello there");
        assert_eq!(
            convo.history(),
            &[
                ChatMessage::system("sys"),
                ChatMessage::user("hi"),
                ChatMessage::assistant("hello there"),
            ]
        );

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].model, "gpt-test");
        assert_eq!(requests[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn empty_reply_becomes_ellipsis() {
        let provider = ScriptedProvider::new(vec![text("   ")]);
        let mut convo = conversation(provider, 20);
        assert_eq!(convo.chat("hi").await, EMPTY_REPLY);
    }

    #[tokio::test]
    async fn rate_limit_is_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::RateLimited("429".into())),
            Err(ProviderError::RateLimited("429".into())),
            text("finally"),
        ]);
        let mut convo = conversation(provider.clone(), 20);
        assert_eq!(convo.chat("hi").await, "finally");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn rate_limit_gives_up_after_max_attempts() {
        let replies = (0..10)
            .map(|_| Err(ProviderError::RateLimited("429".into())))
            .collect();
        let provider = ScriptedProvider::new(replies);
        let mut convo = Conversation::new(provider.clone(), "gpt-test", 20)
            .with_retry_policy(instant_retry(3));

        assert_eq!(convo.chat("hi").await, RATE_LIMIT_FALLBACK);
        assert_eq!(provider.calls(), 3);
        // The user turn stays, no assistant turn is recorded.
        assert_eq!(convo.history().last(), Some(&ChatMessage::user("hi")));
    }

    #[tokio::test]
    async fn terminal_errors_map_to_fallbacks_without_retry() {
        let cases = [
            (ProviderError::QuotaExhausted("q".into()), QUOTA_FALLBACK),
            (ProviderError::Authentication("a".into()), AUTH_FALLBACK),
            (ProviderError::Other("o".into()), ERROR_FALLBACK),
        ];
        for (err, expected) in cases {
            let provider = ScriptedProvider::new(vec![Err(err)]);
            let mut convo = conversation(provider.clone(), 20);
            assert_eq!(convo.chat("hi").await, expected);
            assert_eq!(provider.calls(), 1);
        }
    }

    #[test]
    fn fallback_texts() {
        assert_eq!(QUOTA_FALLBACK, "OpenAI quota/billing issue — check API billing.");
        assert_eq!(RATE_LIMIT_FALLBACK, "I'm rate-limited — try again in a minute.");
        assert_eq!(AUTH_FALLBACK, "OpenAI auth failed. Check OPENAI_API_KEY.");
        assert_eq!(ERROR_FALLBACK, "Something went wrong calling OpenAI.");
    }

    #[tokio::test]
    async fn history_is_bounded_across_turns() {
        let replies = (0..5).map(|i| text(&format!("r{i}"))).collect();
        let provider = ScriptedProvider::new(replies);
        let mut convo = conversation(provider, 4);
        convo.set_system_message("sys");

        for i in 0..5 {
            convo.chat(&format!("q{i}")).await;
        }

        let contents: Vec<&str> = convo.history().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["sys", "q3", "r3", "q4", "r4"]);
    }
}
