use std::time::{Duration, Instant};

use zbot_config::BotConfig;

/// Outcome of evaluating one new message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Respond,
    /// No text could be recovered.
    Empty,
    /// One of the bot's own earlier replies.
    OwnReply,
    NoTrigger,
    /// A reply went out less than the cooldown ago.
    CoolingDown,
}

impl Decision {
    pub fn is_respond(self) -> bool {
        self == Self::Respond
    }
}

/// Decides whether a message gets a reply and tracks the reply cooldown.
///
/// Messages written by the operator are treated like anyone else's, so the
/// bot can be triggered from the operator's own devices. Only the reply
/// prefix tells the bot's own output apart.
#[derive(Debug, Clone)]
pub struct ResponsePolicy {
    trigger_prefix: String,
    trigger_lower: String,
    reply_prefix: String,
    cooldown: Duration,
    last_reply_at: Option<Instant>,
}

impl ResponsePolicy {
    pub fn new(
        trigger_prefix: impl Into<String>,
        reply_prefix: impl Into<String>,
        cooldown: Duration,
    ) -> Self {
        let trigger_prefix = trigger_prefix.into();
        Self {
            trigger_lower: trigger_prefix.to_lowercase(),
            trigger_prefix,
            reply_prefix: reply_prefix.into(),
            cooldown,
            last_reply_at: None,
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(
            config.trigger_prefix.clone(),
            config.reply_prefix.clone(),
            config.cooldown(),
        )
    }

    pub fn trigger_prefix(&self) -> &str {
        &self.trigger_prefix
    }

    pub fn reply_prefix(&self) -> &str {
        &self.reply_prefix
    }

    pub fn last_reply_at(&self) -> Option<Instant> {
        self.last_reply_at
    }

    pub fn evaluate(&self, text: &str, now: Instant) -> Decision {
        if text.is_empty() {
            return Decision::Empty;
        }
        if !self.reply_prefix.is_empty() && text.starts_with(&self.reply_prefix) {
            return Decision::OwnReply;
        }
        if !text.to_lowercase().starts_with(&self.trigger_lower) {
            return Decision::NoTrigger;
        }
        let cooling_down = self
            .last_reply_at
            .is_some_and(|last| now.saturating_duration_since(last) < self.cooldown);
        if cooling_down {
            return Decision::CoolingDown;
        }
        Decision::Respond
    }

    /// `is_own_message` is accepted for callers that have it but does not
    /// change the outcome.
    pub fn should_respond(&self, text: &str, _is_own_message: bool, now: Instant) -> bool {
        self.evaluate(text, now).is_respond()
    }

    /// Text after the trigger prefix, trimmed.
    ///
    /// Strips exactly as many characters as the prefix has, whatever their case.
    pub fn extract_prompt(&self, text: &str) -> String {
        let skip = self.trigger_prefix.chars().count();
        text.chars()
            .skip(skip)
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// Start the cooldown window.
    pub fn record_reply(&mut self, at: Instant) {
        self.last_reply_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ResponsePolicy {
        ResponsePolicy::new("@zbot", "🤖 ", Duration::from_secs(6))
    }

    #[test]
    fn trigger_with_no_prior_reply_responds() {
        let p = policy();
        let now = Instant::now();
        assert_eq!(p.evaluate("@zbot hello", now), Decision::Respond);
        assert_eq!(p.extract_prompt("@zbot hello"), "hello");
    }

    #[test]
    fn trigger_is_case_insensitive() {
        let p = policy();
        let now = Instant::now();
        assert_eq!(p.evaluate("@ZBot what time is it", now), Decision::Respond);
        assert_eq!(p.extract_prompt("@ZBot what time is it"), "what time is it");
    }

    #[test]
    fn within_cooldown_declines() {
        let mut p = policy();
        let start = Instant::now();
        p.record_reply(start);
        assert_eq!(
            p.evaluate("@zbot hello", start + Duration::from_secs(5)),
            Decision::CoolingDown
        );
        assert_eq!(
            p.evaluate("@zbot hello", start + Duration::from_secs(6)),
            Decision::Respond
        );
    }

    #[test]
    fn own_replies_never_respond() {
        let mut p = policy();
        let now = Instant::now();
        assert_eq!(p.evaluate("🤖 some old reply", now), Decision::OwnReply);
        p.record_reply(now);
        assert_eq!(
            p.evaluate("🤖 some old reply", now + Duration::from_secs(600)),
            Decision::OwnReply
        );
    }

    #[test]
    fn reply_prefix_checked_before_trigger() {
        let p = ResponsePolicy::new("@zbot", "@zbot says: ", Duration::ZERO);
        assert_eq!(
            p.evaluate("@zbot says: hi", Instant::now()),
            Decision::OwnReply
        );
    }

    #[test]
    fn empty_text_never_responds() {
        assert_eq!(policy().evaluate("", Instant::now()), Decision::Empty);
    }

    #[test]
    fn untriggered_text_declines() {
        let p = policy();
        assert_eq!(p.evaluate("hello @zbot", Instant::now()), Decision::NoTrigger);
    }

    #[test]
    fn own_message_flag_does_not_matter() {
        let p = policy();
        let now = Instant::now();
        assert!(p.should_respond("@zbot hi", true, now));
        assert!(p.should_respond("@zbot hi", false, now));
        assert!(!p.should_respond("🤖 hi", true, now));
    }

    #[test]
    fn empty_reply_prefix_does_not_swallow_everything() {
        let p = ResponsePolicy::new("@zbot", "", Duration::ZERO);
        assert_eq!(p.evaluate("@zbot hi", Instant::now()), Decision::Respond);
    }

    #[test]
    fn prompt_strips_prefix_length_in_chars() {
        let p = ResponsePolicy::new("ñbot", "", Duration::ZERO);
        assert_eq!(p.extract_prompt("ÑBOT   tell me  "), "tell me");
        assert_eq!(policy().extract_prompt("@zbot"), "");
    }

    #[test]
    fn from_config_uses_configured_prefixes() {
        let config = BotConfig {
            trigger_prefix: "!ask".into(),
            cooldown_secs: 1,
            ..BotConfig::default()
        };
        let p = ResponsePolicy::from_config(&config);
        assert_eq!(p.trigger_prefix(), "!ask");
        assert_eq!(p.reply_prefix(), "🤖 ");
        assert!(p.last_reply_at().is_none());
    }
}
