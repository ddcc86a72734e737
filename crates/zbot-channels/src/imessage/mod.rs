pub mod chatdb;
pub mod contacts;
pub mod decoder;
pub mod policy;
pub mod sender;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use zbot_common::{Destination, Result};
use zbot_config::BotConfig;

use crate::traits::{MessageSource, ReplySender};
use policy::{Decision, ResponsePolicy};

/// Callback invoked with the prompt of an accepted trigger message.
///
/// Always yields reply text; completion failures are turned into fallback
/// replies before they get here.
pub type OnTriggerFn =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = String> + Send>> + Send + Sync>;

/// What a single poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The chat has no messages.
    NoMessages,
    /// The newest message was already handled.
    AlreadySeen(i64),
    Declined { id: i64, decision: Decision },
    Replied { id: i64, delivered: bool },
}

/// Watches one chat and answers trigger messages in it.
pub struct IMessageBot {
    chat_id: i64,
    destination: Destination,
    source: Box<dyn MessageSource>,
    sender: Arc<dyn ReplySender>,
    on_trigger: OnTriggerFn,
    policy: ResponsePolicy,
    poll_interval: Duration,
    fetch_limit: usize,
    last_seen_id: Option<i64>,
    last_logged_id: Option<i64>,
}

impl IMessageBot {
    pub fn new(
        chat_id: i64,
        destination: Destination,
        config: &BotConfig,
        source: Box<dyn MessageSource>,
        sender: Arc<dyn ReplySender>,
        on_trigger: OnTriggerFn,
    ) -> Self {
        Self {
            chat_id,
            destination,
            source,
            sender,
            on_trigger,
            policy: ResponsePolicy::from_config(config),
            poll_interval: config.poll_interval(),
            fetch_limit: config.fetch_limit,
            last_seen_id: None,
            last_logged_id: None,
        }
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn last_seen_id(&self) -> Option<i64> {
        self.last_seen_id
    }

    /// Skip everything already in the chat so only new messages are answered.
    pub fn initialize(&mut self) -> Result<()> {
        self.last_seen_id = self.source.latest_message_id(self.chat_id)?;
        info!(
            "watching chat {} ({}), starting after message id {:?}",
            self.chat_id, self.destination, self.last_seen_id
        );
        Ok(())
    }

    /// Look at the newest message once and reply to it if it qualifies.
    pub async fn poll_once(&mut self) -> Result<CycleOutcome> {
        let records = self.source.fetch_messages(self.chat_id, self.fetch_limit)?;
        let Some(newest) = records.into_iter().next() else {
            return Ok(CycleOutcome::NoMessages);
        };

        let text = decoder::extract_text(&newest);
        if self.last_logged_id != Some(newest.id) {
            debug!(
                "newest message id={} from_me={} text={:?}",
                newest.id, newest.is_from_me, text
            );
            self.last_logged_id = Some(newest.id);
        }

        if self.last_seen_id.is_some_and(|seen| newest.id <= seen) {
            return Ok(CycleOutcome::AlreadySeen(newest.id));
        }
        self.last_seen_id = Some(newest.id);

        let decision = self.policy.evaluate(&text, Instant::now());
        if !decision.is_respond() {
            debug!("message {} declined: {decision:?}", newest.id);
            return Ok(CycleOutcome::Declined {
                id: newest.id,
                decision,
            });
        }

        let prompt = self.policy.extract_prompt(&text);
        info!("trigger in message {} ({} chars)", newest.id, prompt.len());
        let reply = (self.on_trigger)(prompt).await;
        self.policy.record_reply(Instant::now());

        let outgoing = format!("{}{reply}", self.policy.reply_prefix());
        let delivered = match self.sender.send_text(&self.destination, &outgoing).await {
            Ok(()) => {
                info!("replied to message {} via {}", newest.id, self.sender.channel_type());
                true
            }
            Err(e) => {
                error!("failed to send reply to {}: {e}", self.destination);
                false
            }
        };

        Ok(CycleOutcome::Replied {
            id: newest.id,
            delivered,
        })
    }

    /// Poll until `shutdown_rx` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        self.initialize()?;
        info!(
            "poll loop started (interval = {}s, trigger = {:?})",
            self.poll_interval.as_secs(),
            self.policy.trigger_prefix()
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if let Err(e) = self.poll_once().await {
                warn!("poll cycle failed: {e}");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("poll loop stopped");
        Ok(())
    }
}
