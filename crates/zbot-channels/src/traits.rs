use async_trait::async_trait;
use zbot_common::{Destination, Result};

use crate::imessage::chatdb::MessageRecord;

/// Read side of a chat: the two queries the poll loop needs.
pub trait MessageSource: Send {
    /// Identifier of the newest message in the chat, if any.
    fn latest_message_id(&self, chat_id: i64) -> Result<Option<i64>>;

    /// Up to `limit` most recent messages, newest first.
    fn fetch_messages(&self, chat_id: i64, limit: usize) -> Result<Vec<MessageRecord>>;
}

/// Send-only interface for delivering replies.
#[async_trait]
pub trait ReplySender: Send + Sync {
    /// Unique identifier for this channel type.
    fn channel_type(&self) -> &str;

    /// Deliver `text` to `to`.
    async fn send_text(&self, to: &Destination, text: &str) -> Result<()>;
}
