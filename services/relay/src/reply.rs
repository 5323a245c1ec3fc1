use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Failed to send reply to channel {channel_id}: {message}")]
pub struct ReplyError {
    pub channel_id: u64,
    pub message: String,
}

/// Sends text replies back to the channel a message came from
#[async_trait]
pub trait ChatReplier: Send + Sync {
    async fn send_reply(&self, channel_id: u64, text: &str) -> Result<(), ReplyError>;
}
