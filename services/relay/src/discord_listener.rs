use crate::attachment::{AttachmentDescriptor, InboundMessage};
use crate::relay_handler::RelayHandler;
use crate::reply::{ChatReplier, ReplyError};
use async_trait::async_trait;
use serenity::gateway::GatewayError;
use serenity::http::{Http, HttpError};
use serenity::model::channel::Message as DiscordMessage;
use serenity::model::gateway::Ready;
use serenity::model::id::ChannelId;
use serenity::prelude::*;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors that end the chat session
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Discord rejected the bot token")]
    InvalidToken,

    #[error("Discord client error: {0}")]
    Client(#[source] serenity::Error),
}

impl From<serenity::Error> for ListenerError {
    fn from(err: serenity::Error) -> Self {
        if is_authentication_failure(&err) {
            Self::InvalidToken
        } else {
            Self::Client(err)
        }
    }
}

fn is_authentication_failure(err: &serenity::Error) -> bool {
    match err {
        serenity::Error::Gateway(GatewayError::InvalidAuthentication) => true,
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
            response.status_code.as_u16() == 401
        }
        _ => false,
    }
}

/// Posts replies through the Discord REST API
#[derive(Clone)]
pub struct DiscordReplier {
    http: Arc<Http>,
}

impl DiscordReplier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ChatReplier for DiscordReplier {
    async fn send_reply(&self, channel_id: u64, text: &str) -> Result<(), ReplyError> {
        ChannelId::new(channel_id)
            .say(&self.http, text)
            .await
            .map(|_| ())
            .map_err(|e| ReplyError {
                channel_id,
                message: e.to_string(),
            })
    }
}

/// Convert a gateway message into the relay's own representation
fn inbound_message(msg: &DiscordMessage) -> InboundMessage {
    InboundMessage {
        message_id: msg.id.get(),
        author_id: msg.author.id.get(),
        author_name: msg.author.name.clone(),
        channel_id: msg.channel_id.get(),
        attachments: msg
            .attachments
            .iter()
            .map(|a| AttachmentDescriptor {
                url: a.url.clone(),
                filename: a.filename.clone(),
                content_type: a.content_type.clone(),
                size: Some(u64::from(a.size)),
            })
            .collect(),
    }
}

struct Handler {
    relay: Arc<RelayHandler>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: DiscordMessage) {
        if msg.attachments.is_empty() {
            return;
        }

        let inbound = inbound_message(&msg);
        let replier = DiscordReplier::new(ctx.http.clone());

        let outcomes = self.relay.handle(&inbound, &replier).await;
        debug!(
            message_id = inbound.message_id,
            handled = outcomes.len(),
            "Message processed"
        );
    }

    async fn ready(&self, _: Context, ready: Ready) {
        self.relay.set_bot_user_id(ready.user.id.get());
        info!(
            user = %ready.user.name,
            user_id = ready.user.id.get(),
            guilds = ready.guilds.len(),
            "Connected to Discord"
        );
    }
}

/// Gateway session that feeds messages into the relay
pub struct DiscordListener {
    relay: Arc<RelayHandler>,
}

impl DiscordListener {
    pub fn new(relay: Arc<RelayHandler>) -> Self {
        Self { relay }
    }

    /// Log in and process events until the connection ends
    #[instrument(skip(self, token))]
    pub async fn run(self, token: &str) -> Result<(), ListenerError> {
        info!("Starting Discord listener");

        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let mut client = Client::builder(token, intents)
            .event_handler(Handler { relay: self.relay })
            .await?;

        client.start().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_authentication_maps_to_invalid_token() {
        let err = ListenerError::from(serenity::Error::Gateway(
            GatewayError::InvalidAuthentication,
        ));
        assert!(matches!(err, ListenerError::InvalidToken));
    }

    #[test]
    fn test_other_errors_are_client_errors() {
        let err = ListenerError::from(serenity::Error::Gateway(GatewayError::InvalidShardData));
        assert!(matches!(err, ListenerError::Client(_)));
        assert!(err.to_string().starts_with("Discord client error"));
    }
}
