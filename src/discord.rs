//! Discord gateway adapter.
//!
//! serenity owns the connection, reconnects and sharding; each gateway event
//! runs on its own task, so a slow completion in one channel never delays
//! another.

use crate::relay::{InboundMessage, Outcome, RelayHandler, ReplySink, SendError};
use async_trait::async_trait;
use serenity::all::{
    ChannelId, Client, Context, EventHandler, GatewayIntents, GuildId, Http, Message, Ready,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Gateway intents the relay needs.
pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS
}

impl From<&Message> for InboundMessage {
    fn from(msg: &Message) -> Self {
        Self {
            channel_id: msg.channel_id.get(),
            author_id: msg.author.id.get(),
            author_name: msg.author.name.clone(),
            content: msg.content.clone(),
            mentions: msg.mentions.iter().map(|u| u.id.get()).collect(),
        }
    }
}

/// Sends replies through the REST API.
pub struct DiscordSink {
    http: Arc<Http>,
}

#[async_trait]
impl ReplySink for DiscordSink {
    async fn send(&self, channel_id: u64, text: &str) -> Result<(), SendError> {
        ChannelId::new(channel_id)
            .say(&self.http, text)
            .await
            .map(|_| ())
            .map_err(|e| SendError(e.to_string()))
    }
}

struct Handler {
    relay: Arc<RelayHandler>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: Message) {
        let bot_id = ctx.cache.current_user().id.get();
        let inbound = InboundMessage::from(&msg);
        let sink = DiscordSink {
            http: Arc::clone(&ctx.http),
        };

        match self.relay.handle(bot_id, &inbound, &sink).await {
            Ok(Outcome::Ignored(reason)) => {
                debug!(channel_id = inbound.channel_id, ?reason, "Ignored message");
            }
            Ok(Outcome::Replied { persisted: false, .. }) => {
                warn!(channel_id = inbound.channel_id, "Replied without saving history");
            }
            Ok(Outcome::Replied { .. }) => {}
            Err(e) => {
                error!(channel_id = inbound.channel_id, error = %e, "Relay failed");
            }
        }
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            user = %ready.user.name,
            id = ready.user.id.get(),
            guilds = ready.guilds.len(),
            "Connected to Discord"
        );
    }

    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        for guild_id in guilds {
            let Some(guild) = ctx.cache.guild(guild_id) else {
                continue;
            };
            info!(guild = %guild.name, id = guild_id.get(), "Connected to guild");
            let members: Vec<&str> = guild
                .members
                .values()
                .map(|m| m.user.name.as_str())
                .collect();
            debug!(guild = %guild.name, members = ?members, "Guild members");
        }
    }
}

/// Connect to the gateway and relay until the connection ends or Ctrl-C.
pub async fn run(token: &str, relay: Arc<RelayHandler>) -> crate::error::Result<()> {
    let mut client = Client::builder(token, intents())
        .event_handler(Handler { relay })
        .await?;

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            shard_manager.shutdown_all().await;
        }
    });

    client.start().await?;
    Ok(())
}
