use async_trait::async_trait;
use serenity::{http::Http, model::id::ChannelId};
use std::sync::Arc;

use crate::audio::IdleNotifier;

/// Canal de texto donde se avisa la desconexión por inactividad
pub struct ChannelNotifier {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl IdleNotifier for ChannelNotifier {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        self.channel_id.say(&*self.http, message).await?;
        Ok(())
    }
}
