use async_trait::async_trait;
use serenity::{http::Http, model::id::ChannelId};
use std::sync::Arc;

use crate::audio::voice::{Notifier, NotifyError};

/// Publica los avisos de la sesión en el canal donde se usó `/play`.
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
impl Notifier for ChannelNotifier {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        self.channel_id
            .say(&self.http, message)
            .await
            .map(|_| ())
            .map_err(|e| NotifyError(e.to_string()))
    }
}
