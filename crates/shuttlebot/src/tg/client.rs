use crate::forward::MessageRef;
use crate::tg::Bot;
use crate::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId};

/// Video file to upload together with its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VideoPayload {
    pub(crate) path: PathBuf,
    pub(crate) width: u32,
    pub(crate) height: u32,

    /// Duration in seconds, if known
    pub(crate) duration: Option<u32>,
}

/// Outgoing side of the chat transport. The forwarding and fetching logic
/// talks to Telegram only through this trait.
#[async_trait]
pub(crate) trait ChatClient: Send + Sync {
    /// Forwards an existing message to the `to` chat preserving its attribution
    async fn forward_to(&self, to: ChatId, message: MessageRef) -> Result<MessageId>;

    async fn post_video(&self, to: ChatId, video: VideoPayload) -> Result<MessageId>;

    async fn post_text(&self, to: ChatId, text: String) -> Result<MessageId>;
}

#[async_trait]
impl ChatClient for Bot {
    async fn forward_to(&self, to: ChatId, message: MessageRef) -> Result<MessageId> {
        let sent = self
            .forward_message(to, message.chat, message.id)
            .await?;
        Ok(sent.id)
    }

    async fn post_video(&self, to: ChatId, video: VideoPayload) -> Result<MessageId> {
        let mut request = self
            .send_video(to, InputFile::file(video.path))
            .width(video.width)
            .height(video.height)
            .supports_streaming(true);

        if let Some(duration) = video.duration {
            request = request.duration(duration);
        }

        Ok(request.await?.id)
    }

    async fn post_text(&self, to: ChatId, text: String) -> Result<MessageId> {
        Ok(self.send_message(to, text).await?.id)
    }
}
