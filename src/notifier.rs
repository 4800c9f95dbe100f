//! Outbound message channel.
//!
//! The chat transport itself lives outside this crate; the core only speaks
//! through the [`Notifier`] trait. A transport adapter implements it against
//! a real messaging API, [`LogNotifier`] degrades every delivery to a log
//! line so the core can run without one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identity of a chat: a user's private conversation, the review channel or
/// the operator's own chat.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a delivered message, kept for in-place edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel: ChannelId,
    pub message_id: i64,
}

/// Kind of proof media attached to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

/// Transport-side handle to an uploaded media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub file_id: String,
}

/// One tappable control on an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    /// Round-trips back as [`crate::session::Action`] callback data.
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Rows of controls attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Controls {
    pub rows: Vec<Vec<Button>>,
}

impl Controls {
    pub fn new(rows: Vec<Vec<Button>>) -> Self {
        Self { rows }
    }

    /// A single back-to-menu row.
    pub fn back() -> Self {
        Self::new(vec![vec![Button::new("🔙 Back", "back")]])
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Abstract delivery channel. Every method is fallible with
/// [`Error::Delivery`]; callers log and, on the review path, escalate, but
/// never roll back data mutations over a failed delivery.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Deliver a plain text message, optionally with controls.
    async fn send_text(
        &self,
        identity: ChannelId,
        text: &str,
        controls: Option<Controls>,
    ) -> Result<MessageRef>;

    /// Deliver a media message with a caption and optional controls.
    async fn send_media(
        &self,
        identity: ChannelId,
        media: &MediaRef,
        caption: &str,
        controls: Option<Controls>,
    ) -> Result<MessageRef>;

    /// Replace the text/caption and controls of a delivered message in
    /// place. Passing `None` controls removes them.
    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        controls: Option<Controls>,
    ) -> Result<()>;

    /// Deliver a file attachment, used for CSV reports and raw exports.
    async fn send_document(
        &self,
        identity: ChannelId,
        filename: &str,
        content: &[u8],
        caption: &str,
    ) -> Result<MessageRef>;
}

/// Notifier that logs outbound traffic instead of delivering it. Used when
/// no transport adapter is wired in.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_text(
        &self,
        identity: ChannelId,
        text: &str,
        _controls: Option<Controls>,
    ) -> Result<MessageRef> {
        tracing::info!(%identity, text, "outbound text");
        Ok(MessageRef {
            channel: identity,
            message_id: 0,
        })
    }

    async fn send_media(
        &self,
        identity: ChannelId,
        media: &MediaRef,
        caption: &str,
        _controls: Option<Controls>,
    ) -> Result<MessageRef> {
        tracing::info!(%identity, kind = ?media.kind, caption, "outbound media");
        Ok(MessageRef {
            channel: identity,
            message_id: 0,
        })
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        _controls: Option<Controls>,
    ) -> Result<()> {
        tracing::info!(channel = %message.channel, message_id = message.message_id, text, "edit message");
        Ok(())
    }

    async fn send_document(
        &self,
        identity: ChannelId,
        filename: &str,
        content: &[u8],
        caption: &str,
    ) -> Result<MessageRef> {
        tracing::info!(%identity, filename, size = content.len(), caption, "outbound document");
        Ok(MessageRef {
            channel: identity,
            message_id: 0,
        })
    }
}

/// Convenience for call sites that only log delivery failures.
pub fn log_delivery_error(result: Result<MessageRef>, context: &str) {
    if let Err(err) = result {
        tracing::warn!(error = %err, context, "notification not delivered");
    }
}
