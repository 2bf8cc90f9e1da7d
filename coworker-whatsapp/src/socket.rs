//! The chat-network socket contract consumed by the Bridge and Supervisor.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("logged out")]
    LoggedOut,
}

pub type Result<T> = std::result::Result<T, SocketError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceType {
    Composing,
    Paused,
}

/// Metadata for a group conversation, as reported by the socket.
#[derive(Debug, Clone)]
pub struct GroupMetadata {
    pub subject: String,
}

/// The active account's identifiers, as reported by the socket.
#[derive(Debug, Clone)]
pub struct SelfId {
    pub id: String,
    pub alt: Option<String>,
}

/// Optional media to send ahead of a text message.
#[derive(Debug, Clone)]
pub enum OutboundMedia {
    Image { bytes: Vec<u8>, caption: Option<String>, mime_type: Option<String> },
    Document { bytes: Vec<u8>, mime_type: String, file_name: Option<String> },
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub media: Option<OutboundMedia>,
}

/// The narrow surface of the chat-network client the Bridge and Supervisor
/// depend on. The concrete socket implementation (credential persistence,
/// wire protocol) lives outside this crate's scope.
#[async_trait]
pub trait WhatsAppSocket: Send + Sync {
    /// Send a text message, returning the wire id of the sent message.
    async fn send_message(&self, to: &str, text: &str) -> Result<String>;

    /// Send a media payload ahead of text, returning its wire id.
    async fn send_media(&self, to: &str, media: &OutboundMedia) -> Result<String>;

    /// Fire-and-forget presence update; callers must not await completion
    /// on the critical path.
    async fn send_presence_update(&self, presence: PresenceType, to: &str) -> Result<()>;

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata>;

    fn me(&self) -> SelfId;
}
