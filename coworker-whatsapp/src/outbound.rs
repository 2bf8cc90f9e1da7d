//! Outbound channel adapter: resolves a phone-or-JID target against the
//! policy store and hands the send off to the Bridge.

use std::sync::Arc;

use thiserror::Error;

use crate::bridge::{Bridge, BridgeError};
use crate::ids::{normalize_id, to_jid};
use crate::socket::SendOptions;
use crate::store::PolicyStore;
use crate::supervisor::WhatsAppState;

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("not in allowlist")]
    NotInAllowlist,
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

#[derive(Debug, Clone)]
pub struct SendResult {
    pub ok: bool,
    pub message_id: Option<String>,
}

/// The outbound half of the bridge, exposed to the application's message
/// router. A `None` Bridge (connection down) is a caller error, not an
/// adapter concern — the router should check `status()` first.
pub struct OutboundChannel {
    bridge: Arc<Bridge>,
    store: Arc<dyn PolicyStore>,
    status: Box<dyn Fn() -> WhatsAppState + Send + Sync>,
}

impl OutboundChannel {
    pub fn new(
        bridge: Arc<Bridge>,
        store: Arc<dyn PolicyStore>,
        status: impl Fn() -> WhatsAppState + Send + Sync + 'static,
    ) -> Self {
        Self {
            bridge,
            store,
            status: Box::new(status),
        }
    }

    /// Resolve `to` and send `text` (plus optional media), per §4.7:
    /// 1. If `to` already carries a JID suffix (`@`), pass through.
    /// 2. Else normalize to `+<digits>` and look the peer up in the
    ///    allowlist; fail closed if absent; prefer the stored raw id.
    /// 3. Hand off to the Bridge.
    pub async fn send(
        &self,
        to: &str,
        text: &str,
        opts: SendOptions,
    ) -> Result<SendResult, OutboundError> {
        let target = self.resolve(to).await?;
        let message_id = self.bridge.send_outbound(&target, text, opts).await?;
        Ok(SendResult { ok: true, message_id })
    }

    async fn resolve(&self, to: &str) -> Result<String, OutboundError> {
        if to.contains('@') {
            return Ok(to.to_string());
        }

        let phone = normalize_id(to);
        let entry = self
            .store
            .get_allowlist_entry(&phone)
            .await
            .ok_or(OutboundError::NotInAllowlist)?;

        Ok(entry.raw_id.unwrap_or_else(|| to_jid(&phone)))
    }

    pub fn status(&self) -> WhatsAppState {
        (self.status)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentRuntime, ThreadMeta};
    use crate::socket::{GroupMetadata, OutboundMedia, PresenceType, Result as SocketResult, SelfId, SocketError, WhatsAppSocket};
    use crate::store::{AllowlistUpsert, JsonPolicyStore};
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct FakeSocket;

    #[async_trait]
    impl WhatsAppSocket for FakeSocket {
        async fn send_message(&self, _to: &str, _text: &str) -> SocketResult<String> {
            Ok("wire-1".to_string())
        }
        async fn send_media(&self, _to: &str, _media: &OutboundMedia) -> SocketResult<String> {
            Ok("wire-media".to_string())
        }
        async fn send_presence_update(&self, _presence: PresenceType, _to: &str) -> SocketResult<()> {
            Ok(())
        }
        async fn group_metadata(&self, _group_id: &str) -> SocketResult<GroupMetadata> {
            Err(SocketError::ConnectionFailed("n/a".to_string()))
        }
        fn me(&self) -> SelfId {
            SelfId { id: "bot".to_string(), alt: None }
        }
    }

    struct EchoAgent;

    #[async_trait]
    impl AgentRuntime for EchoAgent {
        async fn generate(
            &self,
            _thread: ThreadMeta,
            _content: String,
            _cancel: CancellationToken,
        ) -> crate::agent::Result<String> {
            Ok(String::new())
        }
    }

    fn channel(store: Arc<dyn PolicyStore>) -> OutboundChannel {
        let bridge = Bridge::new(
            Arc::new(FakeSocket),
            Arc::new(EchoAgent),
            Arc::clone(&store),
            crate::bridge::BridgeConfig {
                debounce_window: std::time::Duration::from_secs(2),
                agent_timeout: std::time::Duration::from_secs(300),
                max_text_chunk: 3800,
                pairing_ttl_ms: 3_600_000,
                sent_tracker_ttl: std::time::Duration::from_secs(600),
                group_meta_ttl: std::time::Duration::from_secs(300),
            },
        );
        OutboundChannel::new(bridge, store, || WhatsAppState::Connected)
    }

    #[tokio::test]
    async fn test_send_passes_through_jid() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn PolicyStore> =
            Arc::new(JsonPolicyStore::load(dir.path().join("store.json")).unwrap());
        let channel = channel(store);

        let result = channel
            .send("123@g.us", "hello", SendOptions::default())
            .await
            .unwrap();
        assert!(result.ok);
    }

    #[tokio::test]
    async fn test_send_rejects_phone_not_in_allowlist() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn PolicyStore> =
            Arc::new(JsonPolicyStore::load(dir.path().join("store.json")).unwrap());
        let channel = channel(store);

        let err = channel
            .send("+1234567890", "hello", SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OutboundError::NotInAllowlist));
    }

    #[tokio::test]
    async fn test_send_uses_stored_raw_id_when_allowlisted() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn PolicyStore> =
            Arc::new(JsonPolicyStore::load(dir.path().join("store.json")).unwrap());
        store
            .add_to_allowlist(
                "+1234567890",
                AllowlistUpsert {
                    raw_id: Some("1234567890@s.whatsapp.net".to_string()),
                    label: None,
                },
            )
            .await
            .unwrap();
        let channel = channel(store);

        let result = channel
            .send("+1234567890", "hello", SendOptions::default())
            .await
            .unwrap();
        assert!(result.ok);
    }
}
