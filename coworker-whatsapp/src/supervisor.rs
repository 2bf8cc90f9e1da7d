//! Connection supervisor: owns the socket lifecycle, reconnects with
//! backoff, and attaches/detaches the Bridge as the connection opens and
//! closes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::agent::AgentRuntime;
use crate::bridge::{Bridge, BridgeConfig};
use crate::message::InboundMessage;
use crate::socket::WhatsAppSocket;
use crate::store::PolicyStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhatsAppState {
    Disconnected,
    Connecting,
    QrReady,
    Connected,
    LoggedOut,
}

/// Why the socket closed, as reported by the connection event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    /// The chat-network's own restart code (reconnects on a fixed 1s delay).
    RestartRequired,
    Other(String),
}

/// A connection lifecycle event delivered by the socket.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connecting,
    QrReady(String),
    Open { bot_id: String },
    Close { reason: DisconnectReason },
}

/// Produces a fresh socket bound to persisted credentials under `auth_dir`,
/// plus the two event streams it emits. Creating and wiring the concrete
/// chat-network client is outside this crate's scope; this trait is the
/// seam an embedder implements.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    async fn connect(
        &self,
        auth_dir: &Path,
    ) -> std::io::Result<(
        Arc<dyn WhatsAppSocket>,
        mpsc::Receiver<ConnectionEvent>,
        mpsc::Receiver<Vec<InboundMessage>>,
    )>;

    /// Atomically wipe persisted credentials (primary + `.bak`) so the next
    /// `connect()` starts a fresh pairing.
    async fn wipe_credentials(&self, auth_dir: &Path) -> std::io::Result<()>;
}

/// Registers/unregisters the outbound adapter with the application's
/// message router as the Bridge attaches and detaches.
pub trait ChannelRegistry: Send + Sync {
    fn register(&self, bridge: Arc<Bridge>);
    fn unregister(&self);
}

struct NoopRegistry;
impl ChannelRegistry for NoopRegistry {
    fn register(&self, _bridge: Arc<Bridge>) {}
    fn unregister(&self) {}
}

pub struct Supervisor {
    auth_dir: PathBuf,
    factory: Arc<dyn SocketFactory>,
    agent: Arc<dyn AgentRuntime>,
    store: Arc<dyn PolicyStore>,
    registry: Arc<dyn ChannelRegistry>,
    bridge_config: BridgeConfig,
    max_attempts: u32,

    state: RwLock<WhatsAppState>,
    bridge: RwLock<Option<Arc<Bridge>>>,
    reconnect_attempts: AtomicU32,
    connect_lock: Mutex<()>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(
        auth_dir: PathBuf,
        factory: Arc<dyn SocketFactory>,
        agent: Arc<dyn AgentRuntime>,
        store: Arc<dyn PolicyStore>,
        bridge_config: BridgeConfig,
        max_attempts: u32,
    ) -> Arc<Self> {
        Self::with_registry(
            auth_dir,
            factory,
            agent,
            store,
            bridge_config,
            max_attempts,
            Arc::new(NoopRegistry),
        )
    }

    pub fn with_registry(
        auth_dir: PathBuf,
        factory: Arc<dyn SocketFactory>,
        agent: Arc<dyn AgentRuntime>,
        store: Arc<dyn PolicyStore>,
        bridge_config: BridgeConfig,
        max_attempts: u32,
        registry: Arc<dyn ChannelRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            auth_dir,
            factory,
            agent,
            store,
            registry,
            bridge_config,
            max_attempts,
            state: RwLock::new(WhatsAppState::Disconnected),
            bridge: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            connect_lock: Mutex::new(()),
            event_task: Mutex::new(None),
            reconnect_task: Mutex::new(None),
        })
    }

    pub async fn state(&self) -> WhatsAppState {
        *self.state.read().await
    }

    /// Coalesced: at most one concurrent connect attempt. Tears down any
    /// existing Bridge and socket before creating a new one.
    pub async fn connect(self: &Arc<Self>) {
        let _guard = self.connect_lock.lock().await;

        self.teardown().await;
        *self.state.write().await = WhatsAppState::Connecting;

        let (socket, mut conn_events, messages) = match self.factory.connect(&self.auth_dir).await {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "failed to create socket");
                self.schedule_reconnect(None).await;
                return;
            }
        };

        let this = Arc::clone(self);
        let mut messages = Some(messages);
        let handle = tokio::spawn(async move {
            while let Some(event) = conn_events.recv().await {
                this.handle_connection_event(event, &socket, &mut messages).await;
            }
        });
        *self.event_task.lock().await = Some(handle);
    }

    async fn handle_connection_event(
        self: &Arc<Self>,
        event: ConnectionEvent,
        socket: &Arc<dyn WhatsAppSocket>,
        messages: &mut Option<mpsc::Receiver<Vec<InboundMessage>>>,
    ) {
        match event {
            ConnectionEvent::Connecting => {
                *self.state.write().await = WhatsAppState::Connecting;
            }
            ConnectionEvent::QrReady(_) => {
                *self.state.write().await = WhatsAppState::QrReady;
            }
            ConnectionEvent::Open { bot_id } => {
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                *self.state.write().await = WhatsAppState::Connected;

                let _ = self.store.set_config("enabled", "true").await;
                let _ = self.store.set_config("auto_connect", "true").await;
                let _ = self.store.set_config("bot_lid", &bot_id).await;

                let bridge = Bridge::new(
                    Arc::clone(socket),
                    Arc::clone(&self.agent),
                    Arc::clone(&self.store),
                    self.bridge_config.clone(),
                );
                if let Some(messages) = messages.take() {
                    bridge.attach(messages);
                }
                *self.bridge.write().await = Some(Arc::clone(&bridge));
                self.registry.register(bridge);
                info!("whatsapp connection open");
            }
            ConnectionEvent::Close { reason } => {
                self.detach_bridge().await;
                *self.state.write().await = WhatsAppState::Disconnected;

                match reason {
                    DisconnectReason::LoggedOut => {
                        *self.state.write().await = WhatsAppState::LoggedOut;
                        let _ = self.factory.wipe_credentials(&self.auth_dir).await;
                        let this = Arc::clone(self);
                        tokio::spawn(async move {
                            this.connect().await;
                        });
                    }
                    DisconnectReason::RestartRequired => {
                        self.schedule_reconnect(Some(Duration::from_secs(1))).await;
                    }
                    DisconnectReason::Other(why) => {
                        warn!(reason = %why, "whatsapp connection closed");
                        self.schedule_reconnect(None).await;
                    }
                }
            }
        }
    }

    async fn detach_bridge(&self) {
        if let Some(bridge) = self.bridge.write().await.take() {
            bridge.detach();
        }
        self.registry.unregister();
    }

    async fn teardown(&self) {
        if let Some(handle) = self.event_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.reconnect_task.lock().await.take() {
            handle.abort();
        }
        self.detach_bridge().await;
    }

    async fn schedule_reconnect(self: &Arc<Self>, fixed_delay: Option<Duration>) {
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.max_attempts {
            warn!(attempt, "giving up after exceeding reconnect attempts");
            return;
        }

        let delay = fixed_delay.unwrap_or_else(|| reconnect_delay(attempt));
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.connect().await;
        });
        *self.reconnect_task.lock().await = Some(handle);
    }

    /// Stop, cancel any pending reconnect, detach the Bridge, close the
    /// socket.
    pub async fn disconnect(self: &Arc<Self>) {
        let _guard = self.connect_lock.lock().await;
        self.teardown().await;
        *self.state.write().await = WhatsAppState::Disconnected;
    }

    /// `disconnect()`, additionally wiping persisted credentials.
    pub async fn logout(self: &Arc<Self>) {
        self.disconnect().await;
        let _ = self.factory.wipe_credentials(&self.auth_dir).await;
        *self.state.write().await = WhatsAppState::LoggedOut;
    }
}

/// `delay = min(30s, 1.5s * 1.6^(attempt-1)) ± 25% jitter`, floored at
/// 250ms.
fn reconnect_delay(attempt: u32) -> Duration {
    let base_ms = 1500f64 * 1.6f64.powi(attempt as i32 - 1);
    let capped_ms = base_ms.min(30_000.0);
    let jitter_frac = rand::thread_rng().gen_range(-0.25..=0.25);
    let jittered_ms = capped_ms * (1.0 + jitter_frac);
    let floored_ms = jittered_ms.max(250.0);
    Duration::from_millis(floored_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_floors_at_250ms() {
        let delay = reconnect_delay(1);
        assert!(delay.as_millis() >= 250);
    }

    #[test]
    fn test_reconnect_delay_caps_at_30s() {
        let delay = reconnect_delay(20);
        assert!(delay.as_millis() <= 30_000 + 30_000 / 4);
    }

    #[test]
    fn test_reconnect_delay_grows_with_attempt() {
        let early = reconnect_delay(1).as_millis();
        let later = reconnect_delay(5).as_millis();
        assert!(later > early);
    }
}
