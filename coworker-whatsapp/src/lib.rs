//! WhatsApp conversation bridge.
//!
//! A debounced, abortable, per-conversation pipeline sitting between a
//! chat-network socket and a generative agent runtime: coalesced inbound
//! text, policy-gated allowlisting and group modes, and a connection
//! supervisor that reconnects with backoff.

pub mod agent;
pub mod bridge;
pub mod echo;
pub mod envelope;
pub mod group_cache;
pub mod ids;
pub mod message;
pub mod outbound;
pub mod socket;
pub mod store;
pub mod supervisor;
pub mod text;

pub use agent::{AgentError, AgentRuntime, ThreadMeta};
pub use bridge::{approve_pairing, Bridge, BridgeConfig, BridgeError};
pub use outbound::{OutboundChannel, OutboundError, SendResult};
pub use socket::{OutboundMedia, PresenceType, SendOptions, SocketError, WhatsAppSocket};
pub use store::{GroupConfig, GroupMode, JsonPolicyStore, PolicyStore, StoreError};
pub use supervisor::{ChannelRegistry, ConnectionEvent, DisconnectReason, SocketFactory, Supervisor, WhatsAppState};
