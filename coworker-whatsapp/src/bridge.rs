//! The conversation bridge: debounced, abortable, per-key message pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{AgentRuntime, ThreadMeta};
use crate::echo::EchoTracker;
use crate::envelope::{
    contains_no_reply, format_message_envelope, get_quoted_text, is_bot_mentioned, strip_directives,
    ConversationKind, EnvelopeMeta,
};
use crate::group_cache::GroupMetaCache;
use crate::ids::{is_group_id, normalize_id};
use crate::message::{unwrap_payload, InboundMessage};
use crate::socket::{PresenceType, SendOptions, WhatsAppSocket};
use crate::store::{AllowlistUpsert, GroupMode, PolicyStore};
use crate::text::{chunk_text, extract_media, extract_text};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("send failed: {0}")]
    Send(#[from] crate::socket::SocketError),
    #[error("not in allowlist")]
    NotInAllowlist,
}

/// Tunables extracted from `WhatsAppConfig`, expressed as typed durations.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub debounce_window: Duration,
    pub agent_timeout: Duration,
    pub max_text_chunk: usize,
    pub pairing_ttl_ms: i64,
    pub sent_tracker_ttl: Duration,
    pub group_meta_ttl: Duration,
}

impl From<&coworker_core::config::WhatsAppConfig> for BridgeConfig {
    fn from(config: &coworker_core::config::WhatsAppConfig) -> Self {
        Self {
            debounce_window: Duration::from_millis(config.debounce_ms),
            agent_timeout: Duration::from_millis(config.agent_timeout_ms),
            max_text_chunk: config.max_text_chunk,
            pairing_ttl_ms: config.pairing_ttl_ms as i64,
            sent_tracker_ttl: Duration::from_millis(config.sent_tracker_ttl_ms),
            group_meta_ttl: Duration::from_millis(config.group_meta_ttl_ms),
        }
    }
}

struct PendingState {
    phone: String,
    reply_to: String,
    texts: Vec<String>,
    meta: EnvelopeMeta,
    mode: GroupMode,
}

/// Owns the per-conversation ephemeral state: buffered texts, debounce
/// timers, in-flight agent calls, the echo tracker and the group metadata
/// cache. Created when the Supervisor reports the socket is open; destroyed
/// (via [`Bridge::detach`]) on disconnect.
pub struct Bridge {
    socket: Arc<dyn WhatsAppSocket>,
    agent: Arc<dyn AgentRuntime>,
    store: Arc<dyn PolicyStore>,
    config: BridgeConfig,
    echo_tracker: EchoTracker,
    group_cache: GroupMetaCache,
    bot_id: String,
    bot_alt: Option<String>,
    pending: Mutex<HashMap<String, PendingState>>,
    debounce_timers: Mutex<HashMap<String, CancellationToken>>,
    processing: Mutex<HashSet<String>>,
    active_abort: Mutex<HashMap<String, CancellationToken>>,
    inbound_task: Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
    pub fn new(
        socket: Arc<dyn WhatsAppSocket>,
        agent: Arc<dyn AgentRuntime>,
        store: Arc<dyn PolicyStore>,
        config: BridgeConfig,
    ) -> Arc<Self> {
        let me = socket.me();
        Arc::new(Self {
            socket,
            agent,
            store,
            echo_tracker: EchoTracker::new(config.sent_tracker_ttl),
            group_cache: GroupMetaCache::new(config.group_meta_ttl),
            bot_id: me.id,
            bot_alt: me.alt,
            config,
            pending: Mutex::new(HashMap::new()),
            debounce_timers: Mutex::new(HashMap::new()),
            processing: Mutex::new(HashSet::new()),
            active_abort: Mutex::new(HashMap::new()),
            inbound_task: Mutex::new(None),
        })
    }

    /// Subscribe to the socket's inbound batches and install the handler:
    /// spawns a task that feeds every batch to [`Bridge::handle_inbound_batch`]
    /// until the channel closes or [`Bridge::detach`] aborts it.
    pub fn attach(self: &Arc<Self>, mut messages: mpsc::Receiver<Vec<InboundMessage>>) {
        let bridge = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(batch) = messages.recv().await {
                bridge.handle_inbound_batch(batch).await;
            }
        });
        *self.inbound_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Unsubscribe, cancel every pending timer, abort every in-flight agent
    /// call, and clear all ephemeral state. Idempotent.
    pub fn detach(&self) {
        if let Some(handle) = self.inbound_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        for (_, token) in self.debounce_timers.lock().unwrap_or_else(|e| e.into_inner()).drain() {
            token.cancel();
        }
        for (_, token) in self.active_abort.lock().unwrap_or_else(|e| e.into_inner()).drain() {
            token.cancel();
        }
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.processing.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Chunk `text`, send each chunk via the socket, record each wire id in
    /// the echo tracker, and return the last wire id.
    pub async fn send_outbound(
        &self,
        to: &str,
        text: &str,
        opts: SendOptions,
    ) -> Result<Option<String>, BridgeError> {
        if let Some(media) = &opts.media {
            let wire_id = self.socket.send_media(to, media).await?;
            self.echo_tracker.record(&wire_id);
        }

        let mut last_id = None;
        for chunk in chunk_text(text, self.config.max_text_chunk) {
            let wire_id = self.socket.send_message(to, &chunk).await?;
            self.echo_tracker.record(&wire_id);
            last_id = Some(wire_id);
        }
        Ok(last_id)
    }

    /// Process one batch of inbound events, per §4.5.2.
    pub async fn handle_inbound_batch(self: &Arc<Self>, messages: Vec<InboundMessage>) {
        self.echo_tracker.prune();
        for msg in messages {
            self.handle_inbound(msg).await;
        }
    }

    async fn handle_inbound(self: &Arc<Self>, msg: InboundMessage) {
        let Some(payload) = msg.payload.clone() else {
            return;
        };

        if msg.from_me {
            self.echo_tracker.consume(&msg.message_id);
            return;
        }

        if msg.remote_id.is_empty() {
            return;
        }

        let unwrapped = unwrap_payload(&payload).clone();
        let text = extract_text(&unwrapped);
        let media = extract_media(&unwrapped);
        if text.trim().is_empty() && media.is_none() {
            return;
        }

        if is_group_id(&msg.remote_id) {
            self.handle_group_message(msg, &unwrapped, text, media).await;
        } else {
            self.handle_dm_message(msg, &unwrapped, text, media).await;
        }
    }

    async fn handle_dm_message(
        self: &Arc<Self>,
        msg: InboundMessage,
        payload: &crate::message::MessagePayload,
        text: String,
        media: Option<crate::text::MediaRef>,
    ) {
        let phone = normalize_id(&msg.remote_id);

        if !self.store.is_allowed(&msg.remote_id, &phone).await {
            if text.trim() == "/pair" {
                self.start_pairing(&msg.remote_id).await;
            }
            return;
        }

        let meta = EnvelopeMeta {
            channel: "whatsapp",
            kind: ConversationKind::Dm,
            sender_id: msg.remote_id.clone(),
            sender_name: msg.push_name.clone(),
            timestamp: msg.timestamp,
            group_id: None,
            group_name: None,
            is_mentioned: false,
            quoted_text: get_quoted_text(payload),
            media,
        };

        self.buffer(
            msg.remote_id.clone(),
            phone,
            text,
            msg.remote_id,
            meta,
            GroupMode::All,
            false,
        );
    }

    async fn handle_group_message(
        self: &Arc<Self>,
        msg: InboundMessage,
        payload: &crate::message::MessagePayload,
        text: String,
        media: Option<crate::text::MediaRef>,
    ) {
        let group_config = self.store.get_group_config(&msg.remote_id).await;
        if !group_config.allowed {
            return;
        }

        let Some(participant_id) = msg.participant_id.clone() else {
            return;
        };

        let phone = normalize_id(&participant_id);
        let key = format!("{}:{}", msg.remote_id, participant_id);
        let mentioned = is_bot_mentioned(payload, &self.bot_id, self.bot_alt.as_deref());
        let group_meta = self
            .group_cache
            .get_group_meta(&msg.remote_id, self.socket.as_ref())
            .await;

        let meta = EnvelopeMeta {
            channel: "whatsapp",
            kind: ConversationKind::Group,
            sender_id: participant_id,
            sender_name: msg.push_name.clone(),
            timestamp: msg.timestamp,
            group_id: Some(msg.remote_id.clone()),
            group_name: Some(group_meta.name),
            is_mentioned: mentioned,
            quoted_text: get_quoted_text(payload),
            media,
        };

        self.buffer(
            key,
            phone,
            text,
            msg.remote_id,
            meta,
            group_config.mode,
            mentioned,
        );
    }

    /// Append text, refresh the envelope, signal cancellation of any
    /// in-flight run, and (re)schedule the flush per §4.5.3.
    fn buffer(
        self: &Arc<Self>,
        key: String,
        phone: String,
        text: String,
        reply_to: String,
        meta: EnvelopeMeta,
        mode: GroupMode,
        immediate: bool,
    ) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let entry = pending.entry(key.clone()).or_insert_with(|| PendingState {
                phone,
                reply_to,
                texts: Vec::new(),
                meta: meta.clone(),
                mode,
            });
            entry.texts.push(text);
            entry.meta = meta;
            entry.mode = mode;
        }

        if let Some(abort) = self.active_abort.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            abort.cancel();
        }

        let previous_timer = self
            .debounce_timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
        if let Some(previous) = previous_timer {
            previous.cancel();
        }

        let bridge = Arc::clone(self);
        if immediate {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                bridge.flush(&key).await;
            });
        } else {
            let token = CancellationToken::new();
            self.debounce_timers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key.clone(), token.clone());
            let debounce_window = self.config.debounce_window;
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(debounce_window) => {
                        bridge.flush(&key).await;
                    }
                    _ = token.cancelled() => {}
                }
            });
        }
    }

    /// Single-flight worker for `key`: runs at most one agent call at a
    /// time, re-entering immediately if more text arrived during the run.
    async fn flush(self: &Arc<Self>, key: &str) {
        loop {
            {
                let mut processing = self.processing.lock().unwrap_or_else(|e| e.into_inner());
                if processing.contains(key) {
                    return;
                }
                processing.insert(key.to_string());
            }

            let state = self.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
            let Some(state) = state else {
                self.processing.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
                return;
            };
            if state.texts.is_empty() {
                self.processing.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
                return;
            }

            let combined = state.texts.join("\n");
            let cancel = CancellationToken::new();
            self.active_abort
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key.to_string(), cancel.clone());

            if let Err(e) = self.process_message(&state, combined, cancel).await {
                warn!(error = %e, key, "agent call failed");
            }

            self.processing.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
            self.active_abort.lock().unwrap_or_else(|e| e.into_inner()).remove(key);

            let has_pending = self
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(key)
                .map(|p| !p.texts.is_empty())
                .unwrap_or(false);
            if !has_pending {
                return;
            }
        }
    }

    fn thread_identity(&self, state: &PendingState) -> (String, String, serde_json::Value, bool) {
        match (&state.meta.group_id, &state.meta.group_name) {
            (Some(group_id), group_name) => {
                let group_name = group_name.clone().unwrap_or_else(|| group_id.clone());
                let observe = state.mode == GroupMode::Observe
                    || (state.mode == GroupMode::Mentions && !state.meta.is_mentioned);
                (
                    format!("whatsapp-group-{}", group_id),
                    format!("WhatsApp Group: {}", group_name),
                    json!({"type": "whatsapp-group", "groupId": group_id, "groupName": group_name}),
                    observe,
                )
            }
            _ => (
                format!("whatsapp-{}", state.phone),
                format!("WhatsApp: {}", state.phone),
                json!({"type": "whatsapp", "phone": state.phone}),
                false,
            ),
        }
    }

    async fn process_message(
        &self,
        state: &PendingState,
        content: String,
        cancel: CancellationToken,
    ) -> Result<(), crate::agent::AgentError> {
        let (thread_id, thread_title, fields, observe) = self.thread_identity(state);

        let mut body = format!(
            "<message-context>\n{}\n</message-context>\n",
            format_message_envelope(&state.meta)
        );
        body.push_str(&content);
        if observe {
            body = format!(
                "<observe-mode>\n[OBSERVATION ONLY] Your response will NOT be sent to the group.\nTo proactively message this group, use the msg CLI:\n  msg send --channel whatsapp --to \"{}\" \"your message\"\n</observe-mode>\n{}",
                state.meta.group_id.clone().unwrap_or_default(),
                body
            );
        }

        if !observe {
            let socket = Arc::clone(&self.socket);
            let reply_to = state.reply_to.clone();
            tokio::spawn(async move {
                let _ = socket.send_presence_update(PresenceType::Composing, &reply_to).await;
            });
        }

        let agent_timeout = self.config.agent_timeout;
        let timeout_token = cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(agent_timeout).await;
            timeout_token.cancel();
        });

        let thread = ThreadMeta {
            thread_id,
            thread_title,
            fields,
        };
        let result = self.agent.generate(thread, body, cancel.clone()).await;
        timer.abort();

        if !observe {
            let socket = Arc::clone(&self.socket);
            let reply_to = state.reply_to.clone();
            tokio::spawn(async move {
                let _ = socket.send_presence_update(PresenceType::Paused, &reply_to).await;
            });
        }

        match result {
            Ok(_) if observe => Ok(()),
            Ok(reply) => {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                let trimmed = reply.trim();
                if trimmed.is_empty() || contains_no_reply(trimmed) {
                    return Ok(());
                }
                let stripped = strip_directives(trimmed);
                if stripped.is_empty() {
                    return Ok(());
                }
                for chunk in chunk_text(&stripped, self.config.max_text_chunk) {
                    match self.socket.send_message(&state.reply_to, &chunk).await {
                        Ok(wire_id) => self.echo_tracker.record(&wire_id),
                        Err(e) => {
                            warn!(error = %e, "send failed, abandoning remaining chunks");
                            break;
                        }
                    }
                }
                Ok(())
            }
            Err(crate::agent::AgentError::Cancelled) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn start_pairing(&self, raw_id: &str) {
        let now = now_unix_ms();
        let active = self.store.find_active_pairing(raw_id, now).await;
        let code = match active {
            Some(existing) => existing.code,
            None => {
                let _ = self.store.clean_expired_pairings(raw_id, now).await;
                let code = format!("{:06}", rand::thread_rng().gen_range(100_000..=999_999));
                let expires_at = now + self.config.pairing_ttl_ms;
                let _ = self.store.create_pairing(&code, raw_id, expires_at).await;
                code
            }
        };

        let text = format!(
            "Your pairing code is {}. Share it with an operator to approve access.",
            code
        );
        if let Ok(wire_id) = self.socket.send_message(raw_id, &text).await {
            self.echo_tracker.record(&wire_id);
        }
        info!(raw_id, "issued pairing code");
    }
}

/// Approve a pending pairing, adding the peer to the allowlist. Performed
/// out-of-band by the Supervisor/control layer, not by the Bridge itself.
pub async fn approve_pairing(store: &dyn PolicyStore, code: &str, now: i64) -> bool {
    let Some(pairing) = store.get_pairing(code).await else {
        return false;
    };
    if pairing.expires_at <= now {
        return false;
    }
    let phone = normalize_id(&pairing.raw_id);
    let _ = store
        .add_to_allowlist(
            &phone,
            AllowlistUpsert {
                raw_id: Some(pairing.raw_id),
                label: None,
            },
        )
        .await;
    let _ = store.delete_pairing(code).await;
    true
}

fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
