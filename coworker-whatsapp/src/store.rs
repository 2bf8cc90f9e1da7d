//! Policy store: allowlist, pairings, group config, and a key-value bag.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub phone: String,
    pub raw_id: Option<String>,
    pub label: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingEntry {
    pub code: String,
    pub raw_id: String,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    All,
    Mentions,
    Observe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEntry {
    pub group_id: String,
    pub group_name: Option<String>,
    pub mode: GroupMode,
    pub enabled: bool,
    pub created_at: i64,
}

/// Result of a group eligibility lookup: whether the group is eligible to
/// be processed at all, and under which mode.
#[derive(Debug, Clone, Copy)]
pub struct GroupConfig {
    pub allowed: bool,
    pub mode: GroupMode,
}

/// Fields accepted when upserting an allowlist entry.
#[derive(Debug, Clone, Default)]
pub struct AllowlistUpsert {
    pub raw_id: Option<String>,
    pub label: Option<String>,
}

/// The narrow interface the Bridge depends on. Backend (JSON file, SQL,
/// key-value) is an implementation detail; for testability it is injectable.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Fail-closed: any read failure must be treated as `false` by the
    /// implementation, not propagated.
    async fn is_allowed(&self, raw_id: &str, phone: &str) -> bool;
    async fn get_allowlist_entry(&self, phone: &str) -> Option<AllowlistEntry>;
    async fn add_to_allowlist(&self, phone: &str, fields: AllowlistUpsert) -> Result<()>;
    async fn remove_from_allowlist(&self, phone_or_raw_id: &str) -> Result<()>;

    async fn find_active_pairing(&self, raw_id: &str, now: i64) -> Option<PairingEntry>;
    async fn create_pairing(&self, code: &str, raw_id: &str, expires_at: i64) -> Result<()>;
    async fn clean_expired_pairings(&self, raw_id: &str, now: i64) -> Result<()>;
    async fn get_pairing(&self, code: &str) -> Option<PairingEntry>;
    async fn delete_pairing(&self, code: &str) -> Result<()>;

    /// Fail-closed: any read failure must be treated as not-allowed.
    async fn get_group_config(&self, group_id: &str) -> GroupConfig;
    async fn list_groups(&self) -> Vec<GroupEntry>;
    async fn add_group(&self, entry: GroupEntry) -> Result<()>;
    async fn update_group(&self, group_id: &str, mode: Option<GroupMode>, enabled: Option<bool>) -> Result<()>;
    async fn remove_group(&self, group_id: &str) -> Result<()>;

    async fn get_config(&self, key: &str) -> Option<String>;
    async fn set_config(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    allowlist: Vec<AllowlistEntry>,
    #[serde(default)]
    pairings: Vec<PairingEntry>,
    #[serde(default)]
    groups: Vec<GroupEntry>,
    #[serde(default)]
    config: HashMap<String, String>,
}

/// A single JSON document on disk, guarded by a write mutex so concurrent
/// mutations serialize; reads take a consistent in-memory snapshot.
pub struct JsonPolicyStore {
    path: PathBuf,
    doc: RwLock<Document>,
    write_lock: AsyncMutex<()>,
}

impl JsonPolicyStore {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Document::default()
            } else {
                match serde_json::from_str(&content) {
                    Ok(doc) => doc,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "corrupt policy store, starting empty");
                        Document::default()
                    }
                }
            }
        } else {
            Document::default()
        };

        Ok(Self {
            path,
            doc: RwLock::new(doc),
            write_lock: AsyncMutex::new(()),
        })
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = {
            let doc = self.doc.read().unwrap_or_else(|e| e.into_inner());
            serde_json::to_string_pretty(&*doc)?
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, snapshot)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for JsonPolicyStore {
    async fn is_allowed(&self, raw_id: &str, phone: &str) -> bool {
        let doc = match self.doc.read() {
            Ok(d) => d,
            Err(_) => return false,
        };
        doc.allowlist
            .iter()
            .any(|e| e.phone == phone || e.raw_id.as_deref() == Some(raw_id))
    }

    async fn get_allowlist_entry(&self, phone: &str) -> Option<AllowlistEntry> {
        let doc = self.doc.read().ok()?;
        doc.allowlist.iter().find(|e| e.phone == phone).cloned()
    }

    async fn add_to_allowlist(&self, phone: &str, fields: AllowlistUpsert) -> Result<()> {
        {
            let mut doc = self.doc.write().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = doc.allowlist.iter_mut().find(|e| e.phone == phone) {
                existing.raw_id = fields.raw_id.or_else(|| existing.raw_id.clone());
                existing.label = fields.label.or_else(|| existing.label.clone());
            } else {
                doc.allowlist.push(AllowlistEntry {
                    phone: phone.to_string(),
                    raw_id: fields.raw_id,
                    label: fields.label,
                    created_at: now_unix(),
                });
            }
        }
        self.persist().await
    }

    async fn remove_from_allowlist(&self, phone_or_raw_id: &str) -> Result<()> {
        {
            let mut doc = self.doc.write().unwrap_or_else(|e| e.into_inner());
            doc.allowlist
                .retain(|e| e.phone != phone_or_raw_id && e.raw_id.as_deref() != Some(phone_or_raw_id));
        }
        self.persist().await
    }

    async fn find_active_pairing(&self, raw_id: &str, now: i64) -> Option<PairingEntry> {
        let doc = self.doc.read().ok()?;
        doc.pairings
            .iter()
            .find(|p| p.raw_id == raw_id && p.expires_at > now)
            .cloned()
    }

    async fn create_pairing(&self, code: &str, raw_id: &str, expires_at: i64) -> Result<()> {
        {
            let mut doc = self.doc.write().unwrap_or_else(|e| e.into_inner());
            doc.pairings.push(PairingEntry {
                code: code.to_string(),
                raw_id: raw_id.to_string(),
                created_at: now_unix(),
                expires_at,
            });
        }
        self.persist().await
    }

    async fn clean_expired_pairings(&self, raw_id: &str, now: i64) -> Result<()> {
        {
            let mut doc = self.doc.write().unwrap_or_else(|e| e.into_inner());
            doc.pairings
                .retain(|p| p.raw_id != raw_id || p.expires_at > now);
        }
        self.persist().await
    }

    async fn get_pairing(&self, code: &str) -> Option<PairingEntry> {
        let doc = self.doc.read().ok()?;
        doc.pairings.iter().find(|p| p.code == code).cloned()
    }

    async fn delete_pairing(&self, code: &str) -> Result<()> {
        {
            let mut doc = self.doc.write().unwrap_or_else(|e| e.into_inner());
            doc.pairings.retain(|p| p.code != code);
        }
        self.persist().await
    }

    async fn get_group_config(&self, group_id: &str) -> GroupConfig {
        let doc = match self.doc.read() {
            Ok(d) => d,
            Err(_) => {
                return GroupConfig {
                    allowed: false,
                    mode: GroupMode::Mentions,
                }
            }
        };
        match doc.groups.iter().find(|g| g.group_id == group_id) {
            Some(entry) if entry.enabled => GroupConfig {
                allowed: true,
                mode: entry.mode,
            },
            _ => GroupConfig {
                allowed: false,
                mode: GroupMode::Mentions,
            },
        }
    }

    async fn list_groups(&self) -> Vec<GroupEntry> {
        self.doc
            .read()
            .map(|d| d.groups.clone())
            .unwrap_or_default()
    }

    async fn add_group(&self, entry: GroupEntry) -> Result<()> {
        {
            let mut doc = self.doc.write().unwrap_or_else(|e| e.into_inner());
            doc.groups.retain(|g| g.group_id != entry.group_id);
            doc.groups.push(entry);
        }
        self.persist().await
    }

    async fn update_group(
        &self,
        group_id: &str,
        mode: Option<GroupMode>,
        enabled: Option<bool>,
    ) -> Result<()> {
        {
            let mut doc = self.doc.write().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = doc.groups.iter_mut().find(|g| g.group_id == group_id) {
                if let Some(mode) = mode {
                    entry.mode = mode;
                }
                if let Some(enabled) = enabled {
                    entry.enabled = enabled;
                }
            }
        }
        self.persist().await
    }

    async fn remove_group(&self, group_id: &str) -> Result<()> {
        {
            let mut doc = self.doc.write().unwrap_or_else(|e| e.into_inner());
            doc.groups.retain(|g| g.group_id != group_id);
        }
        self.persist().await
    }

    async fn get_config(&self, key: &str) -> Option<String> {
        self.doc.read().ok()?.config.get(key).cloned()
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        {
            let mut doc = self.doc.write().unwrap_or_else(|e| e.into_inner());
            doc.config.insert(key.to_string(), value.to_string());
        }
        self.persist().await
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
