//! Document store port and the in-memory adapter.
//!
//! Two collections are kept, both keyed by participant id: `participants`
//! and `pairings` (keyed by giver). Every method is an independent store
//! call; nothing here spans several documents atomically except
//! [`ExchangeStore::delete_pairings`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use draw_core::{Participant, WishItem};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantRecord {
    pub first_name: String,
    pub last_name: String,
    pub wishlist: Vec<WishItem>,
    pub excluded_ids: Vec<String>,
}

impl ParticipantRecord {
    pub fn into_participant(self, id: impl Into<String>) -> Participant {
        Participant {
            id: id.into(),
            first_name: self.first_name,
            last_name: self.last_name,
            wishlist: self.wishlist,
            excluded_ids: self.excluded_ids.into_iter().collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PairingRecord {
    pub recipient_id: String,
    #[serde(default)]
    pub revealed: bool,
    /// Shared by every pairing written by one draw.
    #[serde(default)]
    pub draw_id: Option<Uuid>,
    /// Number of pairings the draw wrote in total.
    #[serde(default)]
    pub draw_size: usize,
}

/// Field-level update of a participant document.
#[derive(Clone, Debug)]
pub enum ParticipantUpdate {
    Profile {
        first_name: String,
        last_name: String,
    },
    Wishlist(Vec<WishItem>),
    Exclusions(Vec<String>),
}

impl ParticipantUpdate {
    fn apply(self, record: &mut ParticipantRecord) {
        match self {
            ParticipantUpdate::Profile {
                first_name,
                last_name,
            } => {
                record.first_name = first_name;
                record.last_name = last_name;
            }
            ParticipantUpdate::Wishlist(items) => record.wishlist = items,
            ParticipantUpdate::Exclusions(ids) => record.excluded_ids = ids,
        }
    }
}

/// Result of the conditional `revealed: false -> true` write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevealOutcome {
    Flipped,
    AlreadyRevealed,
    Missing,
}

#[async_trait]
pub trait ExchangeStore: Send + Sync {
    async fn get_participant(&self, id: &str) -> StoreResult<Option<ParticipantRecord>>;

    /// Writes `record` only when no document exists; returns the stored one.
    async fn insert_participant_if_absent(
        &self,
        id: &str,
        record: ParticipantRecord,
    ) -> StoreResult<ParticipantRecord>;

    /// Returns `None` when the participant does not exist.
    async fn update_participant(
        &self,
        id: &str,
        update: ParticipantUpdate,
    ) -> StoreResult<Option<ParticipantRecord>>;

    /// All participants ordered by id.
    async fn list_participants(&self) -> StoreResult<Vec<(String, ParticipantRecord)>>;

    async fn get_pairing(&self, giver_id: &str) -> StoreResult<Option<PairingRecord>>;

    async fn list_pairings(&self) -> StoreResult<Vec<(String, PairingRecord)>>;

    async fn put_pairing(&self, giver_id: &str, pairing: PairingRecord) -> StoreResult<()>;

    /// Sets `revealed` only if it is currently false.
    async fn mark_revealed(&self, giver_id: &str) -> StoreResult<RevealOutcome>;

    /// Removes every pairing, returning how many existed.
    async fn delete_pairings(&self) -> StoreResult<usize>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Collections {
    participants: BTreeMap<String, ParticipantRecord>,
    pairings: BTreeMap<String, PairingRecord>,
}

/// In-process store, optionally snapshotted to a JSON file after each write.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Collections>>,
    persist_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads an existing snapshot from `path`, or starts empty when the file
    /// does not exist yet.
    pub async fn with_persistence(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let collections = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Collections>(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Collections::default(),
            Err(err) => return Err(err.into()),
        };
        tracing::info!(
            path = %path.display(),
            participants = collections.participants.len(),
            pairings = collections.pairings.len(),
            "loaded store snapshot"
        );
        Ok(Self {
            inner: Arc::new(RwLock::new(collections)),
            persist_path: Some(path),
        })
    }

    /// Applies `change` to a copy, persists it, then swaps it in, so a failed
    /// snapshot write leaves the store untouched.
    ///
    /// The write and the swap run in a spawned task that holds the write lock
    /// until both finish, so a caller that stops waiting cannot leave disk
    /// ahead of memory or let a second write overlap the first.
    async fn commit<T, F>(&self, change: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Collections) -> T + Send,
        T: Send,
    {
        let mut guard = self.inner.clone().write_owned().await;
        let Some(path) = self.persist_path.clone() else {
            return Ok(change(&mut *guard));
        };

        let mut next = (*guard).clone();
        let out = change(&mut next);
        let json = serde_json::to_vec_pretty(&next)?;

        let persisted = tokio::spawn(async move {
            if let Err(err) = write_snapshot(&path, json).await {
                tracing::warn!(path = %path.display(), error = %err, "snapshot write failed");
                return Err(err);
            }
            *guard = next;
            Ok(())
        });
        persisted
            .await
            .map_err(|err| StoreError::Unavailable(format!("snapshot task failed: {err}")))??;
        Ok(out)
    }
}

/// Writes beside `path` and renames over it, so readers only ever see a
/// whole snapshot.
async fn write_snapshot(path: &Path, json: Vec<u8>) -> StoreResult<()> {
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, json).await?;
    tokio::fs::rename(&staging, path).await?;
    Ok(())
}

#[async_trait]
impl ExchangeStore for MemoryStore {
    async fn get_participant(&self, id: &str) -> StoreResult<Option<ParticipantRecord>> {
        Ok(self.inner.read().await.participants.get(id).cloned())
    }

    async fn insert_participant_if_absent(
        &self,
        id: &str,
        record: ParticipantRecord,
    ) -> StoreResult<ParticipantRecord> {
        if let Some(existing) = self.get_participant(id).await? {
            return Ok(existing);
        }
        self.commit(|c| {
            c.participants
                .entry(id.to_string())
                .or_insert(record)
                .clone()
        })
        .await
    }

    async fn update_participant(
        &self,
        id: &str,
        update: ParticipantUpdate,
    ) -> StoreResult<Option<ParticipantRecord>> {
        self.commit(|c| {
            c.participants.get_mut(id).map(|record| {
                update.apply(record);
                record.clone()
            })
        })
        .await
    }

    async fn list_participants(&self) -> StoreResult<Vec<(String, ParticipantRecord)>> {
        let collections = self.inner.read().await;
        Ok(collections
            .participants
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect())
    }

    async fn get_pairing(&self, giver_id: &str) -> StoreResult<Option<PairingRecord>> {
        Ok(self.inner.read().await.pairings.get(giver_id).cloned())
    }

    async fn list_pairings(&self) -> StoreResult<Vec<(String, PairingRecord)>> {
        let collections = self.inner.read().await;
        Ok(collections
            .pairings
            .iter()
            .map(|(giver, pairing)| (giver.clone(), pairing.clone()))
            .collect())
    }

    async fn put_pairing(&self, giver_id: &str, pairing: PairingRecord) -> StoreResult<()> {
        self.commit(|c| {
            c.pairings.insert(giver_id.to_string(), pairing);
        })
        .await
    }

    async fn mark_revealed(&self, giver_id: &str) -> StoreResult<RevealOutcome> {
        self.commit(|c| match c.pairings.get_mut(giver_id) {
            None => RevealOutcome::Missing,
            Some(pairing) if pairing.revealed => RevealOutcome::AlreadyRevealed,
            Some(pairing) => {
                pairing.revealed = true;
                RevealOutcome::Flipped
            }
        })
        .await
    }

    async fn delete_pairings(&self) -> StoreResult<usize> {
        self.commit(|c| {
            let removed = c.pairings.len();
            c.pairings.clear();
            removed
        })
        .await
    }
}
