//! Checkpoint persistence for conversation threads
//!
//! A checkpoint is the whole `ConversationState` of a thread. Loading a thread
//! that was never saved yields a fresh state. Saving overwrites.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::agent::ConversationState;
use crate::core::{NetdeskError, Result};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// State for `thread_id`, or a fresh one if none was saved
    async fn load(&self, thread_id: &str) -> Result<ConversationState>;

    /// Persist `state` for `thread_id`, replacing any previous checkpoint
    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<()>;
}

/// Checkpoints kept in process memory
#[derive(Default)]
pub struct MemoryCheckpointStore {
    states: RwLock<HashMap<String, ConversationState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with a checkpoint
    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<ConversationState> {
        Ok(self
            .states
            .read()
            .await
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<()> {
        self.states
            .write()
            .await
            .insert(thread_id.to_string(), state.clone());
        Ok(())
    }
}

/// One JSON file per thread
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Use `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            NetdeskError::checkpoint(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Thread ids become file names: safe ids are used as is, anything else is hex-encoded
    fn path_for(&self, thread_id: &str) -> PathBuf {
        let safe = !thread_id.is_empty()
            && thread_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        let stem = if safe {
            thread_id.to_string()
        } else {
            let hex: String = thread_id.bytes().map(|b| format!("{:02x}", b)).collect();
            format!("x-{}", hex)
        };
        self.dir.join(format!("{}.json", stem))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<ConversationState> {
        let path = self.path_for(thread_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ConversationState::default())
            }
            Err(e) => {
                return Err(NetdeskError::checkpoint(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        debug!(thread = thread_id, path = %path.display(), "checkpoint loaded");
        serde_json::from_str(&content).map_err(|e| {
            NetdeskError::checkpoint(format!("corrupt checkpoint {}: {}", path.display(), e))
        })
    }

    async fn save(&self, thread_id: &str, state: &ConversationState) -> Result<()> {
        let path = self.path_for(thread_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(state)?;

        tokio::fs::write(&tmp, content).await.map_err(|e| {
            NetdeskError::checkpoint(format!("cannot write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            NetdeskError::checkpoint(format!("cannot replace {}: {}", path.display(), e))
        })?;

        debug!(thread = thread_id, path = %path.display(), "checkpoint saved");
        Ok(())
    }
}

type LockMap = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Serializes turns per thread; distinct threads never block each other
#[derive(Default)]
pub struct ThreadLocks {
    locks: LockMap,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other turn holds `thread_id`; the lock is held until the guard drops
    pub async fn acquire(&self, thread_id: &str) -> ThreadGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(thread_id.to_string()).or_default())
        };
        ThreadGuard {
            guard: Some(lock.lock_owned().await),
            thread_id: thread_id.to_string(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Threads currently locked or waited on
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds one thread's lock; the last guard of a thread removes its map entry
pub struct ThreadGuard {
    guard: Option<OwnedMutexGuard<()>>,
    thread_id: String,
    locks: LockMap,
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiters hold their own clone of the entry
        if locks
            .get(&self.thread_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.thread_id);
        }
    }
}
