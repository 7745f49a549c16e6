// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! imgpipe-store
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use imgpipe_core::{Batch, Job, User};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors surfaced by the store (spec §4.J).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record exists for the given key.
    #[error("no record for key {0}")]
    NotFound(String),
    /// An optimistic-concurrency write lost the race; `expected` was the
    /// version the caller read, `actual` is what is currently stored.
    #[error("version conflict: expected {expected}, store has {actual}")]
    Conflict {
        /// Version the caller believed was current.
        expected: u64,
        /// Version actually found in the store.
        actual: u64,
    },
    /// A CAS write lost the race on every bounded retry attempt.
    #[error("exhausted retries attempting a compare-and-swap write")]
    CasExhausted,
    /// Failed to read or write the backing file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to (de)serialize a record.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The primary KV backend rejected or failed an operation.
    #[error("kv backend error: {0}")]
    Kv(String),
}

const MAX_CAS_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

async fn retry_backoff(attempt: u32) {
    let delay = INITIAL_BACKOFF * 2u32.pow(attempt);
    tokio::time::sleep(delay).await;
}

/// A primary key-value backend (spec §4.J). Deployments back this with
/// whatever networked KV store they run in production; this crate ships
/// [`InMemoryKvBackend`] for tests and for exercising the fallback path, and
/// accepts any other implementation as a trait object so the store itself
/// stays backend-agnostic.
#[async_trait::async_trait]
pub trait KvBackend: std::fmt::Debug + Send + Sync {
    /// Fetch the raw bytes stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Upsert `value` under `key`.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
    /// List every key currently stored under `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
    /// Cheap reachability check, used once at startup to decide between the
    /// primary backend and the file fallback.
    async fn ping(&self) -> bool;
}

/// An in-process [`KvBackend`] used by tests and by deployments with no
/// networked KV store. [`InMemoryKvBackend::unreachable`] constructs one that
/// reports itself down until [`InMemoryKvBackend::set_reachable`] flips it,
/// so the startup fallback-to-file path can be exercised deterministically.
#[derive(Debug, Default)]
pub struct InMemoryKvBackend {
    data: RwLock<HashMap<String, Vec<u8>>>,
    reachable: AtomicBool,
}

impl InMemoryKvBackend {
    /// Create a reachable, empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Create a backend that reports itself unreachable until
    /// [`set_reachable`](Self::set_reachable) is called.
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            reachable: AtomicBool::new(false),
        }
    }

    /// Flip the reachability reported by [`ping`](KvBackend::ping).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl KvBackend for InMemoryKvBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .data
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// The backend a store actually writes through, decided once at construction
/// time: the primary KV if it answers a [`KvBackend::ping`], a local
/// append-only JSON file tree otherwise (spec §4.J "Fallback ... when the
/// primary KV is unreachable at startup").
enum Backend {
    Kv(Arc<dyn KvBackend>),
    File,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Kv(_) => f.write_str("Backend::Kv"),
            Backend::File => f.write_str("Backend::File"),
        }
    }
}

impl Backend {
    async fn connect(kv: Option<Arc<dyn KvBackend>>) -> Self {
        match kv {
            Some(backend) if backend.ping().await => Backend::Kv(backend),
            _ => Backend::File,
        }
    }
}

fn record_path(root: &Path, subdir: &str, key: &str) -> PathBuf {
    root.join(subdir).join(format!("{key}.json"))
}

async fn persist_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

async fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn list_json_dir(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            out.push(path);
        }
    }
    Ok(out)
}

/// Read a single record through `backend`: `kv_prefix:key` in KV mode,
/// `root/dir/key.json` in file mode.
async fn backend_get<T: serde::de::DeserializeOwned>(
    backend: &Backend,
    root: &Path,
    dir: &str,
    kv_prefix: &str,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match backend {
        Backend::Kv(kv) => match kv.get(&format!("{kv_prefix}:{key}")).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        },
        Backend::File => {
            let path = record_path(root, dir, key);
            if !path.exists() {
                return Ok(None);
            }
            Ok(Some(load_json(&path).await?))
        }
    }
}

async fn backend_put<T: serde::Serialize>(
    backend: &Backend,
    root: &Path,
    dir: &str,
    kv_prefix: &str,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    match backend {
        Backend::Kv(kv) => kv.put(&format!("{kv_prefix}:{key}"), serde_json::to_vec(value)?).await,
        Backend::File => persist_json(&record_path(root, dir, key), value).await,
    }
}

/// List every key stored under a store's namespace, independent of backend.
async fn backend_list_keys(backend: &Backend, root: &Path, dir: &str, kv_prefix: &str) -> Result<Vec<String>, StoreError> {
    match backend {
        Backend::Kv(kv) => {
            let prefix = format!("{kv_prefix}:");
            Ok(kv
                .keys_with_prefix(&prefix)
                .await?
                .into_iter()
                .filter(|k| !k[prefix.len()..].contains(':'))
                .map(|k| k[prefix.len()..].to_string())
                .collect())
        }
        Backend::File => {
            let paths = list_json_dir(&root.join(dir)).await?;
            Ok(paths
                .iter()
                .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
                .collect())
        }
    }
}

/// User records plus the `user:email:{lower(email)}` secondary index.
#[derive(Debug)]
pub struct UserStore {
    root: PathBuf,
    backend: Backend,
    by_id: RwLock<HashMap<Uuid, User>>,
    by_email: RwLock<HashMap<String, Uuid>>,
}

impl UserStore {
    /// Create a file-backed store rooted at `root` (key shape `user:{id}` on
    /// disk under `root/users/`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            backend: Backend::File,
            by_id: RwLock::new(HashMap::new()),
            by_email: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store that writes through `kv` when it answers a ping at
    /// construction time, falling back to the file tree at `root` otherwise.
    pub async fn new_with_kv(root: impl Into<PathBuf>, kv: Arc<dyn KvBackend>) -> Self {
        Self {
            root: root.into(),
            backend: Backend::connect(Some(kv)).await,
            by_id: RwLock::new(HashMap::new()),
            by_email: RwLock::new(HashMap::new()),
        }
    }

    /// Whether this store is currently writing through the primary KV
    /// backend rather than the file fallback.
    #[must_use]
    pub fn is_kv_backed(&self) -> bool {
        matches!(self.backend, Backend::Kv(_))
    }

    /// Load every user record through the active backend into the in-memory
    /// cache, rebuilding the email index.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend or a record cannot be read.
    pub async fn hydrate_from_disk(&self) -> Result<usize, StoreError> {
        let ids = backend_list_keys(&self.backend, &self.root, "users", "user").await?;
        let mut by_id = self.by_id.write().await;
        let mut by_email = self.by_email.write().await;
        let mut loaded = 0;
        for id in &ids {
            let Some(user): Option<User> = backend_get(&self.backend, &self.root, "users", "user", id).await? else {
                continue;
            };
            by_email.insert(user.email.clone(), user.user_id);
            by_id.insert(user.user_id, user);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Insert a brand-new user (fails if the id already exists).
    ///
    /// # Errors
    ///
    /// Returns an error if persisting to the backend fails.
    pub async fn create(&self, user: User) -> Result<User, StoreError> {
        backend_put(&self.backend, &self.root, "users", "user", &user.user_id.to_string(), &user).await?;
        if let Backend::Kv(kv) = &self.backend {
            kv.put(&format!("user:email:{}", user.email), user.user_id.to_string().into_bytes()).await?;
        }
        self.by_email.write().await.insert(user.email.clone(), user.user_id);
        self.by_id.write().await.insert(user.user_id, user.clone());
        Ok(user)
    }

    /// Fetch a user by id from the in-memory cache.
    pub async fn get(&self, user_id: Uuid) -> Option<User> {
        self.by_id.read().await.get(&user_id).cloned()
    }

    /// Fetch a user by (already-lowercased) email.
    pub async fn get_by_email(&self, email: &str) -> Option<User> {
        let id = *self.by_email.read().await.get(email)?;
        self.by_id.read().await.get(&id).cloned()
    }

    /// Apply `mutate` to the current user and commit it, retrying on a CAS
    /// conflict with bounded exponential backoff (spec §4.J).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the user doesn't exist and
    /// [`StoreError::CasExhausted`] if every retry attempt lost the race.
    pub async fn update<F>(&self, user_id: Uuid, mut mutate: F) -> Result<User, StoreError>
    where
        F: FnMut(&User) -> User,
    {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .get(user_id)
                .await
                .ok_or_else(|| StoreError::NotFound(format!("user:{user_id}")))?;
            let expected_version = current.version;
            let mut candidate = mutate(&current);
            candidate.version = expected_version + 1;

            let mut by_id = self.by_id.write().await;
            let actual_version = by_id.get(&user_id).map_or(expected_version, |u| u.version);
            if actual_version != expected_version {
                drop(by_id);
                retry_backoff(attempt).await;
                continue;
            }
            backend_put(&self.backend, &self.root, "users", "user", &user_id.to_string(), &candidate).await?;
            by_id.insert(user_id, candidate.clone());
            return Ok(candidate);
        }
        Err(StoreError::CasExhausted)
    }

    /// Idempotent one-shot migration: upsert every user currently cached
    /// in-memory into `kv`, including the email index. Safe to call more
    /// than once (e.g. on every reconnect attempt) since every write is a
    /// plain overwrite of the same content.
    ///
    /// # Errors
    ///
    /// Returns an error if a write to `kv` fails.
    pub async fn migrate_to_kv(&self, kv: &Arc<dyn KvBackend>) -> Result<usize, StoreError> {
        let snapshot: Vec<User> = self.by_id.read().await.values().cloned().collect();
        for user in &snapshot {
            kv.put(&format!("user:{}", user.user_id), serde_json::to_vec(user)?).await?;
            kv.put(&format!("user:email:{}", user.email), user.user_id.to_string().into_bytes()).await?;
        }
        Ok(snapshot.len())
    }
}

/// Batch records plus the `batch:byUser:{userId}` secondary index.
#[derive(Debug)]
pub struct BatchStore {
    root: PathBuf,
    backend: Backend,
    by_id: RwLock<HashMap<Uuid, Batch>>,
    by_user: RwLock<HashMap<Uuid, Vec<Uuid>>>,
}

impl BatchStore {
    /// Create a file-backed store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            backend: Backend::File,
            by_id: RwLock::new(HashMap::new()),
            by_user: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store that writes through `kv` when it answers a ping at
    /// construction time, falling back to the file tree at `root` otherwise.
    pub async fn new_with_kv(root: impl Into<PathBuf>, kv: Arc<dyn KvBackend>) -> Self {
        Self {
            root: root.into(),
            backend: Backend::connect(Some(kv)).await,
            by_id: RwLock::new(HashMap::new()),
            by_user: RwLock::new(HashMap::new()),
        }
    }

    /// Whether this store is currently writing through the primary KV
    /// backend rather than the file fallback.
    #[must_use]
    pub fn is_kv_backed(&self) -> bool {
        matches!(self.backend, Backend::Kv(_))
    }

    /// Load every batch record through the active backend, rebuilding the
    /// `byUser` index.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend or a record cannot be read.
    pub async fn hydrate_from_disk(&self) -> Result<usize, StoreError> {
        let ids = backend_list_keys(&self.backend, &self.root, "batches", "batch").await?;
        let mut by_id = self.by_id.write().await;
        let mut by_user = self.by_user.write().await;
        let mut loaded = 0;
        for id in &ids {
            let Some(batch): Option<Batch> = backend_get(&self.backend, &self.root, "batches", "batch", id).await? else {
                continue;
            };
            by_user.entry(batch.owner_user_id).or_default().push(batch.batch_id);
            by_id.insert(batch.batch_id, batch);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Persist a new batch and index it under its owner.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting to the backend fails.
    pub async fn create(&self, batch: Batch) -> Result<Batch, StoreError> {
        backend_put(&self.backend, &self.root, "batches", "batch", &batch.batch_id.to_string(), &batch).await?;
        self.by_user.write().await.entry(batch.owner_user_id).or_default().push(batch.batch_id);
        self.by_id.write().await.insert(batch.batch_id, batch.clone());
        self.sync_by_user_index(batch.owner_user_id).await?;
        Ok(batch)
    }

    /// Fetch a batch by id.
    pub async fn get(&self, batch_id: Uuid) -> Option<Batch> {
        self.by_id.read().await.get(&batch_id).cloned()
    }

    /// All batch ids owned by a user, in creation order.
    pub async fn list_by_user(&self, user_id: Uuid) -> Vec<Uuid> {
        self.by_user.read().await.get(&user_id).cloned().unwrap_or_default()
    }

    /// Overwrite a batch record (e.g. appending a job id, or updating the
    /// credit hold on cancellation). `Batch` carries no version counter, so
    /// callers needing CAS semantics should serialize through a higher-level
    /// lock; this store only guarantees the write itself is atomic.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting to the backend fails.
    pub async fn put(&self, batch: Batch) -> Result<Batch, StoreError> {
        backend_put(&self.backend, &self.root, "batches", "batch", &batch.batch_id.to_string(), &batch).await?;
        self.by_id.write().await.insert(batch.batch_id, batch.clone());
        Ok(batch)
    }

    async fn sync_by_user_index(&self, user_id: Uuid) -> Result<(), StoreError> {
        if let Backend::Kv(kv) = &self.backend {
            let ids = self.list_by_user(user_id).await;
            kv.put(&format!("batch:byUser:{user_id}"), serde_json::to_vec(&ids)?).await?;
        }
        Ok(())
    }

    /// Idempotent one-shot migration of every cached batch (and its
    /// `byUser` index entry) into `kv`.
    ///
    /// # Errors
    ///
    /// Returns an error if a write to `kv` fails.
    pub async fn migrate_to_kv(&self, kv: &Arc<dyn KvBackend>) -> Result<usize, StoreError> {
        let snapshot: Vec<Batch> = self.by_id.read().await.values().cloned().collect();
        for batch in &snapshot {
            kv.put(&format!("batch:{}", batch.batch_id), serde_json::to_vec(batch)?).await?;
        }
        for (user_id, ids) in self.by_user.read().await.iter() {
            kv.put(&format!("batch:byUser:{user_id}"), serde_json::to_vec(ids)?).await?;
        }
        Ok(snapshot.len())
    }
}

/// Job records plus the `job:byBatch:{batchId}` secondary index.
#[derive(Debug)]
pub struct JobStore {
    root: PathBuf,
    backend: Backend,
    by_id: RwLock<HashMap<Uuid, Job>>,
    by_batch: RwLock<HashMap<Uuid, Vec<Uuid>>>,
}

impl JobStore {
    /// Create a file-backed store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            backend: Backend::File,
            by_id: RwLock::new(HashMap::new()),
            by_batch: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store that writes through `kv` when it answers a ping at
    /// construction time, falling back to the file tree at `root` otherwise.
    pub async fn new_with_kv(root: impl Into<PathBuf>, kv: Arc<dyn KvBackend>) -> Self {
        Self {
            root: root.into(),
            backend: Backend::connect(Some(kv)).await,
            by_id: RwLock::new(HashMap::new()),
            by_batch: RwLock::new(HashMap::new()),
        }
    }

    /// Whether this store is currently writing through the primary KV
    /// backend rather than the file fallback.
    #[must_use]
    pub fn is_kv_backed(&self) -> bool {
        matches!(self.backend, Backend::Kv(_))
    }

    /// Load every job record through the active backend, rebuilding the
    /// `byBatch` index.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend or a record cannot be read.
    pub async fn hydrate_from_disk(&self) -> Result<usize, StoreError> {
        let ids = backend_list_keys(&self.backend, &self.root, "jobs", "job").await?;
        let mut by_id = self.by_id.write().await;
        let mut by_batch = self.by_batch.write().await;
        let mut loaded = 0;
        for id in &ids {
            let Some(job): Option<Job> = backend_get(&self.backend, &self.root, "jobs", "job", id).await? else {
                continue;
            };
            by_batch.entry(job.batch_id).or_default().push(job.job_id);
            by_id.insert(job.job_id, job);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Persist a new job and index it under its batch.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting to the backend fails.
    pub async fn create(&self, job: Job) -> Result<Job, StoreError> {
        backend_put(&self.backend, &self.root, "jobs", "job", &job.job_id.to_string(), &job).await?;
        self.by_batch.write().await.entry(job.batch_id).or_default().push(job.job_id);
        self.by_id.write().await.insert(job.job_id, job.clone());
        self.sync_by_batch_index(job.batch_id).await?;
        Ok(job)
    }

    /// Fetch a job by id.
    pub async fn get(&self, job_id: Uuid) -> Option<Job> {
        self.by_id.read().await.get(&job_id).cloned()
    }

    /// All job ids belonging to a batch, in creation order.
    pub async fn list_by_batch(&self, batch_id: Uuid) -> Vec<Uuid> {
        self.by_batch.read().await.get(&batch_id).cloned().unwrap_or_default()
    }

    /// Apply `mutate` to the current job and commit it, retrying on a CAS
    /// conflict with bounded exponential backoff (max 5 attempts, 50ms
    /// doubling, spec §4.J). `updated_at`/`version` are bumped automatically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the job doesn't exist and
    /// [`StoreError::CasExhausted`] if every retry attempt lost the race.
    pub async fn update<F>(&self, job_id: Uuid, mut mutate: F) -> Result<Job, StoreError>
    where
        F: FnMut(&Job) -> Job,
    {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .get(job_id)
                .await
                .ok_or_else(|| StoreError::NotFound(format!("job:{job_id}")))?;
            let expected_version = current.version;
            let mut candidate = mutate(&current);

            let mut by_id = self.by_id.write().await;
            let actual_version = by_id.get(&job_id).map_or(expected_version, |j| j.version);
            if actual_version != expected_version {
                drop(by_id);
                retry_backoff(attempt).await;
                continue;
            }
            candidate.version = expected_version + 1;
            candidate.updated_at = Utc::now();
            backend_put(&self.backend, &self.root, "jobs", "job", &job_id.to_string(), &candidate).await?;
            by_id.insert(job_id, candidate.clone());
            return Ok(candidate);
        }
        Err(StoreError::CasExhausted)
    }

    async fn sync_by_batch_index(&self, batch_id: Uuid) -> Result<(), StoreError> {
        if let Backend::Kv(kv) = &self.backend {
            let ids = self.list_by_batch(batch_id).await;
            kv.put(&format!("job:byBatch:{batch_id}"), serde_json::to_vec(&ids)?).await?;
        }
        Ok(())
    }

    /// Idempotent one-shot migration of every cached job (and its
    /// `byBatch` index entry) into `kv`.
    ///
    /// # Errors
    ///
    /// Returns an error if a write to `kv` fails.
    pub async fn migrate_to_kv(&self, kv: &Arc<dyn KvBackend>) -> Result<usize, StoreError> {
        let snapshot: Vec<Job> = self.by_id.read().await.values().cloned().collect();
        for job in &snapshot {
            kv.put(&format!("job:{}", job.job_id), serde_json::to_vec(job)?).await?;
        }
        for (batch_id, ids) in self.by_batch.read().await.iter() {
            kv.put(&format!("job:byBatch:{batch_id}"), serde_json::to_vec(ids)?).await?;
        }
        Ok(snapshot.len())
    }
}

/// Read-only, content-hash-keyed cache of structural masks (edge maps used
/// by the local validator lane as a cheap baseline cache, spec §4.C). Never
/// evicted by this type; callers own any eviction policy.
#[derive(Debug, Clone, Default)]
pub struct StructuralMaskCache {
    masks: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
}

impl StructuralMaskCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a cached mask by content hash (e.g. the image's `image_id`).
    pub async fn get(&self, content_hash: &str) -> Option<Arc<Vec<u8>>> {
        self.masks.read().await.get(content_hash).cloned()
    }

    /// Insert a mask, keyed by content hash. Masks are immutable once
    /// inserted: a second insert under the same key is a silent no-op,
    /// since the bytes a given content hash maps to never change.
    pub async fn insert(&self, content_hash: String, mask: Vec<u8>) {
        self.masks.write().await.entry(content_hash).or_insert_with(|| Arc::new(mask));
    }
}
