use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use snip_core::{
    BatchEntry, BatchItem, LinkRecord, Repository, Result, ShortId, ShortIdGenerator, Stats,
    StorageError, UserId,
};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// In-memory storage entry for a link.
#[derive(Debug, Clone)]
struct Entry {
    original_url: String,
    owner: UserId,
    deleted: bool,
}

/// One line of the append-only log.
///
/// Insert lines carry `id` and `original_url`; `owner` and `deleted` are
/// optional so that plain `{"id", "original_url"}` lines replay too.
#[derive(Debug, Serialize, Deserialize)]
struct LogLine {
    id: ShortId,
    original_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<UserId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    deleted: bool,
}

/// Where log lines go. A [`File`] in production.
trait LogSink: Write + Send + Sync {
    fn size(&self) -> std::io::Result<u64>;

    /// Cuts the sink back to `len` bytes.
    fn truncate(&mut self, len: u64) -> std::io::Result<()>;
}

impl LogSink for File {
    fn size(&self) -> std::io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }
}

struct AppendLog {
    path: PathBuf,
    sink: Box<dyn LogSink>,
}

impl std::fmt::Debug for AppendLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppendLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl AppendLog {
    /// Appends one line in a single write. On failure the sink is cut back
    /// to its previous length so no partial line survives.
    fn append(&mut self, line: &LogLine) -> Result<()> {
        let mut bytes = serde_json::to_vec(line)
            .map_err(|e| StorageError::InvalidData(format!("failed to encode log line: {e}")))?;
        bytes.push(b'\n');

        let len = self.sink.size()?;
        if let Err(e) = self.sink.write_all(&bytes).and_then(|()| self.sink.flush()) {
            if let Err(truncate) = self.sink.truncate(len) {
                warn!(
                    path = %self.path.display(),
                    error = %truncate,
                    "failed to discard partial log line"
                );
            }
            return Err(e.into());
        }
        trace!(path = %self.path.display(), short_id = %line.id, "appended log line");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct State {
    links: HashMap<ShortId, Entry>,
    /// Ids per owner in insertion order.
    owners: HashMap<UserId, Vec<ShortId>>,
    last_user_id: UserId,
    log: Option<AppendLog>,
}

impl State {
    /// Inserts unless the id is taken. Same URL is a no-op, a different URL
    /// is a conflict. The log is written before memory is touched.
    fn insert(&mut self, id: &ShortId, original_url: &str, owner: UserId) -> Result<()> {
        if let Some(existing) = self.links.get(id) {
            if existing.original_url == original_url {
                trace!(short_id = %id, "url already stored");
                return Ok(());
            }
            debug!(short_id = %id, "short id taken by a different url");
            return Err(StorageError::Conflict(id.clone()));
        }

        if let Some(log) = self.log.as_mut() {
            log.append(&LogLine {
                id: id.clone(),
                original_url: original_url.to_owned(),
                owner: Some(owner),
                deleted: false,
            })?;
        }

        self.links.insert(
            id.clone(),
            Entry {
                original_url: original_url.to_owned(),
                owner,
                deleted: false,
            },
        );
        self.owners.entry(owner).or_default().push(id.clone());
        self.last_user_id = self.last_user_id.max(owner);
        debug!(short_id = %id, owner, "stored link");
        Ok(())
    }

    fn tombstone(&mut self, owner: UserId, id: &ShortId) -> Result<()> {
        let Some(entry) = self.links.get(id) else {
            return Ok(());
        };
        if entry.owner != owner || entry.deleted {
            return Ok(());
        }

        if let Some(log) = self.log.as_mut() {
            log.append(&LogLine {
                id: id.clone(),
                original_url: entry.original_url.clone(),
                owner: Some(owner),
                deleted: true,
            })?;
        }

        if let Some(entry) = self.links.get_mut(id) {
            entry.deleted = true;
        }
        debug!(short_id = %id, owner, "tombstoned link");
        Ok(())
    }

    /// Applies a replayed log line. Later lines win over earlier ones.
    fn replay(&mut self, line: LogLine) {
        let owner = line.owner.unwrap_or(0);

        if let Some(previous) = self.links.get(&line.id) {
            if previous.owner != owner {
                if let Some(ids) = self.owners.get_mut(&previous.owner) {
                    ids.retain(|id| id != &line.id);
                }
                self.owners.entry(owner).or_default().push(line.id.clone());
            }
        } else {
            self.owners.entry(owner).or_default().push(line.id.clone());
        }

        self.last_user_id = self.last_user_id.max(owner);
        self.links.insert(
            line.id,
            Entry {
                original_url: line.original_url,
                owner,
                deleted: line.deleted,
            },
        );
    }
}

/// Map-backed implementation of the [`Repository`] trait.
///
/// All state sits behind a single lock; every mutation holds the write
/// half for its whole duration. When opened from a file, each insert and
/// each tombstone is appended to it as one JSON line, and the file is
/// replayed on the next open. Mutations that write the file run on the
/// blocking pool.
#[derive(Debug)]
pub struct InMemoryRepository {
    state: Arc<RwLock<State>>,
    generator: ShortIdGenerator,
    persistent: bool,
}

impl InMemoryRepository {
    /// Creates a repository without file persistence.
    pub fn new(generator: ShortIdGenerator) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            generator,
            persistent: false,
        }
    }

    /// Opens a file-backed repository, creating the file if missing and
    /// replaying it line by line.
    pub fn open(path: impl AsRef<Path>, generator: ShortIdGenerator) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut state = State::default();
        let mut replayed = 0usize;
        for (index, line) in BufReader::new(&file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: LogLine = serde_json::from_str(&line).map_err(|e| {
                StorageError::InvalidData(format!(
                    "{}:{}: malformed log line: {e}",
                    path.display(),
                    index + 1
                ))
            })?;
            state.replay(parsed);
            replayed += 1;
        }

        info!(
            path = %path.display(),
            lines = replayed,
            links = state.links.len(),
            "replayed link log"
        );

        state.log = Some(AppendLog {
            path,
            sink: Box::new(file),
        });

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            generator,
            persistent: true,
        })
    }

    pub fn generator(&self) -> ShortIdGenerator {
        self.generator
    }

    /// Runs a mutation under the write lock, on the blocking pool when it
    /// may touch the log file.
    async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut State) -> Result<T> + Send + 'static,
    {
        if !self.persistent {
            return f(&mut *self.state.write());
        }

        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || f(&mut *state.write()))
            .await
            .map_err(|e| StorageError::Io(format!("log writer task failed: {e}")))?
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new(ShortIdGenerator::default())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn add(&self, original_url: &str, owner: UserId) -> Result<ShortId> {
        let id = self.generator.generate(original_url);
        let original_url = original_url.to_owned();
        self.mutate(move |state| {
            state.insert(&id, &original_url, owner)?;
            Ok(id)
        })
        .await
    }

    async fn add_batch(&self, items: &[BatchItem], owner: UserId) -> Result<Vec<BatchEntry>> {
        if items.is_empty() {
            return Err(StorageError::EmptyRequest);
        }

        let generator = self.generator;
        let items = items.to_vec();
        self.mutate(move |state| {
            let mut entries = Vec::with_capacity(items.len());
            for item in items {
                let id = generator.generate(&item.original_url);
                match state.insert(&id, &item.original_url, owner) {
                    Ok(()) => entries.push(BatchEntry {
                        correlation_id: item.correlation_id,
                        short_id: id,
                    }),
                    Err(StorageError::Conflict(_)) => {
                        debug!(correlation_id = %item.correlation_id, short_id = %id, "skipping conflicting batch item");
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(entries)
        })
        .await
    }

    async fn get(&self, id: &ShortId) -> Result<String> {
        let state = self.state.read();
        match state.links.get(id) {
            None => Err(StorageError::NotFound(id.clone())),
            Some(entry) if entry.deleted => Err(StorageError::Deleted(id.clone())),
            Some(entry) => Ok(entry.original_url.clone()),
        }
    }

    async fn user_links(&self, owner: UserId) -> Result<Vec<LinkRecord>> {
        let state = self.state.read();
        let Some(ids) = state.owners.get(&owner) else {
            return Ok(Vec::new());
        };

        let records = ids
            .iter()
            .filter_map(|id| {
                let entry = state.links.get(id)?;
                (!entry.deleted).then(|| LinkRecord {
                    short_id: id.clone(),
                    original_url: entry.original_url.clone(),
                    owner,
                    deleted: false,
                })
            })
            .collect();
        Ok(records)
    }

    async fn new_user(&self) -> Result<UserId> {
        let mut state = self.state.write();
        let id = state
            .last_user_id
            .checked_add(1)
            .ok_or_else(|| StorageError::InvalidData("user id space exhausted".to_string()))?;
        state.last_user_id = id;
        state.owners.entry(id).or_default();
        debug!(user_id = id, "allocated user");
        Ok(id)
    }

    async fn delete_batch(&self, owner: UserId, ids: &[ShortId]) -> Result<()> {
        if ids.is_empty() {
            return Err(StorageError::EmptyRequest);
        }

        let ids = ids.to_vec();
        self.mutate(move |state| {
            for id in &ids {
                state.tombstone(owner, id)?;
            }
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> Result<Stats> {
        let state = self.state.read();
        Ok(Stats {
            urls: state.links.values().filter(|e| !e.deleted).count() as u64,
            users: state.owners.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract;
    use std::sync::Mutex;

    /// In-memory sink that refuses to grow past `capacity` bytes, writing
    /// as much of a buffer as fits first.
    struct CappedSink {
        data: Arc<Mutex<Vec<u8>>>,
        capacity: usize,
    }

    impl Write for CappedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut data = self.data.lock().unwrap();
            let room = self.capacity - data.len();
            if room == 0 {
                return Err(std::io::Error::other("file too large"));
            }
            let n = room.min(buf.len());
            data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogSink for CappedSink {
        fn size(&self) -> std::io::Result<u64> {
            Ok(self.data.lock().unwrap().len() as u64)
        }

        fn truncate(&mut self, len: u64) -> std::io::Result<()> {
            self.data.lock().unwrap().truncate(len as usize);
            Ok(())
        }
    }

    fn repo() -> InMemoryRepository {
        InMemoryRepository::default()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn satisfies_contract() {
        contract::run_all(|generator| async move { InMemoryRepository::new(generator) }).await;
    }

    #[tokio::test]
    async fn new_user_skips_owner_ids_already_in_use() {
        let repo = repo();
        repo.add("https://example.com", 7).await.unwrap();

        assert_eq!(repo.new_user().await.unwrap(), 8);
        assert_eq!(repo.new_user().await.unwrap(), 9);
    }

    #[tokio::test]
    async fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.jsonl");

        let id = {
            let repo = InMemoryRepository::open(&path, ShortIdGenerator::default()).unwrap();
            repo.add("https://example.com", 1).await.unwrap()
        };

        let reopened = InMemoryRepository::open(&path, ShortIdGenerator::default()).unwrap();
        assert_eq!(reopened.get(&id).await.unwrap(), "https://example.com");
        assert_eq!(reopened.user_links(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn log_lines_use_the_documented_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.jsonl");

        let repo = InMemoryRepository::open(&path, ShortIdGenerator::default()).unwrap();
        let id = repo.add("https://example.com", 3).await.unwrap();
        drop(repo);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);

        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["id"], id.as_str());
        assert_eq!(value["original_url"], "https://example.com");
        assert_eq!(value["owner"], 3);
        assert!(value.get("deleted").is_none());
    }

    #[tokio::test]
    async fn repeated_add_does_not_grow_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.jsonl");

        let repo = InMemoryRepository::open(&path, ShortIdGenerator::default()).unwrap();
        repo.add("https://example.com", 1).await.unwrap();
        repo.add("https://example.com", 1).await.unwrap();
        drop(repo);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn tombstones_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.jsonl");

        let id = {
            let repo = InMemoryRepository::open(&path, ShortIdGenerator::default()).unwrap();
            let id = repo.add("https://example.com", 1).await.unwrap();
            repo.delete_batch(1, &[id.clone()]).await.unwrap();
            id
        };

        let reopened = InMemoryRepository::open(&path, ShortIdGenerator::default()).unwrap();
        assert!(matches!(
            reopened.get(&id).await.unwrap_err(),
            StorageError::Deleted(_)
        ));
        assert!(reopened.user_links(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replays_lines_without_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.jsonl");
        std::fs::write(
            &path,
            "{\"id\":\"abcd\",\"original_url\":\"https://legacy.example\"}\n\n",
        )
        .unwrap();

        let repo = InMemoryRepository::open(&path, ShortIdGenerator::default()).unwrap();
        assert_eq!(
            repo.get(&ShortId::new("abcd")).await.unwrap(),
            "https://legacy.example"
        );
        assert_eq!(repo.new_user().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replay_is_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"id\":\"abcd\",\"original_url\":\"https://first.example\",\"owner\":1}\n",
                "{\"id\":\"abcd\",\"original_url\":\"https://second.example\",\"owner\":2}\n",
            ),
        )
        .unwrap();

        let repo = InMemoryRepository::open(&path, ShortIdGenerator::default()).unwrap();
        assert_eq!(
            repo.get(&ShortId::new("abcd")).await.unwrap(),
            "https://second.example"
        );
        assert!(repo.user_links(1).await.unwrap().is_empty());
        assert_eq!(repo.user_links(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_log_line_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.jsonl");
        std::fs::write(&path, "{\"id\":\"abcd\"}\nnot json\n").unwrap();

        let err = InMemoryRepository::open(&path, ShortIdGenerator::default()).unwrap_err();
        match err {
            StorageError::InvalidData(message) => assert!(message.contains(":1:")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_adds_of_same_url_store_one_record() {
        let repo = Arc::new(repo());
        let mut handles = vec![];

        for owner in 1..=10u64 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                repo.add("https://example.com", owner).await.unwrap()
            }));
        }

        let mut ids = vec![];
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(repo.stats().await.unwrap().urls, 1);
    }

    #[tokio::test]
    async fn failed_append_leaves_no_partial_line() {
        let data = Arc::new(Mutex::new(Vec::new()));
        let mut state = State {
            log: Some(AppendLog {
                path: PathBuf::from("capped.jsonl"),
                sink: Box::new(CappedSink {
                    data: Arc::clone(&data),
                    capacity: 256,
                }),
            }),
            ..Default::default()
        };

        state
            .insert(&ShortId::new("aaaa"), "https://a.example", 1)
            .unwrap();
        let big = format!("https://big.example/{}", "x".repeat(4096));
        let err = state.insert(&ShortId::new("bbbb"), &big, 1).unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(!state.links.contains_key(&ShortId::new("bbbb")));

        // The space taken by the torn line is released again.
        state
            .insert(&ShortId::new("cccc"), "https://c.example", 1)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.jsonl");
        std::fs::write(&path, data.lock().unwrap().as_slice()).unwrap();

        let reopened = InMemoryRepository::open(&path, ShortIdGenerator::default()).unwrap();
        assert_eq!(
            reopened.get(&ShortId::new("aaaa")).await.unwrap(),
            "https://a.example"
        );
        assert_eq!(
            reopened.get(&ShortId::new("cccc")).await.unwrap(),
            "https://c.example"
        );
        assert!(matches!(
            reopened.get(&ShortId::new("bbbb")).await.unwrap_err(),
            StorageError::NotFound(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn file_backed_adds_from_many_tasks_are_all_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.jsonl");
        let generator = ShortIdGenerator::new(16).unwrap();
        let repo = Arc::new(InMemoryRepository::open(&path, generator).unwrap());

        let mut handles = vec![];
        for i in 0..32u64 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                repo.add(&format!("https://task.example/{i}"), i + 1)
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        drop(repo);

        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 32);
        let reopened = InMemoryRepository::open(&path, generator).unwrap();
        assert_eq!(reopened.stats().await.unwrap().urls, 32);
    }
}
