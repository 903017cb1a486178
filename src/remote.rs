//! Remote document service: one document per user, always fully overwritten.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
#[cfg(test)]
use std::time::Duration;

use serde_json::Value;

use crate::error::{JournalError, Result};
use crate::models::{Payload, Snapshot};

pub type Callback = Box<dyn Fn(Option<Payload>) + Send + Sync>;

pub trait RemoteDocs: Send + Sync {
    /// Replace the user's document. Either fully applied or not at all.
    fn write(&self, user_id: &str, snapshot: &Snapshot) -> Result<()>;

    fn read(&self, user_id: &str) -> Result<Option<Payload>>;

    /// Deliver the current document now and every later change, in write
    /// order, until the returned handle is dropped.
    fn subscribe(&self, user_id: &str, callback: Callback) -> Subscription;
}

/// Live subscription handle. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriber registry shared by both implementations
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_user: HashMap<String, Vec<(u64, Arc<Callback>)>>,
}

#[derive(Clone, Default)]
struct Subscribers {
    inner: Arc<Mutex<Registry>>,
}

impl Subscribers {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add(&self, user_id: &str, callback: Callback) -> (u64, Arc<Callback>) {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        let callback = Arc::new(callback);
        registry
            .by_user
            .entry(user_id.to_string())
            .or_default()
            .push((id, Arc::clone(&callback)));
        (id, callback)
    }

    fn handle(&self, user_id: &str, id: u64) -> Subscription {
        let subscribers = self.clone();
        let user_id = user_id.to_string();
        Subscription::new(move || {
            let mut registry = subscribers.lock();
            if let Some(list) = registry.by_user.get_mut(&user_id) {
                list.retain(|(sid, _)| *sid != id);
            }
        })
    }

    fn notify(&self, user_id: &str, payload: Option<Payload>) {
        let callbacks: Vec<Arc<Callback>> = self
            .lock()
            .by_user
            .get(user_id)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(payload.clone());
        }
    }

    #[cfg(test)]
    fn count(&self, user_id: &str) -> usize {
        self.lock().by_user.get(user_id).map_or(0, Vec::len)
    }
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

/// In-process document store with fault injection.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryRemote {
    docs: Mutex<HashMap<String, Value>>,
    subscribers: Subscribers,
    failing: AtomicBool,
    fail_next: AtomicUsize,
    latency_ms: AtomicUsize,
    writes: AtomicUsize,
}

#[cfg(test)]
impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until turned off again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as usize, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn document(&self, user_id: &str) -> Option<Value> {
        self.lock_docs().get(user_id).cloned()
    }

    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.subscribers.count(user_id)
    }

    /// Store an arbitrary document, as another client might, and notify.
    pub fn put_raw(&self, user_id: &str, value: Value) {
        let mut docs = self.lock_docs();
        docs.insert(user_id.to_string(), value.clone());
        self.subscribers.notify(user_id, Payload::from_value(value));
    }

    fn lock_docs(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn should_fail(&self) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[cfg(test)]
impl RemoteDocs for MemoryRemote {
    fn write(&self, user_id: &str, snapshot: &Snapshot) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            std::thread::sleep(Duration::from_millis(latency as u64));
        }
        if self.should_fail() {
            return Err(JournalError::Remote("network unavailable".to_string()));
        }
        let value = serde_json::to_value(snapshot)?;
        self.put_raw(user_id, value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&self, user_id: &str) -> Result<Option<Payload>> {
        Ok(self.document(user_id).and_then(Payload::from_value))
    }

    fn subscribe(&self, user_id: &str, callback: Callback) -> Subscription {
        let docs = self.lock_docs();
        let (id, callback) = self.subscribers.add(user_id, callback);
        let current = docs.get(user_id).cloned().and_then(Payload::from_value);
        callback(current);
        drop(docs);
        self.subscribers.handle(user_id, id)
    }
}

// ---------------------------------------------------------------------------
// Directory-backed
// ---------------------------------------------------------------------------

/// Documents kept as `<root>/<user>.json`. Several local data directories
/// pointed at one root behave like several devices sharing a cloud account.
pub struct DirRemote {
    root: PathBuf,
    write_lock: Mutex<()>,
    subscribers: Subscribers,
}

impl DirRemote {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            write_lock: Mutex::new(()),
            subscribers: Subscribers::default(),
        }
    }

    fn doc_path(&self, user_id: &str) -> PathBuf {
        let safe: String = user_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{safe}.json"))
    }

    fn read_doc(&self, user_id: &str) -> Result<Option<Payload>> {
        let path = self.doc_path(user_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| JournalError::Remote(format!("{}: {e}", path.display())))?;
        match serde_json::from_str::<Value>(&content) {
            Ok(value) => Ok(Payload::from_value(value)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable remote document");
                Ok(None)
            }
        }
    }
}

impl RemoteDocs for DirRemote {
    fn write(&self, user_id: &str, snapshot: &Snapshot) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let remote_err = |e: std::io::Error| JournalError::Remote(e.to_string());
        std::fs::create_dir_all(&self.root).map_err(remote_err)?;
        let path = self.doc_path(user_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&tmp, format!("{json}\n")).map_err(remote_err)?;
        std::fs::rename(&tmp, &path).map_err(remote_err)?;
        self.subscribers.notify(user_id, Some(Payload::from(snapshot)));
        Ok(())
    }

    fn read(&self, user_id: &str) -> Result<Option<Payload>> {
        self.read_doc(user_id)
    }

    fn subscribe(&self, user_id: &str, callback: Callback) -> Subscription {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (id, callback) = self.subscribers.add(user_id, callback);
        let current = self.read_doc(user_id).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "initial remote read failed");
            None
        });
        callback(current);
        self.subscribers.handle(user_id, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::factory_snapshot;
    use chrono::Utc;

    fn collector() -> (Arc<Mutex<Vec<Option<Payload>>>>, Callback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: Callback = Box::new(move |p| sink.lock().unwrap().push(p));
        (seen, callback)
    }

    #[test]
    fn test_memory_write_then_read() {
        let remote = MemoryRemote::new();
        let snapshot = factory_snapshot(Utc::now());
        remote.write("u1", &snapshot).unwrap();
        let payload = remote.read("u1").unwrap().unwrap();
        assert_eq!(payload.strategies.unwrap().len(), 3);
        assert!(remote.read("u2").unwrap().is_none());
        assert_eq!(remote.write_count(), 1);
    }

    #[test]
    fn test_memory_subscribe_delivers_current_then_changes() {
        let remote = MemoryRemote::new();
        let (seen, callback) = collector();
        let sub = remote.subscribe("u1", callback);
        remote.write("u1", &factory_snapshot(Utc::now())).unwrap();
        remote.write("u2", &factory_snapshot(Utc::now())).unwrap();
        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert!(seen[0].is_none());
            assert!(seen[1].is_some());
        }
        drop(sub);
        assert_eq!(remote.subscriber_count("u1"), 0);
        remote.write("u1", &factory_snapshot(Utc::now())).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_memory_failure_injection() {
        let remote = MemoryRemote::new();
        remote.fail_next_writes(1);
        assert!(remote.write("u1", &factory_snapshot(Utc::now())).is_err());
        assert!(remote.document("u1").is_none());
        assert!(remote.write("u1", &factory_snapshot(Utc::now())).is_ok());
    }

    #[test]
    fn test_dir_remote_roundtrip_and_notify() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DirRemote::new(&dir.path().join("cloud"));
        let (seen, callback) = collector();
        let _sub = remote.subscribe("alice@example.com", callback);
        remote.write("alice@example.com", &factory_snapshot(Utc::now())).unwrap();
        let payload = remote.read("alice@example.com").unwrap().unwrap();
        assert_eq!(payload.accounts.unwrap()[0].id, "main");
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(dir.path().join("cloud").join("alice_example_com.json").exists());
    }

    #[test]
    fn test_dir_remote_ignores_garbage_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bob.json"), "{{{").unwrap();
        let remote = DirRemote::new(dir.path());
        assert!(remote.read("bob").unwrap().is_none());
    }
}
