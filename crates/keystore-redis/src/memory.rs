use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use futures::{stream, StreamExt};

use crate::client::{KeyBatchStream, KvClient, KvError};

/// In-process `KvClient` for tests and smoke runs.
///
/// Clones share state, like clones of a pooled network handle. Scans take a
/// snapshot of the matching keys when they start and can be told to stall
/// forever after their last batch to simulate a cursor that never completes.
#[derive(Debug, Default, Clone)]
pub struct MemoryKv {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<BTreeMap<String, String>>,
    closed: AtomicBool,
    stall_scans: AtomicBool,
    fail_deletes: AtomicBool,
    fail_scans: AtomicBool,
    open_scans: AtomicUsize,
    deletes: AtomicUsize,
}

/// Counts a scan as open until its stream is dropped.
struct ScanGuard(Arc<Inner>);

impl ScanGuard {
    fn new(inner: Arc<Inner>) -> Self {
        inner.open_scans.fetch_add(1, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.0.open_scans.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans yield their batches, then never signal completion.
    pub fn stall_scans(&self, stall: bool) {
        self.inner.stall_scans.store(stall, Ordering::SeqCst);
    }

    /// Every `del` fails with a request error.
    pub fn fail_deletes(&self, fail: bool) {
        self.inner.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Scans fail with a request error after their first batch.
    pub fn fail_scans(&self, fail: bool) {
        self.inner.fail_scans.store(fail, Ordering::SeqCst);
    }

    /// Scan streams that have been opened and not yet dropped.
    pub fn open_scans(&self) -> usize {
        self.inner.open_scans.load(Ordering::SeqCst)
    }

    /// Number of `del` calls that reached the store, whether or not a key was removed.
    pub fn delete_count(&self) -> usize {
        self.inner.deletes.load(Ordering::SeqCst)
    }

    /// Raw stored value, bypassing the slot layer.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>, KvError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(KvError::Closed);
        }
        self.inner
            .entries
            .lock()
            .map_err(|err| KvError::Request(format!("lock poisoned: {err}")))
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn set(&self, key: &str, value: String) -> Result<(), KvError> {
        self.entries()?.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.entries()?.get(key).cloned())
    }

    async fn del(&self, key: &str) -> Result<u64, KvError> {
        let mut entries = self.entries()?;
        self.inner.deletes.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_deletes.load(Ordering::SeqCst) {
            return Err(KvError::Request("delete rejected".to_string()));
        }
        Ok(u64::from(entries.remove(key).is_some()))
    }

    async fn exists(&self, key: &str) -> Result<u64, KvError> {
        Ok(u64::from(self.entries()?.contains_key(key)))
    }

    fn scan_match(&self, pattern: &str, count: usize) -> KeyBatchStream {
        let snapshot: Vec<String> = match self.entries() {
            Ok(entries) => entries
                .keys()
                .filter(|key| glob_match(pattern, key))
                .cloned()
                .collect(),
            Err(err) => return stream::once(async move { Err(err) }).boxed(),
        };

        let batches: Vec<Result<Vec<String>, KvError>> = snapshot
            .chunks(count.max(1))
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        let guard = ScanGuard::new(Arc::clone(&self.inner));

        let body: KeyBatchStream = if self.inner.fail_scans.load(Ordering::SeqCst) {
            let first = batches.into_iter().take(1);
            let failure = Err(KvError::Request("scan cursor lost".to_string()));
            stream::iter(first.chain(std::iter::once(failure))).boxed()
        } else if self.inner.stall_scans.load(Ordering::SeqCst) {
            stream::iter(batches).chain(stream::pending()).boxed()
        } else {
            stream::iter(batches).boxed()
        };

        body.map(move |batch| {
            let _open = &guard;
            batch
        })
        .boxed()
    }

    async fn disconnect(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

/// Redis-style glob supporting `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(&'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;

    #[test]
    fn glob_matches_prefix_patterns() {
        assert!(glob_match("{ns1:*", "{ns1:A}"));
        assert!(glob_match("{ns1:*", "{ns1:}"));
        assert!(!glob_match("{ns1:*", "{ns2:A}"));
        assert!(!glob_match("{ns1:*", "{ns10"));
        assert!(glob_match("a?c*", "abcdef"));
        assert!(glob_match("*:x", "a:b:x"));
    }

    #[tokio::test]
    async fn scan_batches_respect_count() {
        let kv = MemoryKv::new();
        for i in 0..5 {
            kv.set(&format!("{{ns:{i}}}"), "v".into()).await.unwrap();
        }
        kv.set("{other:0}", "v".into()).await.unwrap();

        let batches: Vec<Vec<String>> = kv.scan_match("{ns:*", 2).try_collect().await.unwrap();
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_eq!(kv.open_scans(), 0);
    }

    #[tokio::test]
    async fn open_scans_tracks_live_streams() {
        let kv = MemoryKv::new();
        let scan = kv.scan_match("*", 10);
        assert_eq!(kv.open_scans(), 1);
        drop(scan);
        assert_eq!(kv.open_scans(), 0);
    }

    #[tokio::test]
    async fn disconnect_is_shared_by_clones() {
        let kv = MemoryKv::new();
        let clone = kv.clone();
        kv.disconnect().await;
        assert_eq!(clone.get("k").await, Err(KvError::Closed));
    }
}
