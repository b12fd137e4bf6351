use std::{
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use futures::{
    stream::{self, BoxStream},
    StreamExt,
};
use keystore_core::storage::SlotStoreError;
use redis::{aio::ConnectionManager, AsyncCommands};
use thiserror::Error;
use tracing::debug;

/// Errors raised by the store client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KvError {
    #[error("client closed")]
    Closed,
    #[error("store request failed: {0}")]
    Request(String),
}

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        KvError::Request(err.to_string())
    }
}

impl From<KvError> for SlotStoreError {
    fn from(err: KvError) -> Self {
        SlotStoreError::connection(err)
    }
}

/// Lazy, finite sequence of key batches produced by a cursor scan.
/// Dropping the stream abandons the cursor.
pub type KeyBatchStream = BoxStream<'static, Result<Vec<String>, KvError>>;

/// Native primitives of the remote key-value store.
///
/// Handles are cheap to clone and safe to use concurrently; the backend adds no
/// synchronization of its own around them.
#[async_trait]
pub trait KvClient: Clone + Send + Sync + 'static {
    async fn set(&self, key: &str, value: String) -> Result<(), KvError>;

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Returns the number of keys removed.
    async fn del(&self, key: &str) -> Result<u64, KvError>;

    /// Returns the number of matching keys.
    async fn exists(&self, key: &str) -> Result<u64, KvError>;

    /// Cursor scan over keys matching a glob `pattern`, `count` being a batch size hint.
    fn scan_match(&self, pattern: &str, count: usize) -> KeyBatchStream;

    /// Drop the connection without waiting for in-flight requests.
    async fn disconnect(&self);
}


/// Handle shared by every clone of a client. Releasing it closes the handle
/// for all clones at once, including ones held by detached tasks.
#[derive(Debug)]
struct SharedConnection<T> {
    slot: Arc<RwLock<Option<T>>>,
}

impl<T> Clone for SharedConnection<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Clone> SharedConnection<T> {
    fn new(conn: T) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Some(conn))),
        }
    }

    fn get(&self) -> Result<T, KvError> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(KvError::Closed)
    }

    fn release(&self) -> Option<T> {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Page through a cursor scan, starting at cursor 0 and stopping once `fetch`
/// returns cursor 0. A fetch error ends the stream after yielding the error.
pub(crate) fn paged_scan<F, Fut>(fetch: F) -> KeyBatchStream
where
    F: FnMut(u64) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(u64, Vec<String>), KvError>> + Send + 'static,
{
    // `None` once the server hands back cursor 0.
    stream::try_unfold((fetch, Some(0u64)), |(mut fetch, cursor)| async move {
        let Some(cursor) = cursor else {
            return Ok::<_, KvError>(None);
        };
        let (next, keys) = fetch(cursor).await?;
        Ok(Some((keys, (fetch, (next != 0).then_some(next)))))
    })
    .boxed()
}

/// `KvClient` over a multiplexed, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisClient {
    conn: SharedConnection<ConnectionManager>,
}

impl RedisClient {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        debug!("connected to redis");
        Ok(Self::from_manager(manager))
    }

    /// Wrap an existing manager. `disconnect` only closes this client and its
    /// clones; other clones of `manager` held by the caller stay usable.
    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self {
            conn: SharedConnection::new(manager),
        }
    }
}

async fn scan_page(
    con: &mut ConnectionManager,
    cursor: u64,
    pattern: &str,
    count: usize,
) -> Result<(u64, Vec<String>), KvError> {
    let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
        .arg(cursor)
        .arg("MATCH")
        .arg(pattern)
        .arg("COUNT")
        .arg(count)
        .query_async(con)
        .await?;
    Ok((next, keys))
}

#[async_trait]
impl KvClient for RedisClient {
    async fn set(&self, key: &str, value: String) -> Result<(), KvError> {
        let mut con = self.conn.get()?;
        let _: () = con.set(key, value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut con = self.conn.get()?;
        let value: Option<String> = con.get(key).await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<u64, KvError> {
        let mut con = self.conn.get()?;
        let removed: u64 = con.del(key).await?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<u64, KvError> {
        let mut con = self.conn.get()?;
        let count: u64 = con.exists(key).await?;
        Ok(count)
    }

    fn scan_match(&self, pattern: &str, count: usize) -> KeyBatchStream {
        let pattern = pattern.to_string();
        // Redis rejects `COUNT 0`.
        let count = count.max(1);
        let conn = self.conn.clone();
        paged_scan(move |cursor| {
            let conn = conn.clone();
            let pattern = pattern.clone();
            async move {
                let mut con = conn.get()?;
                scan_page(&mut con, cursor, &pattern, count).await
            }
        })
    }

    async fn disconnect(&self) {
        // Requests that already cloned the manager finish on their own.
        if self.conn.release().is_some() {
            debug!("released redis connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use futures::TryStreamExt;

    use super::*;

    /// Scan whose pages come from a fixed script; counts fetches.
    fn scripted_scan(
        pages: Vec<Result<(u64, Vec<String>), KvError>>,
    ) -> (KeyBatchStream, Arc<AtomicUsize>, Arc<Mutex<Vec<u64>>>) {
        let pages = Arc::new(Mutex::new(VecDeque::from(pages)));
        let fetches = Arc::new(AtomicUsize::new(0));
        let cursors = Arc::new(Mutex::new(Vec::new()));
        let (seen_fetches, seen_cursors) = (Arc::clone(&fetches), Arc::clone(&cursors));
        let scan = paged_scan(move |cursor| {
            fetches.fetch_add(1, Ordering::SeqCst);
            cursors.lock().unwrap().push(cursor);
            let page = pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(KvError::Request("fetched past the end".into())));
            async move { page }
        });
        (scan, seen_fetches, seen_cursors)
    }

    #[tokio::test]
    async fn scan_follows_cursor_until_zero() {
        let (scan, fetches, cursors) = scripted_scan(vec![
            Ok((7, vec![])),
            Ok((3, vec!["a".into()])),
            Ok((0, vec!["b".into()])),
        ]);

        let batches: Vec<Vec<String>> = scan.try_collect().await.expect("scan");

        assert_eq!(batches, vec![vec![], vec!["a".to_string()], vec!["b".to_string()]]);
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
        assert_eq!(*cursors.lock().unwrap(), vec![0, 7, 3]);
    }

    #[tokio::test]
    async fn single_page_scan_fetches_once() {
        let (scan, fetches, _) = scripted_scan(vec![Ok((0, vec![]))]);

        let batches: Vec<Vec<String>> = scan.try_collect().await.expect("scan");

        assert_eq!(batches, vec![Vec::<String>::new()]);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_error_ends_the_scan() {
        let (mut scan, fetches, _) = scripted_scan(vec![
            Ok((5, vec!["a".into()])),
            Err(KvError::Request("cursor lost".into())),
            Ok((0, vec!["b".into()])),
        ]);

        assert_eq!(scan.next().await, Some(Ok(vec!["a".to_string()])));
        assert_eq!(
            scan.next().await,
            Some(Err(KvError::Request("cursor lost".into())))
        );
        assert_eq!(scan.next().await, None);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn released_connection_is_closed_for_every_clone() {
        let conn = SharedConnection::new(42u32);
        let held = conn.clone();
        assert_eq!(held.get(), Ok(42));

        assert_eq!(conn.release(), Some(42));
        drop(conn);

        assert_eq!(held.get(), Err(KvError::Closed));
        assert_eq!(held.release(), None);
    }

    #[test]
    fn poisoned_connection_can_still_be_released() {
        let conn = SharedConnection::new(7u32);
        let slot = Arc::clone(&conn.slot);
        let _ = std::thread::spawn(move || {
            let _guard = slot.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert_eq!(conn.get(), Ok(7));
        assert_eq!(conn.release(), Some(7));
        assert_eq!(conn.get(), Err(KvError::Closed));
    }

    /// Runs against a live server: `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn live_disconnect_closes_every_clone() -> anyhow::Result<()> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let client = RedisClient::connect(&url).await?;
        let held = client.clone();
        assert_eq!(held.exists("{keystore-live:missing}").await?, 0);

        client.disconnect().await;
        drop(client);

        assert_eq!(
            held.set("{keystore-live:k}", "dg==".into()).await,
            Err(KvError::Closed)
        );
        let mut scan = held.scan_match("{keystore-live:*", 10);
        assert_eq!(scan.next().await, Some(Err(KvError::Closed)));
        Ok(())
    }
}
