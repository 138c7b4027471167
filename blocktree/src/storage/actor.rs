//! Single-writer actor around a [`Store`].
//!
//! The store is moved onto a dedicated thread that executes requests one
//! at a time in arrival order. Async callers talk to it through cloneable
//! [`StoreHandle`]s; each request carries a oneshot channel for its reply.
//!
//! The thread exits after a `close` request or once every handle has been
//! dropped, closing the store on the way out.

use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};

use crate::storage::btree::{InsertOutcome, Key, RemoveOutcome, SearchResult};
use crate::storage::device::BlockDevice;
use crate::storage::error::StoreError;
use crate::storage::store::Store;

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

#[derive(Debug)]
enum Request {
    Insert { key: Key, reply: Reply<InsertOutcome> },
    Remove { key: Key, reply: Reply<RemoveOutcome> },
    Search { key: Key, reply: Reply<SearchResult> },
    Keys { reply: Reply<Vec<Key>> },
    Close { reply: Reply<()> },
}

/// Cloneable async handle to a store running on its own thread.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    requests: mpsc::UnboundedSender<Request>,
}

impl StoreHandle {
    /// Move `store` onto a new thread and return a handle to it.
    ///
    /// The join handle resolves once the store has been closed.
    pub fn spawn<D>(store: Store<D>) -> (Self, JoinHandle<()>)
    where
        D: BlockDevice + Send + 'static,
    {
        let (requests, receiver) = mpsc::unbounded_channel();
        let worker = std::thread::spawn(move || serve(store, receiver));
        (Self { requests }, worker)
    }

    pub async fn insert(&self, key: Key) -> Result<InsertOutcome, StoreError> {
        self.call(|reply| Request::Insert { key, reply }).await
    }

    pub async fn remove(&self, key: Key) -> Result<RemoveOutcome, StoreError> {
        self.call(|reply| Request::Remove { key, reply }).await
    }

    pub async fn search(&self, key: Key) -> Result<SearchResult, StoreError> {
        self.call(|reply| Request::Search { key, reply }).await
    }

    pub async fn keys(&self) -> Result<Vec<Key>, StoreError> {
        self.call(|reply| Request::Keys { reply }).await
    }

    /// Close the store. Requests sent after this fail with `ActorClosed`.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.call(|reply| Request::Close { reply }).await
    }

    async fn call<T, F>(&self, make_request: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnOnce(Reply<T>) -> Request + Send,
    {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(make_request(reply))
            .map_err(|_| StoreError::ActorClosed)?;
        response.await.map_err(|_| StoreError::ActorClosed)?
    }
}

fn serve<D: BlockDevice>(mut store: Store<D>, mut requests: mpsc::UnboundedReceiver<Request>) {
    tracing::debug!("store actor started");

    // A dropped receiver just means the caller stopped waiting
    while let Some(request) = requests.blocking_recv() {
        match request {
            Request::Insert { key, reply } => {
                let _ = reply.send(store.insert(key));
            }
            Request::Remove { key, reply } => {
                let _ = reply.send(store.remove(key));
            }
            Request::Search { key, reply } => {
                let _ = reply.send(store.search(key));
            }
            Request::Keys { reply } => {
                let _ = reply.send(store.keys());
            }
            Request::Close { reply } => {
                let _ = reply.send(store.close());
                tracing::debug!("store actor stopped on request");
                return;
            }
        }
    }

    if let Err(e) = store.close() {
        tracing::error!(error = %e, "failed to close store after last handle dropped");
    }
    tracing::debug!("store actor stopped, all handles dropped");
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::storage::memory::MemoryDevice;
    use crate::storage::store::StoreOptions;

    fn memory_store() -> Store<MemoryDevice> {
        Store::with_device(MemoryDevice::new(4), StoreOptions::default()).expect("create")
    }

    #[tokio::test]
    async fn test_requests_are_served() {
        let (handle, worker) = StoreHandle::spawn(memory_store());

        assert_eq!(handle.insert(3).await.expect("insert"), InsertOutcome::Inserted);
        assert_eq!(handle.insert(3).await.expect("insert"), InsertOutcome::Duplicate);
        assert_eq!(handle.insert(1).await.expect("insert"), InsertOutcome::Inserted);
        assert!(handle.search(1).await.expect("search").found);
        assert_eq!(handle.remove(3).await.expect("remove"), RemoveOutcome::Removed);
        assert_eq!(handle.keys().await.expect("keys"), vec![1]);

        handle.close().await.expect("close");
        worker.join().expect("worker panicked");
    }

    #[tokio::test]
    async fn test_requests_after_close_fail() {
        let (handle, worker) = StoreHandle::spawn(memory_store());
        let other = handle.clone();

        handle.close().await.expect("close");
        worker.join().expect("worker panicked");

        assert!(matches!(other.insert(1).await, Err(StoreError::ActorClosed)));
        assert!(matches!(handle.keys().await, Err(StoreError::ActorClosed)));
    }

    #[tokio::test]
    async fn test_concurrent_tasks_share_one_store() {
        let (handle, worker) = StoreHandle::spawn(memory_store());

        let mut tasks = Vec::new();
        for task in 0..4 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                for key in (task * 50)..(task * 50 + 50) {
                    handle.insert(key).await.expect("insert");
                }
            }));
        }
        for task in tasks {
            task.await.expect("task panicked");
        }

        assert_eq!(handle.keys().await.expect("keys"), (0..200).collect::<Vec<Key>>());
        handle.close().await.expect("close");
        worker.join().expect("worker panicked");
    }

    #[tokio::test]
    async fn test_dropping_handles_closes_store() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("actor.db");

        let store = Store::open(&path, StoreOptions::default()).expect("create");
        let (handle, worker) = StoreHandle::spawn(store);
        for key in [9, 4, 7] {
            handle.insert(key).await.expect("insert");
        }
        drop(handle);
        worker.join().expect("worker panicked");

        let mut store = Store::open(&path, StoreOptions::default()).expect("reopen");
        assert_eq!(store.keys().expect("keys"), vec![4, 7, 9]);
    }
}
