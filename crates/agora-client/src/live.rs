use std::collections::BTreeMap;
use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

/// Receiving end of a live listener.
///
/// Every item is a complete snapshot of the listened collection, not a
/// diff. The feeding task stops when the view is dropped or the session
/// logs out.
pub struct LiveView<T> {
    items: mpsc::UnboundedReceiver<T>,
    task: AbortHandle,
}

impl<T: Send + 'static> LiveView<T> {
    pub(crate) fn spawn<F, Fut>(feed: F) -> Self
    where
        F: FnOnce(mpsc::UnboundedSender<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, items) = mpsc::unbounded_channel();
        let task: JoinHandle<()> = tokio::spawn(feed(tx));
        Self {
            items,
            task: task.abort_handle(),
        }
    }

    pub(crate) fn abort_handle(&self) -> AbortHandle {
        self.task.clone()
    }

    /// Next snapshot, or `None` once the listener has stopped.
    pub async fn recv(&mut self) -> Option<T> {
        self.items.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.items.try_recv().ok()
    }

    /// Drain queued snapshots and return the newest one.
    pub fn latest(&mut self) -> Option<T> {
        let mut newest = None;
        while let Ok(item) = self.items.try_recv() {
            newest = Some(item);
        }
        newest
    }
}

impl<T> Drop for LiveView<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Helper tasks keyed by the entry they follow. Dropping the set aborts
/// every task in it.
pub(crate) struct TaskSet<K: Ord> {
    tasks: BTreeMap<K, AbortHandle>,
}

impl<K: Ord> TaskSet<K> {
    pub(crate) fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.tasks.contains_key(key)
    }

    pub(crate) fn insert(&mut self, key: K, task: JoinHandle<()>) {
        if let Some(previous) = self.tasks.insert(key, task.abort_handle()) {
            previous.abort();
        }
    }

    pub(crate) fn remove(&mut self, key: &K) {
        if let Some(task) = self.tasks.remove(key) {
            task.abort();
        }
    }
}

impl<K: Ord> Drop for TaskSet<K> {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort();
        }
    }
}
