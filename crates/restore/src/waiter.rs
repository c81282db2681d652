//! Readiness waits over a watch stream.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use kvault_core::Unstructured;
use kvault_kubehub::{WatchEvent, WatchStream};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{debug, warn};

pub type ReadyFn = Arc<dyn Fn(&Unstructured) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("timed out waiting for {} to become ready", .0.join(", "))]
    Timeout(Vec<String>),
    #[error("watch ended before {} became ready", .0.join(", "))]
    WatchClosed(Vec<String>),
}

impl WaitError {
    pub fn unready(&self) -> &[String] {
        match self {
            WaitError::Timeout(names) | WaitError::WatchClosed(names) => names,
        }
    }
}

#[derive(Default)]
struct State {
    pending: BTreeSet<String>,
    // seen ready, possibly before registration
    ready: HashSet<String>,
    closed: bool,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> { state.lock().unwrap_or_else(PoisonError::into_inner) }

/// Tracks created objects of one batch until the watch reports each ready.
pub struct ResourceWaiter {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ResourceWaiter {
    /// Start consuming `events` on a background task. Must be called inside a tokio runtime.
    pub fn new(mut events: WatchStream, ready: ReadyFn) -> Self {
        let state = Arc::new(Mutex::new(State::default()));
        let notify = Arc::new(Notify::new());
        let (st, nt) = (state.clone(), notify.clone());
        let task = tokio::spawn(async move {
            while let Some(ev) = events.next().await {
                match ev {
                    WatchEvent::Applied(obj) => {
                        let name = obj.name().to_string();
                        let is_ready = ready(&obj);
                        let mut s = lock(&st);
                        if is_ready {
                            if s.pending.remove(&name) {
                                debug!(name = %name, remaining = s.pending.len(), "object ready");
                            }
                            s.ready.insert(name);
                            if s.pending.is_empty() {
                                nt.notify_one();
                            }
                        } else {
                            s.ready.remove(&name);
                        }
                    }
                    WatchEvent::Deleted(obj) => {
                        lock(&st).ready.remove(obj.name());
                    }
                    WatchEvent::Error(e) => warn!(error = %e, "watch error while waiting for readiness"),
                }
            }
            lock(&st).closed = true;
            nt.notify_one();
        });
        Self { state, notify, task }
    }

    /// Track `name`; a no-op when the object was already seen ready.
    pub fn register_item(&self, name: &str) {
        let mut s = lock(&self.state);
        if !s.ready.contains(name) {
            s.pending.insert(name.to_string());
        }
    }

    pub fn pending(&self) -> Vec<String> { lock(&self.state).pending.iter().cloned().collect() }

    fn settled(&self) -> Option<Result<(), WaitError>> {
        let s = lock(&self.state);
        if s.pending.is_empty() {
            Some(Ok(()))
        } else if s.closed {
            Some(Err(WaitError::WatchClosed(s.pending.iter().cloned().collect())))
        } else {
            None
        }
    }

    /// Block until every registered object is ready, the watch ends, or `timeout` elapses.
    pub async fn wait(&self, timeout: Duration) -> Result<(), WaitError> {
        let settle = async {
            loop {
                let notified = self.notify.notified();
                if let Some(res) = self.settled() {
                    return res;
                }
                notified.await;
            }
        };
        match tokio::time::timeout(timeout, settle).await {
            Ok(res) => res,
            Err(_) => Err(WaitError::Timeout(self.pending())),
        }
    }
}

impl Drop for ResourceWaiter {
    fn drop(&mut self) { self.task.abort(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use serde_json::json;

    fn pv(name: &str, phase: &str) -> Unstructured {
        Unstructured::from_value(json!({"metadata": {"name": name}, "status": {"phase": phase}})).unwrap()
    }

    fn bound() -> ReadyFn {
        Arc::new(|o: &Unstructured| o.get_path(&["status", "phase"]).and_then(|p| p.as_str()) == Some("Bound"))
    }

    #[tokio::test]
    async fn settles_when_all_ready() {
        let (tx, rx) = mpsc::unbounded();
        let waiter = ResourceWaiter::new(rx.boxed(), bound());
        waiter.register_item("a");
        waiter.register_item("b");
        tx.unbounded_send(WatchEvent::Applied(pv("a", "Pending"))).unwrap();
        tx.unbounded_send(WatchEvent::Applied(pv("a", "Bound"))).unwrap();
        tx.unbounded_send(WatchEvent::Applied(pv("b", "Bound"))).unwrap();
        waiter.wait(Duration::from_secs(5)).await.unwrap();
        drop(tx);
    }

    #[tokio::test]
    async fn timeout_names_unready_sorted() {
        let (tx, rx) = mpsc::unbounded();
        let waiter = ResourceWaiter::new(rx.boxed(), bound());
        for n in ["c", "a", "b"] {
            waiter.register_item(n);
        }
        tx.unbounded_send(WatchEvent::Applied(pv("b", "Bound"))).unwrap();
        let err = waiter.wait(Duration::from_millis(200)).await.unwrap_err();
        assert_eq!(err, WaitError::Timeout(vec!["a".into(), "c".into()]));
        drop(tx);
    }

    #[tokio::test]
    async fn ready_before_registration_counts() {
        let (tx, rx) = mpsc::unbounded();
        let waiter = ResourceWaiter::new(rx.boxed(), bound());
        tx.unbounded_send(WatchEvent::Applied(pv("a", "Bound"))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        waiter.register_item("a");
        assert!(waiter.pending().is_empty());
        waiter.wait(Duration::from_millis(200)).await.unwrap();
        drop(tx);
    }

    #[tokio::test]
    async fn closed_watch_fails_fast() {
        let (tx, rx) = mpsc::unbounded();
        let waiter = ResourceWaiter::new(rx.boxed(), bound());
        waiter.register_item("a");
        tx.unbounded_send(WatchEvent::Error("boom".into())).unwrap();
        drop(tx);
        let err = waiter.wait(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, WaitError::WatchClosed(ref n) if n == &vec!["a".to_string()]));
    }

    #[tokio::test]
    async fn nothing_registered_is_immediate() {
        let waiter = ResourceWaiter::new(futures::stream::pending::<WatchEvent>().boxed(), bound());
        waiter.wait(Duration::from_millis(10)).await.unwrap();
    }
}
