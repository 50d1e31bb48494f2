//! Per-deployment change log
//!
//! A [`Watcher`] buffers the changes of a single deployment and hands them
//! out to any number of independent subscribers. Each subscriber has a cursor
//! remembering how many changes it already consumed. A read for a subscriber
//! that is caught up suspends until the next `put` or `close`.
//!
//! Once closed, the log only ever returns its final change.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::bundles::models::{Change, WatcherId};
use crate::errors::WatcherError;

/// Future returned by [`Watcher::next`], resolving to a non-empty list of changes
#[derive(Debug)]
pub struct NextChanges {
    rx: oneshot::Receiver<Vec<Change>>,
}

impl Future for NextChanges {
    type Output = Result<Vec<Change>, WatcherError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| WatcherError::Dropped))
    }
}

#[derive(Default)]
struct WatcherInner {
    changes: Vec<Change>,
    closed: bool,
    cursors: HashMap<WatcherId, usize>,
    waiting: HashMap<WatcherId, oneshot::Sender<Vec<Change>>>,
}

impl WatcherInner {
    /// Take what the subscriber has not seen yet, advancing its cursor
    fn take_unseen(&mut self, subscriber: WatcherId) -> Option<Vec<Change>> {
        if self.closed {
            return self.changes.last().map(|last| vec![last.clone()]);
        }
        let cursor = self.cursors.get(&subscriber).copied().unwrap_or(0);
        if cursor >= self.changes.len() {
            return None;
        }
        self.cursors.insert(subscriber, self.changes.len());
        Some(self.changes[cursor..].to_vec())
    }

    fn wake_waiting(&mut self) {
        let waiting = std::mem::take(&mut self.waiting);
        for (subscriber, tx) in waiting {
            if tx.is_closed() {
                continue;
            }
            let previous = self.cursors.get(&subscriber).copied();
            let Some(changes) = self.take_unseen(subscriber) else {
                self.waiting.insert(subscriber, tx);
                continue;
            };
            if tx.send(changes).is_err() {
                // Reader went away in the meantime, keep its data for later.
                match previous {
                    Some(cursor) => self.cursors.insert(subscriber, cursor),
                    None => self.cursors.remove(&subscriber),
                };
            }
        }
    }
}

/// Append-only change log for one deployment
#[derive(Default)]
pub struct Watcher {
    inner: Mutex<WatcherInner>,
}

impl Watcher {
    /// Create an open, empty watcher
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WatcherInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a change, resolving every pending read
    pub fn put(&self, change: Change) -> Result<(), WatcherError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(WatcherError::Closed);
        }
        inner.changes.push(change);
        inner.wake_waiting();
        Ok(())
    }

    /// Append the final change and close the log
    pub fn close(&self, change: Change) -> Result<(), WatcherError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(WatcherError::Closed);
        }
        inner.changes.push(change);
        inner.closed = true;
        inner.wake_waiting();
        Ok(())
    }

    /// Return the changes the given subscriber has not seen yet.
    ///
    /// The returned future resolves immediately if there is something to
    /// deliver, otherwise when the next change is appended. Only one read
    /// per subscriber may be outstanding at a time.
    pub fn next(&self, subscriber: WatcherId) -> Result<NextChanges, WatcherError> {
        let mut inner = self.lock();
        if let Some(tx) = inner.waiting.get(&subscriber) {
            if !tx.is_closed() {
                return Err(WatcherError::AlreadyWaiting(subscriber));
            }
            inner.waiting.remove(&subscriber);
        }

        let (tx, rx) = oneshot::channel();
        match inner.take_unseen(subscriber) {
            Some(changes) => {
                let _ = tx.send(changes);
            }
            None => {
                inner.waiting.insert(subscriber, tx);
            }
        }
        Ok(NextChanges { rx })
    }

    /// The most recent change
    pub fn getlast(&self) -> Result<Change, WatcherError> {
        self.lock().changes.last().cloned().ok_or(WatcherError::Empty)
    }

    /// Whether no change was ever appended
    pub fn is_empty(&self) -> bool {
        self.lock().changes.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
