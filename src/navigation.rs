//! In-page navigation detection
//!
//! Single-page apps change the location without reloading. Every mutation
//! batch is a chance to notice; the watcher compares the current location
//! with the last one it saw.

use crate::document::{Document, MutationBatch};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationChange {
    pub from: String,
    pub to: String,
}

#[derive(Debug)]
pub struct NavigationWatcher {
    last_url: Mutex<String>,
}

impl NavigationWatcher {
    pub fn new(initial_url: impl Into<String>) -> Self {
        Self {
            last_url: Mutex::new(initial_url.into()),
        }
    }

    pub fn last_url(&self) -> String {
        self.last_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the current location, reporting a change if it differs
    pub fn observe(&self, current: &str) -> Option<NavigationChange> {
        let mut last = self.last_url.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == current {
            return None;
        }
        let from = std::mem::replace(&mut *last, current.to_string());
        Some(NavigationChange {
            from,
            to: current.to_string(),
        })
    }

    /// Watch mutation batches until cancelled or the document goes away.
    /// `batches` should be subscribed before the first await so nothing is
    /// missed between launch and the first poll.
    pub async fn run<F>(
        &self,
        document: Arc<dyn Document>,
        mut batches: broadcast::Receiver<MutationBatch>,
        cancel: CancellationToken,
        mut on_change: F,
    ) where
        F: FnMut(NavigationChange),
    {
        tracing::debug!("Navigation watcher started at {}", self.last_url());

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = batches.recv() => match batch {
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::trace!("Navigation watcher lagged by {} batches", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }

            if let Some(change) = self.observe(&document.location()) {
                tracing::info!("Navigation detected: {} -> {}", change.from, change.to);
                on_change(change);
            }
        }

        tracing::debug!("Navigation watcher stopped");
    }
}
