// ── Reactive field streams ──
//
// View-side subscription to a data slot or a façade counter.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// A subscription to a single reactive value.
///
/// Provides point-in-time access plus change notification via
/// [`changed`](Self::changed) or by converting into a `Stream`.
pub struct FieldStream<T: Clone + Send + Sync + 'static = serde_json::Value> {
    current: T,
    receiver: watch::Receiver<T>,
}

impl<T: Clone + Send + Sync + 'static> FieldStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<T>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Value captured at creation time (or at the last `changed()`).
    pub fn current(&self) -> &T {
        &self.current
    }

    /// Latest value, which may have moved on since creation.
    pub fn latest(&self) -> T {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. Returns `None` once the owner is gone.
    pub async fn changed(&mut self) -> Option<T> {
        self.receiver.changed().await.ok()?;
        let value = self.receiver.borrow_and_update().clone();
        self.current = value.clone();
        Some(value)
    }

    pub fn into_stream(self) -> FieldWatchStream<T> {
        FieldWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`; yields the current value
/// first, then every subsequent change.
pub struct FieldWatchStream<T: Clone + Send + Sync + 'static> {
    inner: WatchStream<T>,
}

impl<T: Clone + Send + Sync + 'static> Stream for FieldWatchStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // WatchStream is Unpin regardless of T.
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn changed_tracks_latest_value() {
        let (tx, rx) = watch::channel(json!(null));
        let mut stream: FieldStream<Value> = FieldStream::new(rx);
        assert_eq!(stream.current(), &Value::Null);

        tx.send_replace(json!({ "name": "A" }));
        assert_eq!(stream.latest(), json!({ "name": "A" }));
        assert_eq!(stream.changed().await.unwrap(), json!({ "name": "A" }));
        assert_eq!(stream.current(), &json!({ "name": "A" }));

        drop(tx);
        assert!(stream.changed().await.is_none());
    }

    #[tokio::test]
    async fn into_stream_yields_current_then_changes() {
        let (tx, rx) = watch::channel(0usize);
        let mut stream = FieldStream::new(rx).into_stream();

        assert_eq!(stream.next().await, Some(0));
        tx.send_replace(2);
        assert_eq!(stream.next().await, Some(2));
    }
}
