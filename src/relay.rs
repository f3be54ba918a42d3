//! Incremental relay from a fragment source to a byte sink.
//!
//! A producer task pulls fragments from the source and pushes them through a
//! bounded channel; the [`RelaySession`] is the consuming end and is handed
//! to the transport as a `Stream` of byte chunks. At most `buffer` fragments
//! are in flight between the two.
//!
//! Termination paths:
//! - the source ends: the session stream ends, state is `Completed`;
//! - the source fails: the session yields the error once and ends, state is
//!   `Failed`. The transport turns that error into an aborted connection;
//! - the session is cancelled (explicitly or by being dropped when the client
//!   goes away): the producer stops pulling, drops the source, and nothing
//!   else is yielded. State is `Cancelled`.

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::generation::{FragmentStream, GenerationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Streaming)
    }
}

/// Starts relay sessions with a fixed in-flight bound.
#[derive(Debug, Clone, Copy)]
pub struct StreamRelay {
    buffer: usize,
}

impl Default for StreamRelay {
    fn default() -> Self {
        Self { buffer: 1 }
    }
}

impl StreamRelay {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
        }
    }

    /// Spawns the producer for `fragments` and returns the consuming session.
    pub fn start(&self, fragments: FragmentStream) -> RelaySession {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        let (state_tx, state_rx) = watch::channel(SessionState::Streaming);
        let cancel = CancellationToken::new();

        tokio::spawn(produce(id, fragments, tx, state_tx, cancel.clone()));

        RelaySession {
            id,
            rx,
            cancel: cancel.clone(),
            _cancel_on_drop: cancel.drop_guard(),
            state: SessionWatch { rx: state_rx },
            done: false,
        }
    }
}

async fn produce(
    id: Uuid,
    mut fragments: FragmentStream,
    tx: mpsc::Sender<Result<Bytes, GenerationError>>,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
) {
    let mut delivered = 0usize;

    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break SessionState::Cancelled,
            next = fragments.next() => next,
        };

        match next {
            Some(Ok(text)) => {
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break SessionState::Cancelled,
                    sent = tx.send(Ok(Bytes::from(text))) => sent,
                };
                // A closed channel means the consumer is gone.
                if sent.is_err() {
                    break SessionState::Cancelled;
                }
                delivered += 1;
            }
            Some(Err(e)) => {
                warn!(session = %id, delivered, error = %e, "Generation failed mid-stream");
                // The consumer may not be reading; cancellation still wins.
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break SessionState::Cancelled,
                    _ = tx.send(Err(e)) => {}
                }
                break SessionState::Failed;
            }
            None => break SessionState::Completed,
        }
    };

    // Release the upstream before reporting the outcome.
    drop(fragments);
    debug!(session = %id, delivered, state = ?outcome, "Relay producer finished");
    state.send_replace(outcome);
}

/// The consuming end of one relay: a stream of byte chunks in production
/// order, ending cleanly or with a single error.
///
/// Dropping the session cancels it.
pub struct RelaySession {
    id: Uuid,
    rx: mpsc::Receiver<Result<Bytes, GenerationError>>,
    cancel: CancellationToken,
    _cancel_on_drop: DropGuard,
    state: SessionWatch,
    done: bool,
}

impl RelaySession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stops the relay. Nothing produced after this call is yielded.
    /// Calling it again has no further effect.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    /// A handle that outlives the session and reports its final state.
    pub fn watch(&self) -> SessionWatch {
        self.state.clone()
    }
}

impl Stream for RelaySession {
    type Item = Result<Bytes, GenerationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done || self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Err(e))) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Observes a session's state from outside the transport.
#[derive(Debug, Clone)]
pub struct SessionWatch {
    rx: watch::Receiver<SessionState>,
}

impl SessionWatch {
    pub fn current(&self) -> SessionState {
        *self.rx.borrow()
    }

    /// Waits until the session reaches a terminal state.
    pub async fn terminal(mut self) -> SessionState {
        if let Ok(state) = self.rx.wait_for(|state| state.is_terminal()).await {
            return *state;
        }

        // The producer always reports before it exits, so a closed channel
        // still holds the final value.
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct ReleaseOnDrop(Arc<AtomicBool>);

    impl Drop for ReleaseOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn fragments(parts: &[&str]) -> FragmentStream {
        let parts: Vec<Result<String, GenerationError>> =
            parts.iter().map(|p| Ok(p.to_string())).collect();
        stream::iter(parts).boxed()
    }

    #[tokio::test]
    async fn test_relays_fragments_in_order() {
        let mut session = StreamRelay::default().start(fragments(&["Hel", "lo ", "world"]));

        let mut body = String::new();
        let mut snapshots = Vec::new();
        while let Some(chunk) = session.next().await {
            body.push_str(std::str::from_utf8(&chunk.unwrap()).unwrap());
            snapshots.push(body.clone());
        }

        assert_eq!(snapshots, vec!["Hel", "Hello ", "Hello world"]);
        assert_eq!(session.watch().terminal().await, SessionState::Completed);
    }

    #[tokio::test]
    async fn test_failure_after_partial_output() {
        let source = stream::iter(vec![
            Ok("Hel".to_string()),
            Err(GenerationError::Interrupted("upstream reset".into())),
            Ok("never".to_string()),
        ])
        .boxed();
        let mut session = StreamRelay::default().start(source);

        assert_eq!(session.next().await.unwrap().unwrap(), Bytes::from("Hel"));
        assert!(matches!(
            session.next().await,
            Some(Err(GenerationError::Interrupted(_)))
        ));
        assert!(session.next().await.is_none());
        assert_eq!(session.watch().terminal().await, SessionState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_stops_delivery_and_releases_source() {
        let released = Arc::new(AtomicBool::new(false));
        let pulled = Arc::new(AtomicUsize::new(0));

        let guard = ReleaseOnDrop(released.clone());
        let counter = pulled.clone();
        let source = stream::unfold(0usize, move |n| {
            let counter = counter.clone();
            let _keep = &guard;
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Some((Ok(format!("part{n} ")), n + 1))
            }
        })
        .boxed();

        let mut session = StreamRelay::new(1).start(source);
        let first = session.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from("part0 "));

        session.cancel();
        session.cancel();

        assert!(session.next().await.is_none());
        let watch = session.watch();
        assert_eq!(watch.clone().terminal().await, SessionState::Cancelled);
        assert!(released.load(Ordering::SeqCst));

        // The producer can be at most one fragment ahead of the channel.
        let pulled_at_cancel = pulled.load(Ordering::SeqCst);
        assert!(pulled_at_cancel <= 4);
        tokio::task::yield_now().await;
        assert_eq!(pulled.load(Ordering::SeqCst), pulled_at_cancel);
    }

    #[tokio::test]
    async fn test_cancel_while_error_is_pending() {
        let released = Arc::new(AtomicBool::new(false));
        let guard = ReleaseOnDrop(released.clone());
        let source = stream::iter(vec![
            Ok("A".to_string()),
            Err(GenerationError::Interrupted("upstream reset".into())),
        ])
        .map(move |item| {
            let _keep = &guard;
            item
        })
        .boxed();

        // Nobody reads, so "A" fills the channel and the error cannot be sent.
        let session = StreamRelay::new(1).start(source);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state(), SessionState::Streaming);

        session.cancel();

        let state = tokio::time::timeout(Duration::from_millis(500), session.watch().terminal()).await;
        assert_eq!(state.ok(), Some(SessionState::Cancelled));
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_before_first_fragment() {
        let source = stream::pending::<Result<String, GenerationError>>().boxed();
        let mut session = StreamRelay::default().start(source);

        session.cancel();

        assert!(session.next().await.is_none());
        assert_eq!(session.watch().terminal().await, SessionState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_keeps_completed() {
        let mut session = StreamRelay::default().start(fragments(&["done"]));
        while session.next().await.is_some() {}
        let watch = session.watch();
        assert_eq!(watch.clone().terminal().await, SessionState::Completed);

        session.cancel();

        assert_eq!(watch.current(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_dropping_session_cancels_producer() {
        let source = stream::pending::<Result<String, GenerationError>>().boxed();
        let session = StreamRelay::default().start(source);
        let watch = session.watch();

        drop(session);

        assert_eq!(watch.terminal().await, SessionState::Cancelled);
    }

    #[tokio::test]
    async fn test_empty_source_completes() {
        let mut session = StreamRelay::default().start(fragments(&[]));

        assert!(session.next().await.is_none());
        assert_eq!(session.state(), SessionState::Completed);
    }
}
