//! Streaming bridge between raw gRPC streams and consumer channels.
//!
//! Server-streaming RPCs are exposed as a [`RecordStream`]: a dedicated
//! task reads the tonic stream and forwards each item as a
//! [`StreamEvent`] on a bounded channel. Graceful end-of-stream closes the
//! channel silently; a stream error is delivered as exactly one terminal
//! [`StreamEvent::Error`] before the channel closes. The reader task's exit
//! path is the sole owner of cleanup: it unregisters the call handle and
//! drops the sender, so the channel closes exactly once no matter how the
//! stream terminates.
//!
//! Client-streaming uploads are exposed as a [`FileUpload`]: chunks are fed
//! through a sender, dropping it half-closes the request stream, and the
//! call outcome is delivered once when the upload is finished.

use std::sync::Arc;

use recordbase_proto::proto;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{ClientError, Result},
    registry::{CallHandle, CallRegistry},
};

/// Capacity of the per-stream event channel. Small on purpose: the reader
/// task applies backpressure to the server instead of buffering.
const STREAM_CHANNEL_CAPACITY: usize = 1;

/// Event delivered on a [`RecordStream`].
#[derive(Debug)]
pub enum StreamEvent<T> {
    /// A streamed item.
    Item(T),
    /// Terminal error; the stream closes after this event.
    Error(ClientError),
}

/// Handle for cancelling an open stream.
///
/// Cancelling unregisters the call and signals the reader task, which stops
/// before its next receive. An in-flight receive may still deliver one item.
#[derive(Debug)]
pub struct StreamHandle {
    registry: Arc<CallRegistry>,
    handle: CallHandle,
    token: CancellationToken,
}

impl StreamHandle {
    pub(crate) fn new(
        registry: Arc<CallRegistry>,
        handle: CallHandle,
        token: CancellationToken,
    ) -> Self {
        Self { registry, handle, token }
    }

    /// Cancels the stream.
    ///
    /// Idempotent; the consumer channel closes once the reader task
    /// observes the cancellation.
    pub fn cancel(&self) {
        self.registry.unregister(self.handle);
        self.token.cancel();
    }
}

/// Consumer side of a bridged server-streaming RPC.
pub struct RecordStream<T> {
    rx: mpsc::Receiver<StreamEvent<T>>,
    handle: StreamHandle,
}

impl<T> RecordStream<T> {
    /// Receives the next event.
    ///
    /// Returns `None` once the stream has ended — gracefully, after a
    /// terminal error event, or after cancellation.
    pub async fn next(&mut self) -> Option<StreamEvent<T>> {
        self.rx.recv().await
    }

    /// Cancels the stream.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Returns the cancellation handle for this stream.
    #[must_use]
    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }
}

/// Spawns the reader task bridging a tonic stream into a [`RecordStream`].
///
/// The caller has already registered `token` under `handle`; ownership of
/// that registration transfers to the spawned task, which unregisters it on
/// exit.
pub(crate) fn relay<T: Send + 'static>(
    mut stream: tonic::Streaming<T>,
    registry: Arc<CallRegistry>,
    handle: CallHandle,
    token: CancellationToken,
) -> RecordStream<T> {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let task_registry = Arc::clone(&registry);
    let task_token = token.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = task_token.cancelled() => {
                    debug!(handle, "stream cancelled");
                    break;
                }
                msg = stream.message() => match msg {
                    Ok(Some(item)) => {
                        // A send error means the consumer dropped the
                        // receiver; stop reading.
                        if tx.send(StreamEvent::Item(item)).await.is_err() {
                            break;
                        }
                    },
                    // Graceful end-of-stream: close silently.
                    Ok(None) => break,
                    Err(status) => {
                        debug!(handle, error = %status, "stream terminated with error");
                        let _ = tx.send(StreamEvent::Error(status.into())).await;
                        break;
                    },
                },
            }
        }
        // Sole cleanup path: runs exactly once per stream. Dropping `tx`
        // closes the consumer channel.
        task_registry.unregister(handle);
    });

    RecordStream { rx, handle: StreamHandle::new(registry, handle, token) }
}

/// In-progress file upload.
///
/// Chunks are queued with [`send`](Self::send); [`finish`](Self::finish)
/// half-closes the request stream and waits for the server's final
/// response. Any failure — initiation, transmission, or the final
/// handshake — is delivered exactly once, from `finish`.
pub struct FileUpload {
    tx: Option<mpsc::Sender<proto::UploadFileContent>>,
    done: oneshot::Receiver<Result<()>>,
    handle: StreamHandle,
}

impl FileUpload {
    pub(crate) fn new(
        tx: mpsc::Sender<proto::UploadFileContent>,
        done: oneshot::Receiver<Result<()>>,
        handle: StreamHandle,
    ) -> Self {
        Self { tx: Some(tx), done, handle }
    }

    /// Queues a chunk for transmission.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Closed` if the upload task has already
    /// terminated (the terminal error is reported by
    /// [`finish`](Self::finish)).
    pub async fn send(&self, chunk: proto::UploadFileContent) -> Result<()> {
        match &self.tx {
            Some(tx) => tx.send(chunk).await.map_err(|_| ClientError::Closed),
            None => Err(ClientError::Closed),
        }
    }

    /// Half-closes the request stream and waits for the call outcome.
    pub async fn finish(mut self) -> Result<()> {
        // Dropping the sender half-closes the client stream.
        self.tx.take();
        match (&mut self.done).await {
            Ok(result) => result,
            // Task dropped the sender without reporting: treat as cancelled.
            Err(_) => Err(ClientError::Cancelled),
        }
    }

    /// Cancels the upload. The outcome reported by
    /// [`finish`](Self::finish) becomes `Cancelled`.
    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]
mod tests {
    use super::*;

    // `relay` needs a real tonic::Streaming, which can only come from an
    // actual transport; end-to-end coverage of item ordering, graceful
    // close, terminal errors, and cancellation lives in tests/e2e.rs
    // against the mock server. The pieces testable in isolation are the
    // handle bookkeeping and the upload sender contract.

    #[test]
    fn stream_handle_cancel_unregisters_and_cancels() {
        let registry = Arc::new(CallRegistry::new());
        let token = CancellationToken::new();
        let handle = registry.register(token.clone());

        let stream_handle = StreamHandle::new(Arc::clone(&registry), handle, token.clone());
        assert_eq!(registry.len(), 1);

        stream_handle.cancel();
        assert!(registry.is_empty());
        assert!(token.is_cancelled());

        // Second cancel is a no-op.
        stream_handle.cancel();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn upload_send_fails_after_task_exit() {
        let registry = Arc::new(CallRegistry::new());
        let token = CancellationToken::new();
        let handle = registry.register(token.clone());

        let (tx, rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();
        let upload =
            FileUpload::new(tx, done_rx, StreamHandle::new(registry, handle, token));

        // Simulate the upload task terminating with an error.
        drop(rx);
        done_tx
            .send(Err(ClientError::Rpc {
                code: tonic::Code::Internal,
                message: "boom".to_owned(),
            }))
            .ok();

        let err = upload.send(proto::UploadFileContent::default()).await.unwrap_err();
        assert!(matches!(err, ClientError::Closed));

        // The terminal error surfaces from finish().
        let err = upload.finish().await.unwrap_err();
        assert!(matches!(err, ClientError::Rpc { code: tonic::Code::Internal, .. }));
    }

    #[tokio::test]
    async fn upload_finish_reports_cancelled_when_outcome_never_sent() {
        let registry = Arc::new(CallRegistry::new());
        let token = CancellationToken::new();
        let handle = registry.register(token.clone());

        let (tx, _rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel::<Result<()>>();
        let upload =
            FileUpload::new(tx, done_rx, StreamHandle::new(registry, handle, token));

        drop(done_tx);
        let err = upload.finish().await.unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
    }
}
