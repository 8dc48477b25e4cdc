//! High-level Recordbase client.
//!
//! [`RecordClient`] is the public face of the SDK. Construction resolves
//! the cluster topology from the bootstrap endpoints, picks a dial strategy
//! (direct for a single member, load-balanced for several), and wraps the
//! resulting channel. Every call registers a cancellation token so that
//! [`close`](RecordClient::close) can abort all in-flight work.
//!
//! Unary calls run under the configured retry policy; streaming calls are
//! bridged through [`RecordStream`] and [`FileUpload`].

use std::{future::Future, sync::Arc};

use recordbase_proto::proto::{self, record_service_client::RecordServiceClient};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{service::interceptor::InterceptedService, transport::Channel};
use tracing::debug;

use crate::{
    auth::BearerAuth,
    config::ClientConfig,
    connection::{self, Connection, MAX_RECV_MESSAGE_SIZE},
    discovery,
    error::{ClientError, ConfigSnafu, ConnectionSnafu, Result},
    registry::{CallHandle, CallRegistry},
    streaming::{self, FileUpload, RecordStream, StreamHandle},
};

/// Well-known gRPC service name, for health-check scoping.
pub const SERVICE_NAME: &str = "recordbase.v1.RecordService";

/// Channel capacity for upload chunk queues.
const UPLOAD_CHANNEL_CAPACITY: usize = 8;

/// Record service stub with bearer auth applied.
type Stub = RecordServiceClient<InterceptedService<Channel, BearerAuth>>;

/// Shared client state. The last clone dropped performs teardown.
#[derive(Debug)]
struct ClientInner {
    connection: Connection,
    config: ClientConfig,
    auth: BearerAuth,
    registry: Arc<CallRegistry>,
}

impl ClientInner {
    /// Closes the connection and aborts in-flight calls.
    ///
    /// Returns whether this invocation performed the close.
    fn shutdown(&self) -> bool {
        if self.connection.close() {
            self.registry.cancel_all();
            debug!(target = %self.connection.target(), "client closed");
            true
        } else {
            false
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Removes a registry entry when a unary call leaves scope.
struct CallGuard<'a> {
    registry: &'a CallRegistry,
    handle: CallHandle,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.handle);
    }
}

/// Client for the Recordbase record service.
///
/// Cheap to clone; all clones share one connection and one cancellation
/// registry. See the crate docs for a usage example.
#[derive(Debug, Clone)]
pub struct RecordClient {
    inner: Arc<ClientInner>,
}

impl RecordClient {
    /// Connects using a comma-separated bootstrap endpoint list and a
    /// bearer token (empty for unauthenticated access).
    ///
    /// # Errors
    ///
    /// Returns `Config` if the endpoint list is empty after trimming,
    /// `NoClusterFound` if discovery fails, or a transport error if the
    /// selected members cannot be dialed.
    pub async fn connect(endpoints: &str, token: &str) -> Result<Self> {
        let endpoints = connection::split_endpoints(endpoints);
        if endpoints.is_empty() {
            return ConfigSnafu { message: "no endpoints provided" }.fail();
        }

        let config = ClientConfig::builder()
            .with_endpoints(endpoints)
            .with_auth_token(token)
            .build()?;
        Self::with_config(config).await
    }

    /// Connects using a full [`ClientConfig`].
    ///
    /// Resolves the cluster from the configured bootstrap endpoints, then
    /// dials: one member directly, several members load-balanced.
    pub async fn with_config(config: ClientConfig) -> Result<Self> {
        let cluster = discovery::resolve_cluster(&config).await?;
        let members = cluster.member_addrs();

        let (channel, target) = match members.as_slice() {
            [] => {
                return ConnectionSnafu { message: "cluster reported no members" }.fail();
            },
            [only] => (connection::dial(only, &config).await?, only.clone()),
            many => {
                let target = connection::multi_target(many);
                (connection::dial_load_balanced(many, &config)?, target)
            },
        };

        debug!(target = %target, members = members.len(), "connected");
        Self::from_parts(channel, target, config)
    }

    /// Wraps an already-established channel.
    ///
    /// Skips discovery entirely; intended for callers that dialed
    /// themselves and for tests.
    pub fn from_channel(channel: Channel, config: ClientConfig) -> Result<Self> {
        Self::from_parts(channel, "custom", config)
    }

    fn from_parts(
        channel: Channel,
        target: impl Into<String>,
        config: ClientConfig,
    ) -> Result<Self> {
        let auth = BearerAuth::new(config.auth_token())?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                connection: Connection::new(channel, target),
                config,
                auth,
                registry: Arc::new(CallRegistry::new()),
            }),
        })
    }

    /// Returns the logical dial target of this client.
    #[must_use]
    pub fn target(&self) -> &str {
        self.inner.connection.target()
    }

    /// Number of in-flight calls (unary and streaming).
    #[must_use]
    pub fn active_calls(&self) -> usize {
        self.inner.registry.len()
    }

    /// Closes the client: drops the connection and cancels all in-flight
    /// calls.
    ///
    /// Idempotent under concurrent invocation; returns `true` only for the
    /// call that performed the close. Calls issued afterwards fail with
    /// [`ClientError::Closed`].
    pub fn close(&self) -> bool {
        self.inner.shutdown()
    }

    /// Builds a service stub over the live channel.
    fn stub(&self) -> Result<Stub> {
        let channel = self.inner.connection.channel()?;
        Ok(RecordServiceClient::with_interceptor(channel, self.inner.auth.clone())
            .max_decoding_message_size(MAX_RECV_MESSAGE_SIZE))
    }

    /// Runs a unary call under retry, cancellation, and registry
    /// bookkeeping.
    async fn unary<F, Fut, R>(&self, call: F) -> Result<R>
    where
        F: Fn(Stub) -> Fut,
        Fut: Future<Output = std::result::Result<tonic::Response<R>, tonic::Status>>,
    {
        let token = CancellationToken::new();
        let handle = self.inner.registry.register(token.clone());
        let _guard = CallGuard { registry: &self.inner.registry, handle };

        crate::retry::with_retry_cancellable(self.inner.config.retry_policy(), &token, || {
            let stub = self.stub();
            let call = &call;
            async move {
                let response = call(stub?).await?;
                Ok(response.into_inner())
            }
        })
        .await
    }

    /// Opens a server-streaming call and bridges it into a
    /// [`RecordStream`].
    async fn server_streaming<F, Fut, T>(&self, open: F) -> Result<RecordStream<T>>
    where
        F: FnOnce(Stub) -> Fut,
        Fut: Future<
            Output = std::result::Result<
                tonic::Response<tonic::codec::Streaming<T>>,
                tonic::Status,
            >,
        >,
        T: Send + 'static,
    {
        let stub = self.stub()?;
        let token = CancellationToken::new();
        let handle = self.inner.registry.register(token.clone());

        let opened = tokio::select! {
            biased;
            () = token.cancelled() => Err(ClientError::Cancelled),
            result = open(stub) => result.map_err(ClientError::from),
        };

        match opened {
            Ok(response) => Ok(streaming::relay(
                response.into_inner(),
                Arc::clone(&self.inner.registry),
                handle,
                token,
            )),
            Err(err) => {
                // Open failure produces no stream and no reader task.
                self.inner.registry.unregister(handle);
                Err(err)
            },
        }
    }

    // --- Tenant metadata -------------------------------------------------

    /// Gets attribute metadata for a tenant.
    pub async fn get_info(&self, request: proto::TenantRequest) -> Result<proto::Info> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.get_info(request).await }
        })
        .await
    }

    /// Gets allocated and used key capacity for a tenant.
    pub async fn get_key_capacity(
        &self,
        request: proto::TenantRequest,
    ) -> Result<proto::KeyCapacity> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.get_key_capacity(request).await }
        })
        .await
    }

    /// Allocates a primary-key range for a tenant.
    pub async fn add_key_range(&self, request: proto::KeyRange) -> Result<()> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.add_key_range(request).await }
        })
        .await
        .map(|_: proto::Empty| ())
    }

    // --- Record CRUD -----------------------------------------------------

    /// Looks a record up by an indexed unique attribute.
    pub async fn lookup(&self, request: proto::LookupRequest) -> Result<proto::RecordEntry> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.lookup(request).await }
        })
        .await
    }

    /// Gets a record by primary key.
    pub async fn get(&self, request: proto::GetRequest) -> Result<proto::RecordEntry> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.get(request).await }
        })
        .await
    }

    /// Creates a record, returning the assigned primary key.
    pub async fn create(&self, request: proto::CreateRequest) -> Result<proto::CreateResponse> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.create(request).await }
        })
        .await
    }

    /// Updates record attributes.
    pub async fn update(&self, request: proto::UpdateRequest) -> Result<()> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.update(request).await }
        })
        .await
        .map(|_: proto::Empty| ())
    }

    /// Deletes a record.
    pub async fn delete(&self, request: proto::DeleteRequest) -> Result<()> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.delete(request).await }
        })
        .await
        .map(|_: proto::Empty| ())
    }

    // --- Map values ------------------------------------------------------

    /// Gets a map value associated with a record.
    pub async fn map_get(&self, request: proto::MapGetRequest) -> Result<proto::MapEntry> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.map_get(request).await }
        })
        .await
    }

    /// Puts a map value associated with a record.
    pub async fn map_put(&self, request: proto::MapPutRequest) -> Result<()> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.map_put(request).await }
        })
        .await
        .map(|_: proto::Empty| ())
    }

    /// Removes a map value associated with a record.
    pub async fn map_remove(&self, request: proto::MapRemoveRequest) -> Result<()> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.map_remove(request).await }
        })
        .await
        .map(|_: proto::Empty| ())
    }

    // --- Binary values ---------------------------------------------------

    /// Gets a binary value from a record.
    pub async fn bin_get(&self, request: proto::BinGetRequest) -> Result<proto::BinEntry> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.bin_get(request).await }
        })
        .await
    }

    /// Puts a binary value to a record.
    pub async fn bin_put(&self, request: proto::BinPutRequest) -> Result<()> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.bin_put(request).await }
        })
        .await
        .map(|_: proto::Empty| ())
    }

    /// Removes a binary value from a record.
    pub async fn bin_remove(&self, request: proto::BinRemoveRequest) -> Result<()> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.bin_remove(request).await }
        })
        .await
        .map(|_: proto::Empty| ())
    }

    // --- Files -----------------------------------------------------------

    /// Deletes a file attached to a record.
    pub async fn delete_file(&self, request: proto::DeleteFileRequest) -> Result<()> {
        self.unary(|mut stub| {
            let request = request.clone();
            async move { stub.delete_file(request).await }
        })
        .await
        .map(|_: proto::Empty| ())
    }

    /// Downloads file content attached to a record, in chunks.
    pub async fn download_file(
        &self,
        request: proto::DownloadFileRequest,
    ) -> Result<RecordStream<proto::FileContent>> {
        self.server_streaming(|mut stub| async move { stub.download_file(request).await }).await
    }

    /// Starts a chunked file upload.
    ///
    /// Queue chunks with [`FileUpload::send`], then call
    /// [`FileUpload::finish`] to half-close the stream and collect the
    /// outcome.
    pub async fn upload_file(&self) -> Result<FileUpload> {
        let mut stub = self.stub()?;
        let token = CancellationToken::new();
        let handle = self.inner.registry.register(token.clone());

        let (tx, rx) = mpsc::channel(UPLOAD_CHANNEL_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();

        let registry = Arc::clone(&self.inner.registry);
        let task_token = token.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = task_token.cancelled() => Err(ClientError::Cancelled),
                result = stub.upload_file(ReceiverStream::new(rx)) => {
                    result.map(|_| ()).map_err(ClientError::from)
                }
            };
            registry.unregister(handle);
            // Receiver gone means the upload was abandoned; nothing to report.
            let _ = done_tx.send(outcome);
        });

        Ok(FileUpload::new(
            tx,
            done_rx,
            StreamHandle::new(Arc::clone(&self.inner.registry), handle, token),
        ))
    }

    // --- Streamed queries ------------------------------------------------

    /// Searches records by an indexed non-unique attribute.
    pub async fn search(
        &self,
        request: proto::SearchRequest,
    ) -> Result<RecordStream<proto::RecordEntry>> {
        self.server_streaming(|mut stub| async move { stub.search(request).await }).await
    }

    /// Scans records in primary-key order.
    pub async fn scan(
        &self,
        request: proto::ScanRequest,
    ) -> Result<RecordStream<proto::RecordEntry>> {
        self.server_streaming(|mut stub| async move { stub.scan(request).await }).await
    }

    /// Scans map key-value pairs associated with a record.
    pub async fn map_range(
        &self,
        request: proto::MapRangeRequest,
    ) -> Result<RecordStream<proto::MapEntry>> {
        self.server_streaming(|mut stub| async move { stub.map_range(request).await }).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn lazy_channel() -> Channel {
        let config = ClientConfig::builder().with_endpoint("127.0.0.1:1").build().unwrap();
        connection::dial_load_balanced(&["127.0.0.1:1".to_owned()], &config).unwrap()
    }

    #[tokio::test]
    async fn connect_rejects_empty_endpoint_list() {
        let result = RecordClient::connect(" , ,", "").await;
        assert!(matches!(result, Err(ClientError::Config { .. })));
    }

    #[tokio::test]
    async fn connect_fails_when_no_cluster_reachable() {
        let config = ClientConfig::builder()
            .with_endpoint("127.0.0.1:1")
            .with_connect_timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        let result = RecordClient::with_config(config).await;
        assert!(matches!(result, Err(ClientError::NoClusterFound { .. })));
    }

    #[tokio::test]
    async fn from_channel_skips_discovery() {
        let config = ClientConfig::builder().with_endpoint("127.0.0.1:1").build().unwrap();
        let client = RecordClient::from_channel(lazy_channel(), config).unwrap();

        assert_eq!(client.target(), "custom");
        assert_eq!(client.active_calls(), 0);
    }

    #[tokio::test]
    async fn close_is_exactly_once_and_calls_fail_after() {
        let config = ClientConfig::builder().with_endpoint("127.0.0.1:1").build().unwrap();
        let client = RecordClient::from_channel(lazy_channel(), config).unwrap();

        assert!(client.close(), "first close performs teardown");
        assert!(!client.close(), "second close is a no-op");

        let err = client
            .get(proto::GetRequest { tenant: "t".into(), primary_key: "k".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Closed));
    }

    #[tokio::test]
    async fn clones_share_closed_state() {
        let config = ClientConfig::builder().with_endpoint("127.0.0.1:1").build().unwrap();
        let client = RecordClient::from_channel(lazy_channel(), config).unwrap();
        let clone = client.clone();

        assert!(client.close());
        let err = clone.get_info(proto::TenantRequest { tenant: "t".into() }).await.unwrap_err();
        assert!(matches!(err, ClientError::Closed));
    }

    #[tokio::test]
    async fn invalid_auth_token_fails_construction() {
        let config = ClientConfig::builder()
            .with_endpoint("127.0.0.1:1")
            .with_auth_token("bad\u{00e9}token")
            .build()
            .unwrap();

        let result = RecordClient::from_channel(lazy_channel(), config);
        assert!(matches!(result, Err(ClientError::Config { .. })));
    }
}
