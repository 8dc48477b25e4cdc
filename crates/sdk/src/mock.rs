//! Mock gRPC server for SDK integration testing.
//!
//! Provides a controllable in-process implementation of both Recordbase
//! services for testing client behavior without a real cluster:
//!
//! - **Record storage**: seed and inspect records, map values, binary
//!   values, and file content
//! - **Cluster configuration**: serve a configurable member list (defaults
//!   to the mock's own address)
//! - **Failure injection**: inject `UNAVAILABLE` errors or per-request
//!   delays for resilience tests
//! - **Scripted streams**: replace derived `Search`/`Scan` results with a
//!   fixed item sequence and an optional terminal error
//! - **Request counting**: track how many RPCs the server handled
//!
//! # Example
//!
//! ```no_run
//! use recordbase_client::mock::MockRecordServer;
//! use recordbase_client::RecordClient;
//! use recordbase_proto::proto;
//!
//! #[tokio::test]
//! async fn test_get() {
//!     let server = MockRecordServer::start().await.unwrap();
//!     server.insert_record(proto::RecordEntry {
//!         tenant: "acme".into(),
//!         primary_key: "42".into(),
//!         version: 1,
//!         ..Default::default()
//!     });
//!
//!     let client = RecordClient::connect(server.endpoint(), "").await.unwrap();
//!     let record = client
//!         .get(proto::GetRequest { tenant: "acme".into(), primary_key: "42".into() })
//!         .await
//!         .unwrap();
//!     assert_eq!(record.version, 1);
//! }
//! ```

use std::{
    collections::HashMap,
    net::SocketAddr,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::RwLock;
use recordbase_proto::proto::{
    self,
    cluster_service_server::{ClusterService, ClusterServiceServer},
    record_service_server::{RecordService, RecordServiceServer},
};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tonic::{Request, Response, Status, transport::Server};

use crate::error::{ConfigSnafu, ConnectionSnafu};

/// Size of file download chunks served by the mock.
const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

type StreamResponse<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

type RecordKey = (String, String);

/// Scripted replacement for derived `Search`/`Scan` results.
#[derive(Default)]
struct ScriptedStream {
    items: Vec<proto::RecordEntry>,
    /// Terminal status delivered after the items, if any.
    tail_error: Option<(tonic::Code, String)>,
    /// Delay inserted before each item, for cancellation tests.
    item_delay: Duration,
}

/// Shared mutable state behind the mock services.
struct MockState {
    records: RwLock<HashMap<RecordKey, proto::RecordEntry>>,
    maps: RwLock<HashMap<RecordKey, Vec<proto::MapEntry>>>,
    bins: RwLock<HashMap<RecordKey, Vec<proto::BinEntry>>>,
    files: RwLock<HashMap<(String, String, String), Vec<u8>>>,

    /// Next primary key assigned by `Create`.
    next_key: AtomicU64,
    /// Per-tenant key capacity granted via `AddKeyRange`.
    capacity: RwLock<HashMap<String, u64>>,

    /// Members reported by `GetConfiguration`. Empty means "report self".
    members: RwLock<Vec<proto::ServerInfo>>,

    /// Scripted stream override for `Search` and `Scan`.
    scripted: RwLock<Option<ScriptedStream>>,

    /// Bearer token required on every RPC, when set.
    required_token: RwLock<Option<String>>,

    /// Remaining number of RPCs to fail with `UNAVAILABLE`.
    unavailable_count: AtomicUsize,
    /// Artificial delay applied to every RPC, in milliseconds.
    delay_ms: AtomicU64,
    /// Total RPCs handled (including injected failures).
    request_count: AtomicUsize,
}

impl MockState {
    fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            maps: RwLock::new(HashMap::new()),
            bins: RwLock::new(HashMap::new()),
            files: RwLock::new(HashMap::new()),
            next_key: AtomicU64::new(1),
            capacity: RwLock::new(HashMap::new()),
            members: RwLock::new(Vec::new()),
            scripted: RwLock::new(None),
            required_token: RwLock::new(None),
            unavailable_count: AtomicUsize::new(0),
            delay_ms: AtomicU64::new(0),
            request_count: AtomicUsize::new(0),
        }
    }

    /// Common entry point for every RPC: counts the request, applies the
    /// configured delay, checks auth, and consumes one injected failure
    /// if any are pending.
    async fn intercept<T>(&self, request: &Request<T>) -> Result<(), Status> {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let delay = self.delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if let Some(token) = self.required_token.read().as_deref() {
            let expected = format!("Bearer {token}");
            let presented = request
                .metadata()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if presented != expected {
                return Err(Status::unauthenticated("missing or invalid bearer token"));
            }
        }

        // Consume one pending injected failure, racing other requests.
        loop {
            let remaining = self.unavailable_count.load(Ordering::SeqCst);
            if remaining == 0 {
                return Ok(());
            }
            if self
                .unavailable_count
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Err(Status::unavailable("injected unavailable"));
            }
        }
    }

    /// Serves the scripted stream if one is configured.
    fn scripted_stream(&self) -> Option<StreamResponse<proto::RecordEntry>> {
        let scripted = self.scripted.read();
        let script = scripted.as_ref()?;

        let items = script.items.clone();
        let tail_error = script.tail_error.clone();
        let item_delay = script.item_delay;

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            for item in items {
                if !item_delay.is_zero() {
                    tokio::time::sleep(item_delay).await;
                }
                if tx.send(Ok(item)).await.is_err() {
                    return;
                }
            }
            if let Some((code, message)) = tail_error {
                let _ = tx.send(Err(Status::new(code, message))).await;
            }
        });

        Some(Box::pin(ReceiverStream::new(rx)))
    }
}

fn stream_of<T: Send + 'static>(items: Vec<Result<T, Status>>) -> StreamResponse<T> {
    Box::pin(tokio_stream::iter(items))
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Service facade over the shared state; implements both gRPC services.
#[derive(Clone)]
struct MockService {
    state: Arc<MockState>,
}

#[tonic::async_trait]
impl RecordService for MockService {
    async fn get_info(
        &self,
        request: Request<proto::TenantRequest>,
    ) -> Result<Response<proto::Info>, Status> {
        self.state.intercept(&request).await?;
        let tenant = request.into_inner().tenant;

        let records = self.state.records.read();
        let mut attributes: Vec<String> = Vec::new();
        let mut count = 0;
        for record in records.values().filter(|r| r.tenant == tenant) {
            count += 1;
            for attr in &record.attributes {
                if !attributes.contains(&attr.name) {
                    attributes.push(attr.name.clone());
                }
            }
        }
        attributes.sort();

        Ok(Response::new(proto::Info {
            tenant,
            indexed_attributes: attributes.clone(),
            attributes,
            approximate_count: count,
        }))
    }

    async fn lookup(
        &self,
        request: Request<proto::LookupRequest>,
    ) -> Result<Response<proto::RecordEntry>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        let records = self.state.records.read();
        records
            .values()
            .filter(|r| r.tenant == req.tenant)
            .find(|r| r.attributes.iter().any(|a| a.name == req.attribute && a.value == req.value))
            .cloned()
            .map(Response::new)
            .ok_or_else(|| Status::not_found("no record matches the attribute value"))
    }

    type SearchStream = StreamResponse<proto::RecordEntry>;

    async fn search(
        &self,
        request: Request<proto::SearchRequest>,
    ) -> Result<Response<Self::SearchStream>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        if let Some(stream) = self.state.scripted_stream() {
            return Ok(Response::new(stream));
        }

        let records = self.state.records.read();
        let mut matches: Vec<_> = records
            .values()
            .filter(|r| r.tenant == req.tenant)
            .filter(|r| {
                r.attributes.iter().any(|a| a.name == req.attribute && a.value == req.value)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.primary_key.cmp(&b.primary_key));
        if req.limit > 0 {
            matches.truncate(req.limit as usize);
        }

        Ok(Response::new(stream_of(matches.into_iter().map(Ok).collect())))
    }

    async fn get(
        &self,
        request: Request<proto::GetRequest>,
    ) -> Result<Response<proto::RecordEntry>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        let records = self.state.records.read();
        records
            .get(&(req.tenant, req.primary_key))
            .cloned()
            .map(Response::new)
            .ok_or_else(|| Status::not_found("record not found"))
    }

    async fn create(
        &self,
        request: Request<proto::CreateRequest>,
    ) -> Result<Response<proto::CreateResponse>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        let primary_key = self.state.next_key.fetch_add(1, Ordering::Relaxed).to_string();
        let now = unix_now();
        let record = proto::RecordEntry {
            tenant: req.tenant.clone(),
            primary_key: primary_key.clone(),
            version: 1,
            attributes: req.attributes,
            file_names: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.state.records.write().insert((req.tenant, primary_key.clone()), record);

        Ok(Response::new(proto::CreateResponse { primary_key }))
    }

    async fn update(
        &self,
        request: Request<proto::UpdateRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        let mut records = self.state.records.write();
        let record = records
            .get_mut(&(req.tenant, req.primary_key))
            .ok_or_else(|| Status::not_found("record not found"))?;

        if req.expected_version != 0 && req.expected_version != record.version {
            return Err(Status::aborted(format!(
                "version mismatch: expected {}, have {}",
                req.expected_version, record.version
            )));
        }

        for attr in req.attributes {
            match record.attributes.iter_mut().find(|a| a.name == attr.name) {
                Some(existing) => existing.value = attr.value,
                None => record.attributes.push(attr),
            }
        }
        record.version += 1;
        record.updated_at = unix_now();

        Ok(Response::new(proto::Empty {}))
    }

    async fn delete(
        &self,
        request: Request<proto::DeleteRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        self.state
            .records
            .write()
            .remove(&(req.tenant, req.primary_key))
            .ok_or_else(|| Status::not_found("record not found"))?;
        Ok(Response::new(proto::Empty {}))
    }

    async fn upload_file(
        &self,
        request: Request<tonic::Streaming<proto::UploadFileContent>>,
    ) -> Result<Response<proto::Empty>, Status> {
        self.state.intercept(&request).await?;
        let mut stream = request.into_inner();

        let mut key: Option<(String, String, String)> = None;
        let mut content = Vec::new();

        while let Some(chunk) = stream.message().await? {
            if key.is_none() {
                if chunk.tenant.is_empty() || chunk.file_name.is_empty() {
                    return Err(Status::invalid_argument(
                        "first chunk must carry tenant, primary key, and file name",
                    ));
                }
                key = Some((chunk.tenant.clone(), chunk.primary_key.clone(), chunk.file_name.clone()));
            }
            content.extend_from_slice(&chunk.data);
            if chunk.last {
                break;
            }
        }

        let (tenant, primary_key, file_name) =
            key.ok_or_else(|| Status::invalid_argument("upload stream carried no chunks"))?;

        let mut records = self.state.records.write();
        if let Some(record) = records.get_mut(&(tenant.clone(), primary_key.clone()))
            && !record.file_names.contains(&file_name)
        {
            record.file_names.push(file_name.clone());
        }
        drop(records);

        self.state.files.write().insert((tenant, primary_key, file_name), content);
        Ok(Response::new(proto::Empty {}))
    }

    type DownloadFileStream = StreamResponse<proto::FileContent>;

    async fn download_file(
        &self,
        request: Request<proto::DownloadFileRequest>,
    ) -> Result<Response<Self::DownloadFileStream>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        let files = self.state.files.read();
        let content = files
            .get(&(req.tenant, req.primary_key, req.file_name))
            .ok_or_else(|| Status::not_found("file not found"))?;

        let chunk_count = content.chunks(DOWNLOAD_CHUNK_SIZE).count().max(1);
        let chunks: Vec<_> = if content.is_empty() {
            vec![Ok(proto::FileContent { offset: 0, data: Vec::new(), last: true })]
        } else {
            content
                .chunks(DOWNLOAD_CHUNK_SIZE)
                .enumerate()
                .map(|(i, data)| {
                    Ok(proto::FileContent {
                        offset: (i * DOWNLOAD_CHUNK_SIZE) as u64,
                        data: data.to_vec(),
                        last: i + 1 == chunk_count,
                    })
                })
                .collect()
        };

        Ok(Response::new(stream_of(chunks)))
    }

    async fn delete_file(
        &self,
        request: Request<proto::DeleteFileRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        self.state
            .files
            .write()
            .remove(&(req.tenant.clone(), req.primary_key.clone(), req.file_name.clone()))
            .ok_or_else(|| Status::not_found("file not found"))?;

        let mut records = self.state.records.write();
        if let Some(record) = records.get_mut(&(req.tenant, req.primary_key)) {
            record.file_names.retain(|name| name != &req.file_name);
        }
        Ok(Response::new(proto::Empty {}))
    }

    type ScanStream = StreamResponse<proto::RecordEntry>;

    async fn scan(
        &self,
        request: Request<proto::ScanRequest>,
    ) -> Result<Response<Self::ScanStream>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        if let Some(stream) = self.state.scripted_stream() {
            return Ok(Response::new(stream));
        }

        let records = self.state.records.read();
        let mut matches: Vec<_> = records
            .values()
            .filter(|r| r.tenant == req.tenant && r.primary_key.starts_with(&req.prefix))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.primary_key.cmp(&b.primary_key));
        if req.limit > 0 {
            matches.truncate(req.limit as usize);
        }

        Ok(Response::new(stream_of(matches.into_iter().map(Ok).collect())))
    }

    async fn add_key_range(
        &self,
        request: Request<proto::KeyRange>,
    ) -> Result<Response<proto::Empty>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        if req.last_key < req.first_key {
            return Err(Status::invalid_argument("last_key precedes first_key"));
        }
        let granted = req.last_key - req.first_key + 1;
        *self.state.capacity.write().entry(req.tenant).or_insert(0) += granted;
        Ok(Response::new(proto::Empty {}))
    }

    async fn get_key_capacity(
        &self,
        request: Request<proto::TenantRequest>,
    ) -> Result<Response<proto::KeyCapacity>, Status> {
        self.state.intercept(&request).await?;
        let tenant = request.into_inner().tenant;

        let capacity = self.state.capacity.read().get(&tenant).copied().unwrap_or(0);
        let used =
            self.state.records.read().values().filter(|r| r.tenant == tenant).count() as u64;
        Ok(Response::new(proto::KeyCapacity { tenant, capacity, used }))
    }

    async fn map_get(
        &self,
        request: Request<proto::MapGetRequest>,
    ) -> Result<Response<proto::MapEntry>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        let maps = self.state.maps.read();
        maps.get(&(req.tenant, req.primary_key))
            .and_then(|entries| entries.iter().find(|e| e.map_key == req.map_key))
            .cloned()
            .map(Response::new)
            .ok_or_else(|| Status::not_found("map key not found"))
    }

    async fn map_put(
        &self,
        request: Request<proto::MapPutRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        let mut maps = self.state.maps.write();
        let entries = maps.entry((req.tenant, req.primary_key)).or_default();
        match entries.iter_mut().find(|e| e.map_key == req.map_key) {
            Some(entry) => {
                entry.value = req.value;
                entry.version += 1;
            },
            None => entries.push(proto::MapEntry {
                map_key: req.map_key,
                value: req.value,
                version: 1,
            }),
        }
        Ok(Response::new(proto::Empty {}))
    }

    async fn map_remove(
        &self,
        request: Request<proto::MapRemoveRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        let mut maps = self.state.maps.write();
        let entries = maps
            .get_mut(&(req.tenant, req.primary_key))
            .ok_or_else(|| Status::not_found("map key not found"))?;
        let before = entries.len();
        entries.retain(|e| e.map_key != req.map_key);
        if entries.len() == before {
            return Err(Status::not_found("map key not found"));
        }
        Ok(Response::new(proto::Empty {}))
    }

    type MapRangeStream = StreamResponse<proto::MapEntry>;

    async fn map_range(
        &self,
        request: Request<proto::MapRangeRequest>,
    ) -> Result<Response<Self::MapRangeStream>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        let maps = self.state.maps.read();
        let mut matches: Vec<_> = maps
            .get(&(req.tenant, req.primary_key))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| {
                        (req.from_key.is_empty() || e.map_key.as_str() >= req.from_key.as_str())
                            && (req.to_key.is_empty() || e.map_key.as_str() < req.to_key.as_str())
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matches.sort_by(|a, b| a.map_key.cmp(&b.map_key));

        Ok(Response::new(stream_of(matches.into_iter().map(Ok).collect())))
    }

    async fn bin_get(
        &self,
        request: Request<proto::BinGetRequest>,
    ) -> Result<Response<proto::BinEntry>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        let bins = self.state.bins.read();
        bins.get(&(req.tenant, req.primary_key))
            .and_then(|entries| entries.iter().find(|e| e.bin_name == req.bin_name))
            .cloned()
            .map(Response::new)
            .ok_or_else(|| Status::not_found("bin not found"))
    }

    async fn bin_put(
        &self,
        request: Request<proto::BinPutRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        let mut bins = self.state.bins.write();
        let entries = bins.entry((req.tenant, req.primary_key)).or_default();
        match entries.iter_mut().find(|e| e.bin_name == req.bin_name) {
            Some(entry) => entry.value = req.value,
            None => entries.push(proto::BinEntry { bin_name: req.bin_name, value: req.value }),
        }
        Ok(Response::new(proto::Empty {}))
    }

    async fn bin_remove(
        &self,
        request: Request<proto::BinRemoveRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        self.state.intercept(&request).await?;
        let req = request.into_inner();

        let mut bins = self.state.bins.write();
        let entries = bins
            .get_mut(&(req.tenant, req.primary_key))
            .ok_or_else(|| Status::not_found("bin not found"))?;
        let before = entries.len();
        entries.retain(|e| e.bin_name != req.bin_name);
        if entries.len() == before {
            return Err(Status::not_found("bin not found"));
        }
        Ok(Response::new(proto::Empty {}))
    }
}

#[tonic::async_trait]
impl ClusterService for MockService {
    async fn get_configuration(
        &self,
        request: Request<proto::Empty>,
    ) -> Result<Response<proto::ClusterConfiguration>, Status> {
        self.state.intercept(&request).await?;
        let servers = self.state.members.read().clone();
        Ok(Response::new(proto::ClusterConfiguration { servers }))
    }
}

/// Controllable mock Recordbase server bound to an ephemeral port.
pub struct MockRecordServer {
    state: Arc<MockState>,
    endpoint: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockRecordServer {
    /// Starts a new mock server on an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if binding fails.
    pub async fn start() -> crate::Result<Self> {
        Self::start_on_port(0).await
    }

    /// Starts a new mock server on a specific port.
    ///
    /// Use port 0 to let the OS assign an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the address is invalid, `Connection` if binding
    /// fails.
    pub async fn start_on_port(port: u16) -> crate::Result<Self> {
        let state = Arc::new(MockState::new());

        let addr: SocketAddr = format!("127.0.0.1:{port}")
            .parse()
            .map_err(|e| ConfigSnafu { message: format!("invalid port: {e}") }.build())?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ConnectionSnafu { message: format!("failed to bind: {e}") }.build())?;
        let local_addr = listener.local_addr().map_err(|e| {
            ConnectionSnafu { message: format!("failed to get local addr: {e}") }.build()
        })?;

        let endpoint = local_addr.to_string();

        // Default cluster view: this server is the only member.
        state
            .members
            .write()
            .push(proto::ServerInfo { node_id: 1, api_addr: endpoint.clone() });

        let service = MockService { state: Arc::clone(&state) };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
        tokio::spawn(async move {
            let result = Server::builder()
                .add_service(RecordServiceServer::new(service.clone()))
                .add_service(ClusterServiceServer::new(service))
                .serve_with_incoming_shutdown(incoming, async {
                    let _ = shutdown_rx.await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!("mock server error: {}", e);
            }
        });

        Ok(Self { state, endpoint, shutdown_tx: Some(shutdown_tx) })
    }

    /// Returns the `host:port` address this server listens on.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Replaces the member list served by `GetConfiguration`.
    pub fn set_members(&self, members: Vec<proto::ServerInfo>) {
        *self.state.members.write() = members;
    }

    /// Seeds a record.
    pub fn insert_record(&self, record: proto::RecordEntry) {
        self.state
            .records
            .write()
            .insert((record.tenant.clone(), record.primary_key.clone()), record);
    }

    /// Returns a stored record, if present.
    #[must_use]
    pub fn record(&self, tenant: &str, primary_key: &str) -> Option<proto::RecordEntry> {
        self.state.records.read().get(&(tenant.to_owned(), primary_key.to_owned())).cloned()
    }

    /// Returns stored file content, if present.
    #[must_use]
    pub fn file(&self, tenant: &str, primary_key: &str, file_name: &str) -> Option<Vec<u8>> {
        self.state
            .files
            .read()
            .get(&(tenant.to_owned(), primary_key.to_owned(), file_name.to_owned()))
            .cloned()
    }

    /// Replaces derived `Search`/`Scan` results with a fixed item sequence
    /// and an optional terminal error.
    pub fn script_stream(
        &self,
        items: Vec<proto::RecordEntry>,
        tail_error: Option<(tonic::Code, String)>,
    ) {
        *self.state.scripted.write() =
            Some(ScriptedStream { items, tail_error, item_delay: Duration::ZERO });
    }

    /// Like [`script_stream`](Self::script_stream), but inserts a delay
    /// before each item. Useful for cancellation tests.
    pub fn script_stream_with_delay(
        &self,
        items: Vec<proto::RecordEntry>,
        tail_error: Option<(tonic::Code, String)>,
        item_delay: Duration,
    ) {
        *self.state.scripted.write() = Some(ScriptedStream { items, tail_error, item_delay });
    }

    /// Requires every RPC to carry `Bearer <token>`.
    pub fn require_token(&self, token: &str) {
        *self.state.required_token.write() = Some(token.to_owned());
    }

    /// Fails the next `count` RPCs with `UNAVAILABLE`.
    pub fn inject_unavailable(&self, count: usize) {
        self.state.unavailable_count.store(count, Ordering::SeqCst);
    }

    /// Delays every RPC by the given number of milliseconds.
    pub fn set_delay_ms(&self, delay_ms: u64) {
        self.state.delay_ms.store(delay_ms, Ordering::Relaxed);
    }

    /// Total number of RPCs handled, including injected failures.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.state.request_count.load(Ordering::Relaxed)
    }

    /// Shuts the server down, refusing further connections.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockRecordServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
